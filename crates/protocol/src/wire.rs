//! Wire-Format fuer TCP-Verbindungen zum Relay
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload einer
//! [`SignalingMessage`].
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE)                   | JSON      |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Maximale Frame-Groesse ist
//! konfigurierbar (Standard: 1 MB; SDP-Beschreibungen sind selten > 10 KB).

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::signal::SignalingMessage;

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

fn ungueltig(nachricht: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, nachricht)
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer Relay-Verbindungen
///
/// Wird mit `tokio_util::codec::Framed` auf beiden Seiten (Client-Transport
/// und Relay-Server) verwendet. Ungueltiges JSON oder Nachrichten mit
/// fehlenden Pflichtfeldern fuehren zu `InvalidData`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = SignalingMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(ungueltig(format!(
                "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                length, self.max_frame_size
            )));
        }

        let gesamt = LENGTH_FIELD_SIZE + length;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| ungueltig(format!("Signal-Nachricht ungueltig: {}", e)))
    }
}

impl Encoder<SignalingMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: SignalingMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| ungueltig(format!("JSON-Serialisierung fehlgeschlagen: {}", e)))?;

        if json.len() > self.max_frame_size {
            return Err(ungueltig(format!(
                "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                json.len(),
                self.max_frame_size
            )));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{IceCandidate, SessionDescription};
    use huddle_core::types::{ChannelId, Participant, ParticipantId};
    use tokio_util::codec::{Decoder, Encoder};

    fn kandidat(nr: u32) -> SignalingMessage {
        SignalingMessage::IceCandidate {
            channel_id: ChannelId::new("42"),
            from: ParticipantId::new("a"),
            to: ParticipantId::new("b"),
            candidate: IceCandidate::new(format!("candidate:{}", nr)),
        }
    }

    #[test]
    fn frame_codec_kodiert_und_dekodiert_offer() {
        let mut codec = FrameCodec::new();
        let offer = SignalingMessage::Offer {
            channel_id: ChannelId::new("42"),
            from: ParticipantId::new("a"),
            to: ParticipantId::new("b"),
            description: SessionDescription::offer("v=0\r\n"),
        };

        let mut buf = BytesMut::new();
        codec.encode(offer.clone(), &mut buf).unwrap();
        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        let decoded = codec.decode(&mut buf).unwrap().expect("Nachricht erwartet");
        assert_eq!(decoded, offer);
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(kandidat(1), &mut buf).unwrap();

        let haelfte = buf.len() / 2;
        let mut teil = buf.split_to(haelfte);
        assert!(codec.decode(&mut teil).unwrap().is_none());

        let mut zwei_bytes = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut zwei_bytes).unwrap().is_none());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = FrameCodec::with_max_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);
        assert!(codec.decode(&mut buf).is_err());

        let mut klein = FrameCodec::with_max_size(10);
        let mut ziel = BytesMut::new();
        assert!(klein.encode(kandidat(1), &mut ziel).is_err());
    }

    #[test]
    fn frame_codec_lehnt_unvollstaendige_nachricht_ab() {
        let mut codec = FrameCodec::new();
        let json = br#"{"type":"join-voice","channelId":"42"}"#;
        let mut buf = BytesMut::new();
        buf.put_u32(json.len() as u32);
        buf.put_slice(json);

        let fehler = codec.decode(&mut buf).unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn frame_codec_erhaelt_reihenfolge() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                SignalingMessage::Join {
                    channel_id: ChannelId::new("42"),
                    participant: Participant::new("a", "Anna"),
                },
                &mut buf,
            )
            .unwrap();
        for i in 0..3 {
            codec.encode(kandidat(i), &mut buf).unwrap();
        }

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(SignalingMessage::Join { .. })
        ));
        for i in 0..3 {
            let msg = codec.decode(&mut buf).unwrap().expect("Nachricht erwartet");
            assert_eq!(msg, kandidat(i));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_default_max_size() {
        assert_eq!(FrameCodec::new().max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }
}
