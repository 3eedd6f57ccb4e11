//! Wire-Format fuer die TCP-Verbindung
//!
//! Frame-basiertes Protokoll: Laenge (u32 big-endian) + JSON-Payload.
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Signalisierungs-Payloads
//! (SDP-Angebote, ICE-Kandidaten) sind klein; das Frame-Limit liegt
//! deshalb bei 256 KiB statt im Megabyte-Bereich.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::control::ControlMessage;

/// Standard-maximale Frame-Groesse (256 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

/// tokio-util Codec fuer das Visavis-Signalisierungsprotokoll
///
/// Implementiert `Encoder<ControlMessage>` und `Decoder` fuer die
/// Verwendung mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limit
    pub fn neu() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit eigenem Frame-Limit
    pub fn mit_max_groesse(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt das konfigurierte Frame-Limit zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::neu()
    }
}

impl Decoder for FrameCodec {
    type Item = ControlMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Laengen-Feld noch unvollstaendig?
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let laenge = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if laenge > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    laenge, self.max_frame_size
                ),
            ));
        }

        // Vollstaendigen Frame abwarten
        let gesamt = LENGTH_FIELD_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(laenge);

        let nachricht: ControlMessage = serde_json::from_slice(&payload).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Deserialisierung fehlgeschlagen: {}", e),
            )
        })?;

        Ok(Some(nachricht))
    }
}

impl Encoder<ControlMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlPayload;

    fn test_ping(request_id: u32) -> ControlMessage {
        ControlMessage::ping(request_id, 999888777)
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = FrameCodec::neu();
        let original = test_ping(42);

        let mut buf = BytesMut::new();
        codec.encode(original, &mut buf).unwrap();

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert!(payload_len > 0);
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        let decoded = codec
            .decode(&mut buf)
            .unwrap()
            .expect("Muss eine Nachricht enthalten");
        assert_eq!(decoded.request_id, 42);
        assert!(matches!(decoded.payload, ControlPayload::Ping(_)));
    }

    #[test]
    fn unvollstaendiger_frame_wartet() {
        let mut codec = FrameCodec::neu();

        let mut buf = BytesMut::new();
        codec.encode(test_ping(1), &mut buf).unwrap();

        // Nur die Haelfte der Bytes anliefern
        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);

        let result = codec.decode(&mut partial).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = FrameCodec::neu();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn ablehnung_zu_grosser_frame() {
        let mut codec = FrameCodec::mit_max_groesse(100);

        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn ablehnung_beim_encode_zu_grosse_nachricht() {
        let mut codec = FrameCodec::mit_max_groesse(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(test_ping(1), &mut buf).is_err());
    }

    #[test]
    fn mehrere_nachrichten_im_buffer() {
        let mut codec = FrameCodec::neu();
        let mut buf = BytesMut::new();

        for i in 0..3u32 {
            codec.encode(test_ping(i), &mut buf).unwrap();
        }

        for i in 0..3u32 {
            let msg = codec.decode(&mut buf).unwrap().expect("Nachricht erwartet");
            assert_eq!(msg.request_id, i);
        }

        assert!(buf.is_empty());
    }

    #[test]
    fn ungueltiges_json_ist_fehler() {
        let mut codec = FrameCodec::neu();
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        buf.put_slice(b"{{{{");
        assert!(codec.decode(&mut buf).is_err());
    }
}
