//! Wire decoding for the upstream frame stream.
//!
//! The stream opens with an 8-byte header (`FRAM`, version, 3 reserved
//! bytes) followed by length-prefixed JPEG records. Decoding is abstracted
//! behind [`StreamDecoder`] so an alternate wire format (raw MJPEG, vendor
//! TLV) can be substituted without touching the distributor or anything
//! downstream.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ReaderError;
use crate::protocol_constants::{
    FRAME_STREAM_HEADER_LEN, FRAME_STREAM_MAGIC, FRAME_STREAM_VERSION, JPEG_SOI,
    MAX_FRAME_RECORD_LEN,
};

/// Incremental decoder over a growable read buffer.
///
/// `decode_frame` is called repeatedly as bytes arrive; it consumes complete
/// records and leaves partial ones in place.
pub trait StreamDecoder: Send {
    /// Consumes the stream prelude. Returns `Ok(true)` once the header has
    /// been fully read, `Ok(false)` if more bytes are needed.
    fn decode_header(&mut self, buf: &mut BytesMut) -> Result<bool, ReaderError>;

    /// Extracts the next JPEG payload, or `None` if the buffer holds only a
    /// partial record.
    fn decode_frame(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ReaderError>;

    /// Number of parse deviations recovered by resync so far.
    fn protocol_errors(&self) -> u64;
}

/// Decoder for the `FRAM` length-prefixed JPEG protocol.
///
/// Any parse deviation (bad magic, insane length, payload without a JPEG
/// start-of-image marker) triggers resync: bytes are discarded until the next
/// plausible length prefix whose payload starts as a JPEG.
#[derive(Debug, Default)]
pub struct FramDecoder {
    header_done: bool,
    protocol_errors: u64,
}

impl FramDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans forward for the next `length prefix + SOI` boundary and
    /// discards everything before it. Keeps the tail if no boundary is
    /// visible yet so a boundary split across reads is not lost.
    fn resync(&mut self, buf: &mut BytesMut) {
        self.protocol_errors += 1;

        let mut discard = buf.len();
        // A candidate needs 4 length bytes plus the 2-byte SOI marker.
        if buf.len() >= 6 {
            for i in 0..buf.len() - 5 {
                let len = u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
                if (1..=MAX_FRAME_RECORD_LEN).contains(&len)
                    && buf[i + 4] == JPEG_SOI[0]
                    && buf[i + 5] == JPEG_SOI[1]
                {
                    discard = i;
                    break;
                }
            }
        }
        if discard == buf.len() {
            // No candidate found; keep the last 5 bytes in case a boundary
            // straddles the read edge.
            discard = buf.len().saturating_sub(5);
        }
        buf.advance(discard);
    }
}

impl StreamDecoder for FramDecoder {
    fn decode_header(&mut self, buf: &mut BytesMut) -> Result<bool, ReaderError> {
        if self.header_done {
            return Ok(true);
        }
        if buf.len() < FRAME_STREAM_HEADER_LEN {
            return Ok(false);
        }

        if &buf[..4] != FRAME_STREAM_MAGIC {
            return Err(ReaderError::Protocol(format!(
                "bad stream magic {:02x?}",
                &buf[..4]
            )));
        }
        let version = buf[4];
        if version != FRAME_STREAM_VERSION {
            return Err(ReaderError::Protocol(format!(
                "unsupported protocol version {}",
                version
            )));
        }

        buf.advance(FRAME_STREAM_HEADER_LEN);
        self.header_done = true;
        Ok(true)
    }

    fn decode_frame(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ReaderError> {
        loop {
            if buf.len() < 4 {
                return Ok(None);
            }

            let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            if len == 0 || len > MAX_FRAME_RECORD_LEN {
                log::warn!("[Reader] Corrupt length prefix {}, resyncing", len);
                self.resync(buf);
                continue;
            }

            let total = 4 + len as usize;
            if buf.len() < total {
                // Partial record; but if we already have the payload head and
                // it is not a JPEG, resync now instead of waiting for bytes
                // that will be thrown away.
                if buf.len() >= 6 && buf[4..6] != JPEG_SOI {
                    log::warn!("[Reader] Record payload is not a JPEG, resyncing");
                    self.resync(buf);
                    continue;
                }
                return Ok(None);
            }

            if buf[4..6] != JPEG_SOI {
                log::warn!("[Reader] Record payload is not a JPEG, resyncing");
                self.resync(buf);
                continue;
            }

            buf.advance(4);
            return Ok(Some(buf.split_to(len as usize).freeze()));
        }
    }

    fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn header() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(FRAME_STREAM_MAGIC);
        out.push(FRAME_STREAM_VERSION);
        out.extend_from_slice(&[0, 0, 0]);
        out
    }

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32(payload.len() as u32);
        out.extend_from_slice(payload);
        out
    }

    fn fake_jpeg(fill: u8) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend(std::iter::repeat(fill).take(16));
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn header_then_frames_decode() {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header());
        buf.extend_from_slice(&record(&fake_jpeg(1)));
        buf.extend_from_slice(&record(&fake_jpeg(2)));

        assert!(decoder.decode_header(&mut buf).unwrap());
        let f1 = decoder.decode_frame(&mut buf).unwrap().unwrap();
        let f2 = decoder.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(f1, Bytes::from(fake_jpeg(1)));
        assert_eq!(f2, Bytes::from(fake_jpeg(2)));
        assert!(decoder.decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(decoder.protocol_errors(), 0);
    }

    #[test]
    fn header_needs_all_eight_bytes() {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::from(&header()[..5]);
        assert!(!decoder.decode_header(&mut buf).unwrap());
        buf.extend_from_slice(&header()[5..]);
        assert!(decoder.decode_header(&mut buf).unwrap());
    }

    #[test]
    fn bad_magic_is_a_protocol_error() {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::from(&b"JUNK0000"[..]);
        assert!(decoder.decode_header(&mut buf).is_err());
    }

    #[test]
    fn partial_record_waits_for_more_bytes() {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header());
        assert!(decoder.decode_header(&mut buf).unwrap());

        let rec = record(&fake_jpeg(3));
        buf.extend_from_slice(&rec[..rec.len() - 4]);
        assert!(decoder.decode_frame(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&rec[rec.len() - 4..]);
        assert!(decoder.decode_frame(&mut buf).unwrap().is_some());
    }

    #[test]
    fn corrupted_length_prefix_resyncs_to_next_frame() {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header());
        assert!(decoder.decode_header(&mut buf).unwrap());

        // Frame 10, then garbage where a length prefix should be, then frame 11.
        buf.extend_from_slice(&record(&fake_jpeg(10)));
        buf.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0xAB, 0xCD]);
        buf.extend_from_slice(&record(&fake_jpeg(11)));

        let f10 = decoder.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(f10, Bytes::from(fake_jpeg(10)));

        let f11 = decoder.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(f11, Bytes::from(fake_jpeg(11)));
        assert_eq!(decoder.protocol_errors(), 1, "exactly one resync");
    }

    #[test]
    fn non_jpeg_payload_resyncs() {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header());
        assert!(decoder.decode_header(&mut buf).unwrap());

        let mut not_jpeg = vec![0x00, 0x11];
        not_jpeg.extend(std::iter::repeat(0x22).take(16));
        buf.extend_from_slice(&record(&not_jpeg));
        buf.extend_from_slice(&record(&fake_jpeg(7)));

        let next = decoder.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(next, Bytes::from(fake_jpeg(7)));
        assert!(decoder.protocol_errors() >= 1);
    }
}
