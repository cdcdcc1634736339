//! SLIP byte-stuffing.
//!
//! [`encode`] wraps a packet in `END` delimiters and escapes reserved bytes.
//! [`SlipDecoder`] turns an arbitrarily chunked byte stream back into frames.
//! A bad escape or an oversized frame drops only the frame in progress; the
//! decoder then waits for the next `END` and carries on.

use thiserror::Error;

use crate::constants::{END, ESC, ESC_END, ESC_ESC, MAX_PACKET};

/// Malformed byte-stuffed input. Reported per frame, never fatal to the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// `ESC` followed by something other than `ESC_END`/`ESC_ESC`
    #[error("invalid escape sequence 0xDB {0:#04x}")]
    InvalidEscape(u8),

    /// Frame grew past the largest legal packet
    #[error("frame exceeds {0} bytes")]
    Oversized(usize),
}

/// Encode one frame: `END`, escaped body, `END`.
pub fn encode(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 2);
    encode_into(frame, &mut out);
    out
}

/// Append the encoded frame to `out`.
pub fn encode_into(frame: &[u8], out: &mut Vec<u8>) {
    out.push(END);
    for &byte in frame {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(END);
}

/// Decode every well-formed frame in a complete stream, skipping bad ones.
pub fn decode(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut decoder = SlipDecoder::new();
    decoder.decode(stream).filter_map(|frame| frame.ok()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Outside a frame; everything up to the next `END` is noise.
    Idle,
    Normal,
    Escaped,
}

/// Incremental SLIP decoder.
///
/// State persists between calls, so a frame split across several transport
/// reads is reassembled.
#[derive(Debug, Clone)]
pub struct SlipDecoder {
    state: State,
    buffer: Vec<u8>,
    max_frame: usize,
}

impl Default for SlipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SlipDecoder {
    /// Decoder accepting frames up to the largest NSP packet.
    pub fn new() -> Self {
        Self::with_max_frame(MAX_PACKET)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            state: State::Idle,
            buffer: Vec::with_capacity(max_frame),
            max_frame,
        }
    }

    /// Feed one byte. Returns a completed frame or the reason one was dropped.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, FramingError>> {
        match (self.state, byte) {
            (State::Idle, END) => {
                self.state = State::Normal;
                None
            }
            (State::Idle, _) => None,
            (State::Normal, END) => {
                if self.buffer.is_empty() {
                    return None;
                }
                Some(Ok(std::mem::take(&mut self.buffer)))
            }
            (State::Normal, ESC) => {
                self.state = State::Escaped;
                None
            }
            (State::Normal, _) => self.append(byte),
            (State::Escaped, ESC_END) => {
                self.state = State::Normal;
                self.append(END)
            }
            (State::Escaped, ESC_ESC) => {
                self.state = State::Normal;
                self.append(ESC)
            }
            (State::Escaped, END) => {
                // the delimiter still marks a boundary, so the next frame starts clean
                self.buffer.clear();
                self.state = State::Normal;
                Some(Err(FramingError::InvalidEscape(END)))
            }
            (State::Escaped, other) => {
                self.resync();
                Some(Err(FramingError::InvalidEscape(other)))
            }
        }
    }

    /// Lazily decode `input`, yielding frames and framing errors in order.
    pub fn decode<'a>(&'a mut self, input: &'a [u8]) -> Frames<'a> {
        Frames {
            decoder: self,
            input: input.iter(),
        }
    }

    /// Drop any partial frame and wait for the next delimiter.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::Idle;
    }

    /// Bytes of the frame currently being assembled.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn append(&mut self, byte: u8) -> Option<Result<Vec<u8>, FramingError>> {
        if self.buffer.len() >= self.max_frame {
            self.resync();
            return Some(Err(FramingError::Oversized(self.max_frame)));
        }
        self.buffer.push(byte);
        None
    }

    fn resync(&mut self) {
        self.buffer.clear();
        self.state = State::Idle;
    }
}

/// Iterator returned by [`SlipDecoder::decode`].
pub struct Frames<'a> {
    decoder: &'a mut SlipDecoder,
    input: std::slice::Iter<'a, u8>,
}

impl Iterator for Frames<'_> {
    type Item = Result<Vec<u8>, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        for &byte in self.input.by_ref() {
            if let Some(item) = self.decoder.push(byte) {
                return Some(item);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn escapes_reserved_bytes() {
        let encoded = encode(&[0x01, END, 0x02, ESC, 0x03]);
        assert_eq!(
            encoded,
            vec![END, 0x01, ESC, ESC_END, 0x02, ESC, ESC_ESC, 0x03, END]
        );
    }

    #[test]
    fn frame_split_across_reads() {
        let encoded = encode(&[0xAA, END, 0xBB]);
        let mut decoder = SlipDecoder::new();

        let (head, tail) = encoded.split_at(3);
        assert_eq!(decoder.decode(head).count(), 0);
        assert!(decoder.pending() > 0);

        let frames: Vec<_> = decoder.decode(tail).collect();
        assert_eq!(frames, vec![Ok(vec![0xAA, END, 0xBB])]);
    }

    #[test]
    fn back_to_back_frames_share_delimiter() {
        let stream = [END, 0x01, END, 0x02, 0x03, END];
        assert_eq!(decode(&stream), vec![vec![0x01], vec![0x02, 0x03]]);
    }

    #[test]
    fn leading_noise_is_ignored() {
        let mut stream = vec![0x55, 0x66, 0x77];
        stream.extend(encode(&[0x10, 0x20]));
        assert_eq!(decode(&stream), vec![vec![0x10, 0x20]]);
    }

    #[test]
    fn invalid_escape_drops_only_current_frame() {
        let mut stream = vec![END, 0x01, ESC, 0x42, 0x02, END];
        stream.extend(encode(&[0x09]));

        let mut decoder = SlipDecoder::new();
        let items: Vec<_> = decoder.decode(&stream).collect();
        assert_eq!(
            items,
            vec![Err(FramingError::InvalidEscape(0x42)), Ok(vec![0x09])]
        );
    }

    #[test]
    fn escape_before_delimiter_keeps_next_frame() {
        let stream = [END, 0x01, ESC, END, 0x07, END];
        let mut decoder = SlipDecoder::new();
        let items: Vec<_> = decoder.decode(&stream).collect();
        assert_eq!(
            items,
            vec![Err(FramingError::InvalidEscape(END)), Ok(vec![0x07])]
        );
    }

    #[test]
    fn oversized_frame_resynchronises() {
        let mut stream = vec![END];
        stream.extend(std::iter::repeat(0x11).take(MAX_PACKET + 5));
        stream.extend(encode(&[0x01, 0x02]));

        let mut decoder = SlipDecoder::new();
        let items: Vec<_> = decoder.decode(&stream).collect();
        assert_eq!(
            items,
            vec![Err(FramingError::Oversized(MAX_PACKET)), Ok(vec![0x01, 0x02])]
        );
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut decoder = SlipDecoder::new();
        assert_eq!(decoder.decode(&[END, 0x01, 0x02]).count(), 0);
        decoder.reset();
        assert_eq!(decoder.decode(&[0x03, END]).count(), 0);
        let frames: Vec<_> = decoder.decode(&[0x04, END]).collect();
        assert_eq!(frames, vec![Ok(vec![0x04])]);
    }

    proptest! {
        #[test]
        fn single_frame_round_trip(frame in proptest::collection::vec(any::<u8>(), 1..=MAX_PACKET)) {
            prop_assert_eq!(decode(&encode(&frame)), vec![frame]);
        }

        #[test]
        fn encoded_body_has_no_delimiter(frame in any::<Vec<u8>>()) {
            let encoded = encode(&frame);
            prop_assert!(!encoded[1..encoded.len() - 1].contains(&END));
        }
    }
}
