//! Wayland wire framing
//!
//! Every Wayland message starts with an 8-byte header: the sender object id,
//! then a word holding the total message size in the upper 16 bits and the
//! opcode in the lower 16 bits. Sizes include the header and are always
//! word aligned. File descriptors travel out of band and never appear here.

use log::trace;

/// Size of a message header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest message libwayland will produce or accept
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Errors produced while framing a byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("Message size {0} is smaller than the header")]
    TooShort(usize),
    #[error("Message size {0} exceeds the {max} byte limit", max = MAX_MESSAGE_SIZE)]
    TooLong(usize),
    #[error("Message size {0} is not a multiple of 4")]
    Unaligned(usize),
    #[error("Object id 0 cannot send messages")]
    NullObject,
}

/// A decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Object the message is sent to or from
    pub object_id: u32,
    /// Request or event opcode
    pub opcode: u16,
    /// Total size in bytes, header included
    pub size: u16,
}

impl MessageHeader {
    /// Parse and validate a header from the first 8 bytes of `bytes`
    ///
    /// Returns `Ok(None)` when fewer than 8 bytes are available.
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>, WireError> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        let object_id = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let word = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let size = (word >> 16) as usize;
        let opcode = (word & 0xffff) as u16;

        if size < HEADER_SIZE {
            return Err(WireError::TooShort(size));
        }
        if size > MAX_MESSAGE_SIZE {
            return Err(WireError::TooLong(size));
        }
        if size % 4 != 0 {
            return Err(WireError::Unaligned(size));
        }
        if object_id == 0 {
            return Err(WireError::NullObject);
        }

        Ok(Some(Self {
            object_id,
            opcode,
            size: size as u16,
        }))
    }

    /// Encode the header into its 8-byte wire form
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.object_id.to_ne_bytes());
        let word = ((self.size as u32) << 16) | self.opcode as u32;
        out[4..].copy_from_slice(&word.to_ne_bytes());
        out
    }
}

/// Builder for a single outgoing message
///
/// Used by the relay tests and by anything that needs to speak raw wire
/// without a full protocol stack.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    object_id: u32,
    opcode: u16,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(object_id: u32, opcode: u16) -> Self {
        Self {
            object_id,
            opcode,
            body: Vec::new(),
        }
    }

    pub fn uint(mut self, value: u32) -> Self {
        self.body.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn int(mut self, value: i32) -> Self {
        self.body.extend_from_slice(&value.to_ne_bytes());
        self
    }

    /// Append a string argument (length includes the NUL terminator)
    pub fn string(mut self, value: &str) -> Self {
        let len = value.len() + 1;
        self.body.extend_from_slice(&(len as u32).to_ne_bytes());
        self.body.extend_from_slice(value.as_bytes());
        self.body.push(0);
        while self.body.len() % 4 != 0 {
            self.body.push(0);
        }
        self
    }

    /// Finish the message, writing the header
    pub fn build(self) -> Vec<u8> {
        let header = MessageHeader {
            object_id: self.object_id,
            opcode: self.opcode,
            size: (HEADER_SIZE + self.body.len()) as u16,
        };
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Incremental splitter that turns a byte stream into whole messages
///
/// Bytes are pushed in as they arrive; complete messages are handed out one
/// at a time. A bad header poisons the decoder: the stream cannot be
/// resynchronised once framing is lost.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    poisoned: Option<WireError>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if let Some(err) = self.poisoned {
            return Err(err);
        }
        let header = match MessageHeader::parse(&self.buf) {
            Ok(Some(h)) => h,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.poisoned = Some(e);
                return Err(e);
            }
        };
        let size = header.size as usize;
        if self.buf.len() < size {
            return Ok(None);
        }
        let rest = self.buf.split_off(size);
        let frame = std::mem::replace(&mut self.buf, rest);
        trace!(
            "Framed message obj={} opcode={} size={}",
            header.object_id,
            header.opcode,
            size
        );
        Ok(Some(frame))
    }

    /// Bytes buffered but not yet forming a whole message
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received data
    pub fn clear(&mut self) {
        self.buf.clear();
        self.buf.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(object_id: u32, size: u32, opcode: u32) -> Vec<u8> {
        let mut out = object_id.to_ne_bytes().to_vec();
        out.extend_from_slice(&((size << 16) | opcode).to_ne_bytes());
        out
    }

    #[test]
    fn test_header_parse() {
        let msg = MessageBuilder::new(1, 0).uint(2).build();
        let header = MessageHeader::parse(&msg).unwrap().unwrap();
        assert_eq!(header.object_id, 1);
        assert_eq!(header.opcode, 0);
        assert_eq!(header.size, 12);
    }

    #[test]
    fn test_header_needs_eight_bytes() {
        assert_eq!(MessageHeader::parse(&[1, 0, 0]).unwrap(), None);
    }

    #[test]
    fn test_header_rejects_bad_sizes() {
        assert_eq!(
            MessageHeader::parse(&raw_header(1, 4, 0)),
            Err(WireError::TooShort(4))
        );
        assert_eq!(
            MessageHeader::parse(&raw_header(1, 10, 0)),
            Err(WireError::Unaligned(10))
        );
        assert_eq!(
            MessageHeader::parse(&raw_header(1, 8192, 0)),
            Err(WireError::TooLong(8192))
        );
        assert_eq!(
            MessageHeader::parse(&raw_header(0, 8, 0)),
            Err(WireError::NullObject)
        );
    }

    #[test]
    fn test_string_padding() {
        let msg = MessageBuilder::new(3, 1).string("abc").build();
        // header + length word + "abc\0"
        assert_eq!(msg.len(), 16);
        let msg = MessageBuilder::new(3, 1).string("abcd").build();
        // "abcd\0" pads to 8
        assert_eq!(msg.len(), 20);
    }

    #[test]
    fn test_decoder_splits_partial_reads() {
        let a = MessageBuilder::new(1, 0).uint(2).build();
        let b = MessageBuilder::new(2, 1).string("hello").build();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut decoder = FrameDecoder::new();
        decoder.push(&stream[..5]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&stream[5..14]);
        assert_eq!(decoder.next_frame().unwrap(), Some(a));
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&stream[14..]);
        assert_eq!(decoder.next_frame().unwrap(), Some(b));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_poisoned_after_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&raw_header(1, 2, 0));
        assert!(decoder.next_frame().is_err());
        decoder.push(&MessageBuilder::new(1, 0).build());
        assert!(decoder.next_frame().is_err());
    }
}
