//! Wire format of the tunnel socket.
//!
//! ```text
//! frame   := length:u32-LE payload:byte[length]
//! message := type:u32-LE body
//! ```

use crate::error::{FramingFault, Result, TunnelError};

pub const LENGTH_PREFIX: usize = 4;
pub const TYPE_TAG: usize = 4;
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Reseed = 1,
    Data = 2,
}

impl TryFrom<u32> for MessageType {
    type Error = TunnelError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(MessageType::Reseed),
            2 => Ok(MessageType::Data),
            other => Err(TunnelError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Opaque IV bytes; receiving one is not supported
    Reseed { iv: Vec<u8> },
    /// Relayed bytes, already encrypted on the wire
    Data { bytes: Vec<u8> },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Reseed { .. } => MessageType::Reseed,
            Message::Data { .. } => MessageType::Data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Message::Reseed { iv } => iv,
            Message::Data { bytes } => bytes,
        };
        let mut buf = Vec::with_capacity(TYPE_TAG + body.len());
        buf.extend_from_slice(&(self.message_type() as u32).to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (tag, body) = payload.split_first_chunk::<TYPE_TAG>().ok_or(FramingFault::Truncated {
            needed: TYPE_TAG,
            actual: payload.len(),
        })?;
        match MessageType::try_from(u32::from_le_bytes(*tag))? {
            MessageType::Reseed => Ok(Message::Reseed { iv: body.to_vec() }),
            MessageType::Data => Ok(Message::Data { bytes: body.to_vec() }),
        }
    }
}

/// Prefixes `payload` with its little-endian length.
pub fn make_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| FramingFault::Oversized {
        announced: payload.len(),
        limit: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Accumulates tunnel bytes and hands out complete frame payloads.
#[derive(Debug)]
pub struct PacketFramer {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME)
    }

    pub fn with_limit(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Removes the next complete payload, or returns `None` without consuming
    /// anything when the buffer holds only part of a frame.
    pub fn extract_one(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(prefix) = self.buffer.first_chunk::<LENGTH_PREFIX>() else {
            return Ok(None);
        };
        let announced = u32::from_le_bytes(*prefix);
        let len = usize::try_from(announced).map_err(|_| FramingFault::LengthOverflow(announced))?;
        if len > self.max_frame {
            return Err(FramingFault::Oversized {
                announced: len,
                limit: self.max_frame,
            }
            .into());
        }
        let end = LENGTH_PREFIX
            .checked_add(len)
            .ok_or(FramingFault::LengthOverflow(announced))?;
        if self.buffer.len() < end {
            return Ok(None);
        }
        let payload = self.buffer[LENGTH_PREFIX..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(payload))
    }

    /// Next complete message, decoded.
    pub fn extract_message(&mut self) -> Result<Option<Message>> {
        self.extract_one()?.map(|payload| Message::decode(&payload)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn frame_layout_is_little_endian_payload_length() {
        let frame = make_frame(b"abc").unwrap();
        assert_eq!(frame, [3, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(make_frame(b"").unwrap(), [0, 0, 0, 0]);
    }

    #[test]
    fn message_encoding_tags() {
        let data = Message::Data { bytes: b"hi".to_vec() };
        assert_eq!(data.encode(), [2, 0, 0, 0, b'h', b'i']);
        let reseed = Message::Reseed { iv: vec![9] };
        assert_eq!(reseed.encode(), [1, 0, 0, 0, 9]);
        assert_eq!(Message::decode(&data.encode()).unwrap(), data);
        assert_eq!(Message::decode(&reseed.encode()).unwrap(), reseed);
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let err = Message::decode(&[7, 0, 0, 0, 1, 2]).unwrap_err();
        assert!(matches!(err, TunnelError::UnknownMessageType(7)));
    }

    #[test]
    fn short_message_is_truncated() {
        let err = Message::decode(&[2, 0]).unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Framing(FramingFault::Truncated { needed: 4, actual: 2 })
        ));
    }

    #[test]
    fn partial_frame_is_left_in_place() {
        let mut framer = PacketFramer::new();
        framer.push(&[5, 0, 0]);
        assert_eq!(framer.extract_one().unwrap(), None);
        framer.push(&[0, 1, 2]);
        assert_eq!(framer.extract_one().unwrap(), None);
        assert_eq!(framer.buffered(), 6);
        framer.push(&[3, 4, 5]);
        assert_eq!(framer.extract_one().unwrap(), Some(vec![1, 2, 3, 4, 5]));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn reassembles_across_every_split_point() {
        let payload: Vec<u8> = (0..40u8).collect();
        let frame = make_frame(&payload).unwrap();
        for split in 0..=frame.len() {
            let mut framer = PacketFramer::new();
            framer.push(&frame[..split]);
            let early = framer.extract_one().unwrap();
            framer.push(&frame[split..]);
            let late = framer.extract_one().unwrap();
            let extracted: Vec<_> = early.into_iter().chain(late).collect();
            assert_eq!(extracted, vec![payload.clone()], "split at {split}");
            assert_eq!(framer.extract_one().unwrap(), None);
        }
    }

    #[test]
    fn concatenated_frames_come_out_in_order() {
        let mut rng = rand::thread_rng();
        let payloads: Vec<Vec<u8>> = (0..25)
            .map(|_| {
                let mut p = vec![0u8; rng.gen_range(0..300)];
                rng.fill(&mut p[..]);
                p
            })
            .collect();
        let stream: Vec<u8> = payloads
            .iter()
            .flat_map(|p| make_frame(p).unwrap())
            .collect();

        let mut framer = PacketFramer::new();
        let mut out = Vec::new();
        for chunk in stream.chunks(rng.gen_range(1..64)) {
            framer.push(chunk);
            while let Some(p) = framer.extract_one().unwrap() {
                out.push(p);
            }
        }
        assert_eq!(out, payloads);
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let mut framer = PacketFramer::with_limit(1024);
        framer.push(&(4096u32).to_le_bytes());
        let err = framer.extract_one().unwrap_err();
        assert!(matches!(
            err,
            TunnelError::Framing(FramingFault::Oversized { announced: 4096, limit: 1024 })
        ));
    }

    #[test]
    fn extract_message_decodes_payload() {
        let mut framer = PacketFramer::new();
        let msg = Message::Data { bytes: b"payload".to_vec() };
        framer.push(&make_frame(&msg.encode()).unwrap());
        assert_eq!(framer.extract_message().unwrap(), Some(msg));
        assert_eq!(framer.extract_message().unwrap(), None);
    }
}
