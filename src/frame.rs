//! WebSocket frame records
//!
//! The codec layer operates on already-parsed frames: opcode, final-fragment
//! flag, the three reserved bits and a reference-counted payload. Wire
//! framing (header parsing, masking, handshake) lives in the transport and
//! is out of scope here.

use crate::buffer::ByteBuf;
use crate::error::Result;

/// RSV1 bit: permessage-deflate compression
pub const RSV1: u8 = 0b100;
/// RSV2 bit: reserved for extensions
pub const RSV2: u8 = 0b010;
/// RSV3 bit: reserved for extensions
pub const RSV3: u8 = 0b001;

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// A WebSocket frame with a reference-counted payload
#[derive(Debug)]
pub struct Frame {
    /// Frame opcode
    pub opcode: OpCode,
    /// Final fragment flag
    pub fin: bool,
    /// The three reserved bits, `RSV1 | RSV2 | RSV3`
    pub rsv: u8,
    /// Payload content; its lifecycle follows the buffer rules
    pub payload: ByteBuf,
}

impl Frame {
    /// Create a frame with RSV bits cleared
    pub fn new(opcode: OpCode, payload: ByteBuf, fin: bool) -> Self {
        Self {
            opcode,
            fin,
            rsv: 0,
            payload,
        }
    }

    /// Create a final text frame
    #[inline]
    pub fn text(payload: ByteBuf) -> Self {
        Self::new(OpCode::Text, payload, true)
    }

    /// Create a final binary frame
    #[inline]
    pub fn binary(payload: ByteBuf) -> Self {
        Self::new(OpCode::Binary, payload, true)
    }

    /// Create a continuation frame
    #[inline]
    pub fn continuation(payload: ByteBuf, fin: bool) -> Self {
        Self::new(OpCode::Continuation, payload, fin)
    }

    /// Create a ping frame
    #[inline]
    pub fn ping(payload: ByteBuf) -> Self {
        Self::new(OpCode::Ping, payload, true)
    }

    /// Create a pong frame
    #[inline]
    pub fn pong(payload: ByteBuf) -> Self {
        Self::new(OpCode::Pong, payload, true)
    }

    /// Set the reserved bits (builder style)
    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv;
        self
    }

    /// Mark as non-final (builder style)
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// True when RSV1 (compression) is set
    #[inline]
    pub fn rsv1(&self) -> bool {
        self.rsv & RSV1 != 0
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if this is the final fragment
    #[inline]
    pub fn is_final(&self) -> bool {
        self.fin
    }

    /// Retain the payload
    pub fn retain(&self) -> Result<()> {
        self.payload.retain()
    }

    /// Release the payload; true iff it was deallocated
    pub fn release(&self) -> Result<bool> {
        self.payload.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{BufAllocator, PooledAllocator};

    #[test]
    fn test_opcode() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(OpCode::Continuation.is_data());
        assert_eq!(OpCode::from_u8(0x2), Some(OpCode::Binary));
        assert_eq!(OpCode::from_u8(0x3), None);
    }

    #[test]
    fn test_rsv_bits() {
        let mut payload = PooledAllocator.buffer(4);
        payload.write_bytes(b"data").unwrap();
        let frame = Frame::binary(payload).with_rsv(RSV1 | RSV3);
        assert!(frame.rsv1());
        assert_eq!(frame.rsv & RSV3, RSV3);
        assert_eq!(frame.rsv & RSV2, 0);
        frame.release().unwrap();
    }

    #[test]
    fn test_lifecycle_passthrough() {
        let payload = PooledAllocator.buffer(4);
        let frame = Frame::text(payload);
        frame.retain().unwrap();
        assert!(!frame.release().unwrap());
        assert!(frame.release().unwrap());
        assert!(frame.release().is_err());
    }
}
