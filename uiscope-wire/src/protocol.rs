// Wire protocol packet framing and error taxonomy
//
// All multi-byte values are big-endian (network byte order).

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("target error code {0}: {1}")]
    ErrorCode(u16, &'static str),

    #[error("connection closed")]
    ConnectionClosed,
}

impl WireError {
    /// True when the error means the remote process state is no longer
    /// observable (dead VM, collected object, torn-down connection).
    pub fn is_session_gone(&self) -> bool {
        match self {
            WireError::ConnectionClosed | WireError::Io(_) => true,
            WireError::ErrorCode(code, _) => matches!(
                *code,
                error_codes::INVALID_OBJECT
                    | error_codes::CLASS_NOT_PREPARED
                    | error_codes::VM_DEAD
                    | error_codes::INVALID_CLASS_LOADER
            ),
            _ => false,
        }
    }

    /// True when the target thread was not in the state the command
    /// required (ran on, resumed externally, died).
    pub fn is_thread_state(&self) -> bool {
        matches!(
            self,
            WireError::ErrorCode(
                error_codes::INVALID_THREAD
                    | error_codes::THREAD_NOT_SUSPENDED
                    | error_codes::THREAD_SUSPENDED,
                _,
            )
        )
    }
}

pub mod error_codes {
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const THREAD_SUSPENDED: u16 = 14;
    pub const INVALID_OBJECT: u16 = 20;
    pub const CLASS_NOT_PREPARED: u16 = 22;
    pub const INVALID_METHODID: u16 = 23;
    pub const NOT_FOUND: u16 = 41;
    pub const VM_DEAD: u16 = 112;
    pub const INVALID_CLASS_LOADER: u16 = 507;
}

pub const HANDSHAKE: &[u8] = b"JDWP-Handshake";

// Packet layout:
// length (4 bytes, includes header)
// id (4 bytes)
// flags (1 byte) - 0x00 = command, 0x80 = reply
// [command packet: command set (1 byte) + command (1 byte)]
// [reply packet: error code (2 bytes)]
// data (variable)

pub const HEADER_SIZE: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

#[derive(Debug, Clone)]
pub struct CommandPacket {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReplyPacket {
    pub id: u32,
    pub error_code: u16,
    pub data: Vec<u8>,
}

impl CommandPacket {
    pub fn new(id: u32, command_set: u8, command: u8) -> Self {
        Self {
            id,
            command_set,
            command,
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_SIZE + self.data.len();
        let mut buf = BytesMut::with_capacity(length);

        buf.put_u32(length as u32);
        buf.put_u32(self.id);
        buf.put_u8(0x00); // command flag
        buf.put_u8(self.command_set);
        buf.put_u8(self.command);
        buf.put_slice(&self.data);

        buf.to_vec()
    }
}

impl ReplyPacket {
    pub fn decode(mut buf: &[u8]) -> WireResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::Protocol("reply packet too short".to_string()));
        }

        let _length = buf.get_u32();
        let id = buf.get_u32();
        let flags = buf.get_u8();

        if flags != REPLY_FLAG {
            return Err(WireError::Protocol(format!(
                "invalid reply flag: {:#x}",
                flags
            )));
        }

        let error_code = buf.get_u16();

        Ok(Self {
            id,
            error_code,
            data: buf.to_vec(),
        })
    }

    pub fn check_error(&self) -> WireResult<()> {
        if self.error_code != 0 {
            Err(WireError::ErrorCode(
                self.error_code,
                error_message(self.error_code),
            ))
        } else {
            Ok(())
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

pub fn error_message(code: u16) -> &'static str {
    match code {
        0 => "NONE",
        10 => "INVALID_THREAD",
        11 => "INVALID_THREAD_GROUP",
        13 => "THREAD_NOT_SUSPENDED",
        14 => "THREAD_SUSPENDED",
        20 => "INVALID_OBJECT",
        21 => "INVALID_CLASS",
        22 => "CLASS_NOT_PREPARED",
        23 => "INVALID_METHODID",
        24 => "INVALID_LOCATION",
        25 => "INVALID_FIELDID",
        30 => "INVALID_FRAMEID",
        31 => "NO_MORE_FRAMES",
        32 => "OPAQUE_FRAME",
        34 => "TYPE_MISMATCH",
        35 => "INVALID_SLOT",
        40 => "DUPLICATE",
        41 => "NOT_FOUND",
        52 => "INTERRUPT",
        60 => "INVALID_CLASS_FORMAT",
        61 => "CIRCULAR_CLASS_DEFINITION",
        62 => "FAILS_VERIFICATION",
        65 => "INVALID_TYPESTATE",
        68 => "UNSUPPORTED_VERSION",
        69 => "NAMES_DONT_MATCH",
        99 => "NOT_IMPLEMENTED",
        100 => "NULL_POINTER",
        101 => "ABSENT_INFORMATION",
        102 => "INVALID_EVENT_TYPE",
        103 => "ILLEGAL_ARGUMENT",
        110 => "OUT_OF_MEMORY",
        111 => "ACCESS_DENIED",
        112 => "VM_DEAD",
        113 => "INTERNAL",
        115 => "UNATTACHED_THREAD",
        500 => "INVALID_TAG",
        502 => "ALREADY_INVOKING",
        503 => "INVALID_INDEX",
        504 => "INVALID_LENGTH",
        506 => "INVALID_STRING",
        507 => "INVALID_CLASS_LOADER",
        508 => "INVALID_ARRAY",
        511 => "NATIVE_METHOD",
        512 => "INVALID_COUNT",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packet_encode() {
        let packet = CommandPacket::new(1, 1, 1);
        let encoded = packet.encode();

        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 11]); // length (big-endian)
        assert_eq!(&encoded[4..8], &[0, 0, 0, 1]); // id (big-endian)
        assert_eq!(encoded[8], 0x00); // command flag
        assert_eq!(encoded[9], 1); // command set
        assert_eq!(encoded[10], 1); // command
    }

    #[test]
    fn test_reply_packet_decode() {
        let reply_data = vec![
            0, 0, 0, 11, // length = 11 (big-endian)
            0, 0, 0, 1, // id = 1 (big-endian)
            0x80, // reply flag
            0, 0, // error code = 0 (big-endian)
        ];

        let packet = ReplyPacket::decode(&reply_data).unwrap();
        assert_eq!(packet.id, 1);
        assert_eq!(packet.error_code, 0);
        assert!(packet.check_error().is_ok());
    }

    #[test]
    fn test_error_classification() {
        assert!(WireError::ErrorCode(112, "VM_DEAD").is_session_gone());
        assert!(WireError::ErrorCode(20, "INVALID_OBJECT").is_session_gone());
        assert!(WireError::ConnectionClosed.is_session_gone());
        assert!(!WireError::ErrorCode(34, "TYPE_MISMATCH").is_session_gone());

        assert!(WireError::ErrorCode(13, "THREAD_NOT_SUSPENDED").is_thread_state());
        assert!(!WireError::ErrorCode(41, "NOT_FOUND").is_thread_state());
    }
}
