//! TFTP packet encoding for the write (put) direction.
//!
//! RFC 1350 (base protocol), RFC 2347 (option extension), RFC 2348
//! (blksize), RFC 2349 (timeout, tsize).

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TftpError};

pub const DEFAULT_BLOCK_SIZE: usize = 512; // RFC 1350

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,   // Read request (RFC 1350)
    Wrq = 2,   // Write request (RFC 1350)
    Data = 3,  // Data packet (RFC 1350)
    Ack = 4,   // Acknowledgment (RFC 1350)
    Error = 5, // Error packet (RFC 1350)
    Oack = 6,  // Option acknowledgment (RFC 2347)
}

impl TryFrom<u16> for Opcode {
    type Error = TftpError;

    fn try_from(value: u16) -> std::result::Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            _ => Err(TftpError::Tftp(format!("Invalid opcode: {}", value))),
        }
    }
}

/// Options requested with a write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub block_size: usize,
    pub timeout_secs: u64,
    pub transfer_size: u64,
}

/// Packets a server sends back during a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack(u16),
    Oack(HashMap<String, String>),
    Error { code: u16, message: String },
}

/// Packets a client sends during a write; parsed by test responders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Wrq {
        filename: String,
        mode: String,
        options: HashMap<String, String>,
    },
    Data {
        block: u16,
        data: Bytes,
    },
}

pub fn encode_wrq(filename: &str, options: &WriteOptions) -> BytesMut {
    let mut packet = BytesMut::new();
    packet.put_u16(Opcode::Wrq as u16);
    put_string(&mut packet, filename);
    put_string(&mut packet, "octet");

    if options.block_size != DEFAULT_BLOCK_SIZE {
        put_string(&mut packet, "blksize");
        put_string(&mut packet, &options.block_size.to_string());
    }
    put_string(&mut packet, "timeout");
    put_string(&mut packet, &options.timeout_secs.to_string());
    put_string(&mut packet, "tsize");
    put_string(&mut packet, &options.transfer_size.to_string());

    packet
}

pub fn encode_data(block: u16, data: &[u8]) -> BytesMut {
    let mut packet = BytesMut::with_capacity(4 + data.len());
    packet.put_u16(Opcode::Data as u16);
    packet.put_u16(block);
    packet.put(data);
    packet
}

pub fn encode_ack(block: u16) -> BytesMut {
    let mut packet = BytesMut::with_capacity(4);
    packet.put_u16(Opcode::Ack as u16);
    packet.put_u16(block);
    packet
}

pub fn encode_oack(options: &[(&str, String)]) -> BytesMut {
    let mut packet = BytesMut::new();
    packet.put_u16(Opcode::Oack as u16);
    for (name, value) in options {
        put_string(&mut packet, name);
        put_string(&mut packet, value);
    }
    packet
}

pub fn encode_error(code: u16, message: &str) -> BytesMut {
    let mut packet = BytesMut::new();
    packet.put_u16(Opcode::Error as u16);
    packet.put_u16(code);
    put_string(&mut packet, message);
    packet
}

pub fn parse_reply(buf: &[u8]) -> Result<Reply> {
    let mut bytes = Bytes::copy_from_slice(buf);
    if bytes.remaining() < 2 {
        return Err(TftpError::Tftp("Packet too small".into()));
    }

    match Opcode::try_from(bytes.get_u16())? {
        Opcode::Ack => {
            if bytes.remaining() < 2 {
                return Err(TftpError::Tftp("Truncated ACK".into()));
            }
            Ok(Reply::Ack(bytes.get_u16()))
        }
        Opcode::Oack => Ok(Reply::Oack(parse_options(&mut bytes)?)),
        Opcode::Error => {
            if bytes.remaining() < 2 {
                return Err(TftpError::Tftp("Truncated ERROR".into()));
            }
            let code = bytes.get_u16();
            let message = parse_string(&mut bytes).unwrap_or_default();
            Ok(Reply::Error { code, message })
        }
        other => Err(TftpError::Tftp(format!("Unexpected opcode: {:?}", other))),
    }
}

pub fn parse_request(buf: &[u8]) -> Result<Request> {
    let mut bytes = Bytes::copy_from_slice(buf);
    if bytes.remaining() < 2 {
        return Err(TftpError::Tftp("Packet too small".into()));
    }

    match Opcode::try_from(bytes.get_u16())? {
        Opcode::Wrq => {
            let filename = parse_string(&mut bytes)?;
            let mode = parse_string(&mut bytes)?;
            let options = parse_options(&mut bytes)?;
            Ok(Request::Wrq {
                filename,
                mode,
                options,
            })
        }
        Opcode::Data => {
            if bytes.remaining() < 2 {
                return Err(TftpError::Tftp("Truncated DATA".into()));
            }
            let block = bytes.get_u16();
            Ok(Request::Data { block, data: bytes })
        }
        other => Err(TftpError::Tftp(format!("Unexpected opcode: {:?}", other))),
    }
}

/// Option/value pairs, names lowercased (RFC 2347 option names are case-insensitive)
fn parse_options(bytes: &mut Bytes) -> Result<HashMap<String, String>> {
    let mut options = HashMap::new();
    while bytes.has_remaining() {
        let name = parse_string(bytes)?;
        let value = parse_string(bytes)?;
        options.insert(name.to_lowercase(), value);
    }
    Ok(options)
}

fn parse_string(bytes: &mut Bytes) -> Result<String> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| TftpError::Tftp("Unterminated string".into()))?;
    let s = String::from_utf8_lossy(&bytes[..end]).into_owned();
    bytes.advance(end + 1);
    Ok(s)
}

fn put_string(packet: &mut BytesMut, s: &str) {
    packet.put(s.as_bytes());
    packet.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrq_carries_options() {
        let packet = encode_wrq(
            "recovery.bin",
            &WriteOptions {
                block_size: 1468,
                timeout_secs: 5,
                transfer_size: 8_000_000,
            },
        );
        match parse_request(&packet).unwrap() {
            Request::Wrq {
                filename,
                mode,
                options,
            } => {
                assert_eq!(filename, "recovery.bin");
                assert_eq!(mode, "octet");
                assert_eq!(options["blksize"], "1468");
                assert_eq!(options["timeout"], "5");
                assert_eq!(options["tsize"], "8000000");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_block_size_is_not_negotiated() {
        let packet = encode_wrq(
            "fw",
            &WriteOptions {
                block_size: DEFAULT_BLOCK_SIZE,
                timeout_secs: 1,
                transfer_size: 1,
            },
        );
        match parse_request(&packet).unwrap() {
            Request::Wrq { options, .. } => assert!(!options.contains_key("blksize")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_replies() {
        assert_eq!(parse_reply(&encode_ack(7)).unwrap(), Reply::Ack(7));
        assert_eq!(
            parse_reply(&encode_error(2, "Access violation")).unwrap(),
            Reply::Error {
                code: 2,
                message: "Access violation".into()
            }
        );
        match parse_reply(&encode_oack(&[("BLKSIZE", "1024".to_string())])).unwrap() {
            Reply::Oack(options) => assert_eq!(options["blksize"], "1024"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_reply(&[0]).is_err());
        assert!(parse_reply(&[0, 9, 0, 0]).is_err());
        assert!(parse_reply(&[0, 4, 0]).is_err());
        assert!(parse_reply(&encode_data(1, b"x")).is_err());
    }

    #[test]
    fn data_roundtrip_keeps_payload() {
        match parse_request(&encode_data(65535, b"payload")).unwrap() {
            Request::Data { block, data } => {
                assert_eq!(block, 65535);
                assert_eq!(&data[..], b"payload");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
