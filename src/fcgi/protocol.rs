//! FastCGI record definitions.
//!
//! Types and constants from section 8 of the FastCGI specification, limited
//! to what a non-multiplexing responder needs.

use super::ProtocolError;
use crate::constants::{FCGI_HEADER_LEN, FCGI_MAX_CONTENT_LEN};

/// Value for the version component of a record header.
pub const VERSION_1: u8 = 1;

/// Request id reserved for management records.
pub const NULL_REQUEST_ID: u16 = 0;

/// Mask for the flags component of a BEGIN_REQUEST body.
pub const KEEP_CONN: u8 = 1;

/// Roles carried by BEGIN_REQUEST.
pub const RESPONDER: u16 = 1;
pub const AUTHORIZER: u16 = 2;

/// Variable names for GET_VALUES / GET_VALUES_RESULT.
pub const MAX_CONNS: &str = "FCGI_MAX_CONNS";
pub const MAX_REQS: &str = "FCGI_MAX_REQS";
pub const MPXS_CONNS: &str = "FCGI_MPXS_CONNS";

/// Record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    /// Decode a record type byte. Returns `None` for values outside 1..=11.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            _ => return None,
        })
    }
}

/// Values for the protocol status component of END_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

/// Number of padding bytes that align `len` to 8.
pub const fn padding_for(len: usize) -> u8 {
    ((8 - (len & 7)) & 7) as u8
}

/// A record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Raw record type; unknown types are kept so they can be reported back.
    pub rtype: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    pub const LEN: usize = FCGI_HEADER_LEN;

    /// Header for an outgoing record, padded to a multiple of 8.
    ///
    /// # Panics
    ///
    /// Panics if `content_length` exceeds a single record's capacity.
    pub fn new(rtype: RecordType, request_id: u16, content_length: usize) -> Self {
        assert!(content_length <= FCGI_MAX_CONTENT_LEN, "record content too long");
        Self {
            rtype: rtype as u8,
            request_id,
            content_length: content_length as u16,
            padding_length: padding_for(content_length),
        }
    }

    /// Parse a header, rejecting unsupported versions.
    pub fn from_bytes(bytes: &[u8; FCGI_HEADER_LEN]) -> Result<Self, ProtocolError> {
        if bytes[0] != VERSION_1 {
            return Err(ProtocolError::UnsupportedVersion(bytes[0]));
        }
        Ok(Self {
            rtype: bytes[1],
            request_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            content_length: u16::from_be_bytes([bytes[4], bytes[5]]),
            padding_length: bytes[6],
        })
    }

    pub fn to_bytes(self) -> [u8; FCGI_HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [
            VERSION_1,
            self.rtype,
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_length,
            0,
        ]
    }

    pub fn record_type(self) -> Option<RecordType> {
        RecordType::from_u8(self.rtype)
    }
}

/// Parsed BEGIN_REQUEST body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    pub request_id: u16,
    pub role: u16,
    pub flags: u8,
}

impl BeginRequest {
    pub fn parse(request_id: u16, content: &[u8]) -> Result<Self, ProtocolError> {
        if content.len() < 3 {
            return Err(ProtocolError::Truncated("BEGIN_REQUEST body"));
        }
        Ok(Self {
            request_id,
            role: u16::from_be_bytes([content[0], content[1]]),
            flags: content[2],
        })
    }

    /// Whether the client asked to keep the connection open.
    pub const fn keep_conn(&self) -> bool {
        self.flags & KEEP_CONN != 0
    }
}

/// Body of an END_REQUEST record.
pub fn end_request_body(app_status: u32, status: ProtocolStatus) -> [u8; 8] {
    let s = app_status.to_be_bytes();
    [s[0], s[1], s[2], s[3], status as u8, 0, 0, 0]
}

/// Body of an UNKNOWN_TYPE record.
pub const fn unknown_type_body(rtype: u8) -> [u8; 8] {
    [rtype, 0, 0, 0, 0, 0, 0, 0]
}

/// Name-value pair encoding used by PARAMS and GET_VALUES.
pub mod nv {
    use super::ProtocolError;

    /// Largest length representable by the 4-byte form.
    const MAX_LEN: usize = 0x7fff_ffff;

    /// Append the encoded length.
    pub fn write_length(out: &mut Vec<u8>, len: usize) -> Result<(), ProtocolError> {
        if len > MAX_LEN {
            return Err(ProtocolError::TooLarge {
                what: "name-value length",
                limit: MAX_LEN,
            });
        }
        if len < 128 {
            out.push(len as u8);
        } else {
            let b = (len as u32 | 0x8000_0000).to_be_bytes();
            out.extend_from_slice(&b);
        }
        Ok(())
    }

    /// Append one encoded pair.
    pub fn write_pair(out: &mut Vec<u8>, name: &[u8], value: &[u8]) -> Result<(), ProtocolError> {
        write_length(out, name.len())?;
        write_length(out, value.len())?;
        out.extend_from_slice(name);
        out.extend_from_slice(value);
        Ok(())
    }

    fn read_length(input: &[u8], pos: &mut usize) -> Result<usize, ProtocolError> {
        let first = *input
            .get(*pos)
            .ok_or(ProtocolError::Truncated("name-value length"))?;
        if first & 0x80 == 0 {
            *pos += 1;
            return Ok(usize::from(first));
        }
        let bytes = input
            .get(*pos..*pos + 4)
            .ok_or(ProtocolError::Truncated("name-value length"))?;
        *pos += 4;
        let len = u32::from_be_bytes([bytes[0] & 0x7f, bytes[1], bytes[2], bytes[3]]);
        Ok(len as usize)
    }

    /// Decode every pair in `input`. Invalid UTF-8 is replaced, not rejected.
    pub fn parse_pairs(input: &[u8]) -> Result<Vec<(String, String)>, ProtocolError> {
        let mut pairs = Vec::new();
        let mut pos = 0;
        while pos < input.len() {
            let name_len = read_length(input, &mut pos)?;
            let value_len = read_length(input, &mut pos)?;
            let end = pos
                .checked_add(name_len)
                .and_then(|n| n.checked_add(value_len))
                .filter(|&end| end <= input.len())
                .ok_or(ProtocolError::Truncated("name-value pair"))?;
            let name = String::from_utf8_lossy(&input[pos..pos + name_len]).into_owned();
            let value = String::from_utf8_lossy(&input[pos + name_len..end]).into_owned();
            pairs.push((name, value));
            pos = end;
        }
        Ok(pairs)
    }
}
