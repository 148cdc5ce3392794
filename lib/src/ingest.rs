//! Ingest protocol serialization/deserialization.
//!
//! Applications hand the daemon log messages as single datagrams carrying
//! a [`LogRecord`]: a fixed 14-octet identity prefix followed by the
//! message payload. Identity fields are 4-octet ASCII tags, left
//! justified and right-padded with `0x00`.

use deku::prelude::*;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::frame::TypeInfo;

/// Fixed prefix of every ingest datagram: three 4-octet ids, the log
/// level, and the payload type.
pub const RECORD_PREFIX_LEN: usize = 14;

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM_LEN: usize = 4096;

/// Severity carried in the ingest record.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum LogLevel {
    Info = 1,
    Verbose = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("Datagram too short for a log record: {0} octets")]
    TooShort(usize),
    #[error("Failed to parse log record: {0}")]
    ParsingError(#[from] DekuError),
}

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
pub struct LogRecord {
    pub app_id: [u8; 4],
    pub ctx_id: [u8; 4],
    pub session_id: [u8; 4],
    pub log_level: u8,
    pub type_info: u8,
    #[deku(read_all)]
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn new(
        level: LogLevel,
        app_id: &str,
        ctx_id: &str,
        session_id: [u8; 4],
        payload: Vec<u8>,
    ) -> Self {
        LogRecord {
            app_id: pad_id(app_id),
            ctx_id: pad_id(ctx_id),
            session_id,
            log_level: level as u8,
            type_info: TypeInfo::Strg as u8,
            payload,
        }
    }

    /// Parse one received datagram. Anything shorter than the fixed
    /// prefix is malformed.
    pub fn parse(data: &[u8]) -> Result<Self, IngestError> {
        if data.len() < RECORD_PREFIX_LEN {
            return Err(IngestError::TooShort(data.len()));
        }
        let ((rest, _), record) = LogRecord::from_bytes((data, 0))?;
        debug_assert!(rest.is_empty());
        Ok(record)
    }

    pub fn level(&self) -> Option<LogLevel> {
        LogLevel::try_from(self.log_level).ok()
    }

    pub fn type_info(&self) -> Option<TypeInfo> {
        TypeInfo::try_from(self.type_info).ok()
    }
}

/// Left-justify an identifier into 4 octets, truncating long ones and
/// zero-padding short ones.
pub fn pad_id(id: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (dst, src) in out.iter_mut().zip(id.bytes()) {
        *dst = src;
    }
    out
}
