//! DLT frame serialization/deserialization.
//!
//! The frame layout follows the AUTOSAR DLT protocol specification
//! (PRS_Dlt): a standard header with conditional fields, an optional
//! extended header, and a verbose-mode typed argument block. Multi-byte
//! header fields are big-endian; the one documented exception is the
//! typed argument's string length, see [`FrameHeader::encode`].

use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Standard header `header_type` flag bits.
pub const HTYPE_USE_EXT_HEADER: u8 = 0x01;
pub const HTYPE_MSB_FIRST: u8 = 0x02;
pub const HTYPE_WITH_ECU_ID: u8 = 0x04;
pub const HTYPE_WITH_SESSION_ID: u8 = 0x08;
pub const HTYPE_WITH_TIMESTAMP: u8 = 0x10;

/// Extended header `message_info` verbose bit.
pub const MSG_INFO_VERBOSE: u8 = 0x01;

const STD_HDR_FIXED_LEN: usize = 4;
const STD_HDR_ECU_ID_LEN: usize = 4;
const STD_HDR_SESSION_ID_LEN: usize = 4;
const STD_HDR_TIMESTAMP_LEN: usize = 4;
const EXT_HDR_LEN: usize = 10;
const TYPE_INFO_LEN: usize = 4;
const STRING_LEN_FIELD_LEN: usize = 2;

/// Type-info tag with the string-value bit set, as it appears on the wire.
const TYPE_INFO_STRING_BIT: u32 = 0x0002_0000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("Output buffer too small (need {need}, have {have})")]
    BufferTooSmall { need: usize, have: usize },
    #[error("Unsupported type-info value: {0}")]
    UnsupportedType(u8),
    #[error("Payload too large for a single frame: {0} octets")]
    PayloadTooLarge(usize),
    #[error("Frame truncated ({0} octets)")]
    Truncated(usize),
    #[error("Header length {header} does not match frame length {actual}")]
    LengthMismatch { header: usize, actual: usize },
    #[error("Reserved type-info bits: {0:#010x}")]
    ReservedTypeInfo(u32),
    #[error("String length {string_len} does not match the {remaining} remaining octets")]
    StringLengthMismatch { string_len: usize, remaining: usize },
    #[error("Missing 0x00 string terminator")]
    MissingTerminator,
}

/// Payload argument types of the DLT verbose mode. Only `Strg` is encoded
/// today; the remaining values are reserved on the ingest wire.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum TypeInfo {
    Bool = 1,
    Sint = 2,
    Uint = 3,
    Floa = 4,
    Aray = 5,
    Strg = 6,
    Rawd = 7,
    Vari = 8,
    Fixp = 9,
    Trai = 10,
    Stru = 11,
}

/// Extended header message-type class (MSTP, bits 1..3 of `message_info`).
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum MessageType {
    Log = 0,
    AppTrace = 1,
    NwTrace = 2,
    Control = 3,
}

/// MTIN subcodes for the `Log` class.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum LogInfo {
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Verbose = 6,
}

/// MTIN subcodes for the `AppTrace` class.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum TraceInfo {
    Variable = 1,
    FunctionIn = 2,
    FunctionOut = 3,
    State = 4,
    Vfb = 5,
}

/// MTIN subcodes for the `NwTrace` class.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum NetworkInfo {
    Ipc = 0,
    Can = 1,
    Flexray = 2,
    Most = 3,
    Ethernet = 4,
    Someip = 5,
}

/// MTIN subcodes for the `Control` class.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum ControlInfo {
    Request = 0,
    Response = 1,
}

/// The always-present prefix of a DLT frame. The `length` field is not
/// stored here; it is computed from the flag bits and payload size at
/// encode time.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StandardHeader {
    pub header_type: u8,
    pub msg_counter: u8,
    pub ecu_id: [u8; 4],
    pub session_id: [u8; 4],
    /// Units of 0.1 ms.
    pub timestamp: u32,
}

impl StandardHeader {
    pub fn set_use_ext_hdr(&mut self) {
        self.header_type |= HTYPE_USE_EXT_HEADER;
    }

    pub fn set_msb_first(&mut self) {
        self.header_type |= HTYPE_MSB_FIRST;
    }

    /// Store the ECU id and mark it present in `header_type`.
    pub fn set_ecu_id(&mut self, ecu_id: [u8; 4]) {
        self.header_type |= HTYPE_WITH_ECU_ID;
        self.ecu_id = ecu_id;
    }

    /// Store the session id and mark it present in `header_type`.
    pub fn set_session_id(&mut self, session_id: [u8; 4]) {
        self.header_type |= HTYPE_WITH_SESSION_ID;
        self.session_id = session_id;
    }

    /// Store the timestamp (0.1 ms units) and mark it present.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.header_type |= HTYPE_WITH_TIMESTAMP;
        self.timestamp = timestamp;
    }

    /// Version occupies bits 5..7; shifted to keep clear of the flag bits.
    pub fn set_version(&mut self, version: u8) {
        self.header_type |= (version & 0x07) << 5;
    }

    pub fn version(&self) -> u8 {
        self.header_type >> 5
    }

    pub fn has_ext_hdr(&self) -> bool {
        self.header_type & HTYPE_USE_EXT_HEADER != 0
    }

    pub fn is_msb_first(&self) -> bool {
        self.header_type & HTYPE_MSB_FIRST != 0
    }

    pub fn has_ecu_id(&self) -> bool {
        self.header_type & HTYPE_WITH_ECU_ID != 0
    }

    pub fn has_session_id(&self) -> bool {
        self.header_type & HTYPE_WITH_SESSION_ID != 0
    }

    pub fn has_timestamp(&self) -> bool {
        self.header_type & HTYPE_WITH_TIMESTAMP != 0
    }
}

/// Extended header, emitted iff `HTYPE_USE_EXT_HEADER` is set. The
/// number-of-args field is derived at encode time (1 when verbose, else 0).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtendedHeader {
    pub message_info: u8,
    pub app_id: [u8; 4],
    pub context_id: [u8; 4],
}

impl ExtendedHeader {
    pub fn set_verbose(&mut self) {
        self.message_info |= MSG_INFO_VERBOSE;
    }

    pub fn is_verbose(&self) -> bool {
        self.message_info & MSG_INFO_VERBOSE != 0
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_info |= (message_type as u8) << 1;
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from((self.message_info >> 1) & 0x07).ok()
    }

    pub fn set_log_info(&mut self, info: LogInfo) {
        self.message_info |= (info as u8) << 4;
    }

    pub fn set_trace_info(&mut self, info: TraceInfo) {
        self.message_info |= (info as u8) << 4;
    }

    pub fn set_network_info(&mut self, info: NetworkInfo) {
        self.message_info |= (info as u8) << 4;
    }

    pub fn set_control_info(&mut self, info: ControlInfo) {
        self.message_info |= (info as u8) << 4;
    }

    /// MTIN subcode, valid only for the `Log` class.
    pub fn log_info(&self) -> Option<LogInfo> {
        match self.message_type()? {
            MessageType::Log => LogInfo::try_from(self.message_info >> 4).ok(),
            _ => None,
        }
    }

    pub fn trace_info(&self) -> Option<TraceInfo> {
        match self.message_type()? {
            MessageType::AppTrace => TraceInfo::try_from(self.message_info >> 4).ok(),
            _ => None,
        }
    }

    pub fn network_info(&self) -> Option<NetworkInfo> {
        match self.message_type()? {
            MessageType::NwTrace => NetworkInfo::try_from(self.message_info >> 4).ok(),
            _ => None,
        }
    }

    pub fn control_info(&self) -> Option<ControlInfo> {
        match self.message_type()? {
            MessageType::Control => ControlInfo::try_from(self.message_info >> 4).ok(),
            _ => None,
        }
    }
}

/// Everything needed to encode one frame around a payload: the standard
/// header, the extended header (emitted only when the UEH flag is set),
/// and the payload argument type.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub standard: StandardHeader,
    pub extended: ExtendedHeader,
    pub type_info: TypeInfo,
}

impl FrameHeader {
    pub fn new(type_info: TypeInfo) -> Self {
        FrameHeader {
            standard: StandardHeader::default(),
            extended: ExtendedHeader::default(),
            type_info,
        }
    }

    /// Total encoded size in octets of a frame with this header around a
    /// `payload_len`-octet payload. This is the value the `length` field
    /// carries; [`FrameHeader::encode`] writes exactly this many octets.
    pub fn encoded_len(&self, payload_len: usize) -> Result<usize, FrameError> {
        match self.type_info {
            TypeInfo::Strg => {}
            other => return Err(FrameError::UnsupportedType(other as u8)),
        }
        let mut len = STD_HDR_FIXED_LEN;
        if self.standard.has_ecu_id() {
            len += STD_HDR_ECU_ID_LEN;
        }
        if self.standard.has_session_id() {
            len += STD_HDR_SESSION_ID_LEN;
        }
        if self.standard.has_timestamp() {
            len += STD_HDR_TIMESTAMP_LEN;
        }
        if self.standard.has_ext_hdr() {
            len += EXT_HDR_LEN;
        }
        // type-info tag, string length, payload, terminator
        len += TYPE_INFO_LEN + STRING_LEN_FIELD_LEN + payload_len + 1;
        if len > usize::from(u16::MAX) {
            return Err(FrameError::PayloadTooLarge(payload_len));
        }
        Ok(len)
    }

    /// Encode the frame into `buf`, returning the number of octets
    /// written. Conditional fields are emitted per the `header_type`
    /// flags, as-is; the encoder does not second-guess flag/field
    /// combinations. Nothing is written when the buffer is too small.
    pub fn encode(&self, payload: &[u8], buf: &mut [u8]) -> Result<usize, FrameError> {
        let total = self.encoded_len(payload.len())?;
        if buf.len() < total {
            return Err(FrameError::BufferTooSmall {
                need: total,
                have: buf.len(),
            });
        }
        buf[..total].fill(0);

        let mut off = 0;
        buf[off] = self.standard.header_type;
        off += 1;
        buf[off] = self.standard.msg_counter;
        off += 1;
        buf[off..off + 2].copy_from_slice(&(total as u16).to_be_bytes());
        off += 2;

        if self.standard.has_ecu_id() {
            buf[off..off + 4].copy_from_slice(&self.standard.ecu_id);
            off += 4;
        }
        if self.standard.has_session_id() {
            buf[off..off + 4].copy_from_slice(&self.standard.session_id);
            off += 4;
        }
        if self.standard.has_timestamp() {
            buf[off..off + 4].copy_from_slice(&self.standard.timestamp.to_be_bytes());
            off += 4;
        }

        if self.standard.has_ext_hdr() {
            buf[off] = self.extended.message_info;
            off += 1;
            buf[off] = if self.extended.is_verbose() { 1 } else { 0 };
            off += 1;
            buf[off..off + 4].copy_from_slice(&self.extended.app_id);
            off += 4;
            buf[off..off + 4].copy_from_slice(&self.extended.context_id);
            off += 4;
        }

        buf[off..off + 4].copy_from_slice(&TYPE_INFO_STRING_BIT.to_be_bytes());
        off += 4;

        // The string length counts the terminator and stays in native byte
        // order while every other multi-byte field is big-endian. The
        // deployed storage decoder expects it this way; do not byte-swap.
        let string_len = payload.len() as u16 + 1;
        buf[off..off + 2].copy_from_slice(&string_len.to_ne_bytes());
        off += 2;

        buf[off..off + payload.len()].copy_from_slice(payload);
        off += payload.len();
        buf[off] = 0;
        off += 1;

        debug_assert_eq!(off, total);
        Ok(off)
    }
}

/// A decoded frame, as produced by [`Frame::parse`]. The payload excludes
/// the terminator octet.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub number_of_args: u8,
    pub payload: Vec<u8>,
}

fn read_4(buf: &[u8], off: &mut usize) -> Result<[u8; 4], FrameError> {
    let end = *off + 4;
    let bytes = buf
        .get(*off..end)
        .and_then(|s| <[u8; 4]>::try_from(s).ok())
        .ok_or(FrameError::Truncated(buf.len()))?;
    *off = end;
    Ok(bytes)
}

impl Frame {
    /// Decode a single frame occupying the whole of `buf`. The header
    /// `length` field must match `buf.len()` exactly.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < STD_HDR_FIXED_LEN {
            return Err(FrameError::Truncated(buf.len()));
        }
        let mut standard = StandardHeader {
            header_type: buf[0],
            msg_counter: buf[1],
            ..Default::default()
        };
        let length = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if length != buf.len() {
            return Err(FrameError::LengthMismatch {
                header: length,
                actual: buf.len(),
            });
        }

        let mut off = STD_HDR_FIXED_LEN;
        if standard.has_ecu_id() {
            standard.ecu_id = read_4(buf, &mut off)?;
        }
        if standard.has_session_id() {
            standard.session_id = read_4(buf, &mut off)?;
        }
        if standard.has_timestamp() {
            standard.timestamp = u32::from_be_bytes(read_4(buf, &mut off)?);
        }

        let mut extended = ExtendedHeader::default();
        let mut number_of_args = 0;
        if standard.has_ext_hdr() {
            if buf.len() < off + 2 {
                return Err(FrameError::Truncated(buf.len()));
            }
            extended.message_info = buf[off];
            number_of_args = buf[off + 1];
            off += 2;
            extended.app_id = read_4(buf, &mut off)?;
            extended.context_id = read_4(buf, &mut off)?;
        }

        if buf.len() < off + TYPE_INFO_LEN + STRING_LEN_FIELD_LEN {
            return Err(FrameError::Truncated(buf.len()));
        }
        let type_info_bits = u32::from_be_bytes(read_4(buf, &mut off)?);
        if type_info_bits != TYPE_INFO_STRING_BIT {
            return Err(FrameError::ReservedTypeInfo(type_info_bits));
        }
        let string_len = usize::from(u16::from_ne_bytes([buf[off], buf[off + 1]]));
        off += 2;
        let remaining = buf.len() - off;
        if string_len == 0 || string_len != remaining {
            return Err(FrameError::StringLengthMismatch {
                string_len,
                remaining,
            });
        }
        if buf[buf.len() - 1] != 0 {
            return Err(FrameError::MissingTerminator);
        }

        Ok(Frame {
            header: FrameHeader {
                standard,
                extended,
                type_info: TypeInfo::Strg,
            },
            number_of_args,
            payload: buf[off..buf.len() - 1].to_vec(),
        })
    }
}
