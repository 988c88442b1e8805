//! Fixed-size request header codec.
//!
//! Every request starts with a 1176-byte little-endian header, followed by
//! `data_len` raw payload bytes for commands that carry one:
//!
//! ```text
//! offset  size  field
//! ------  ----  -----------------------------------------------
//!      0     4  command     u32 (1 modify, 2 delete, 3 update, 4 info)
//!      4  1024  path        UTF-8, NUL-terminated, zero padded
//!   1028   128  token       UTF-8, NUL-terminated, zero padded
//!   1156     4  reserved    ignored on decode, zero on encode
//!   1160     8  data_len    u64
//!   1168     8  timestamp   i64, seconds since epoch
//! ```
//!
//! The reserved bytes keep `data_len` 8-byte aligned, matching the native
//! struct layout on 64-bit Linux.
//!
//! Decoding checks every field before any of it is used. Rejected:
//!
//! - unknown command values
//! - text fields without a terminator inside their slot
//! - non-UTF-8 text

use bytes::{Buf, BufMut, Bytes, BytesMut};
use secrecy::{ExposeSecret, SecretString};

use super::error::{ProtocolError, ProtocolResult};

/// Width of the path field, terminator included.
pub const PATH_FIELD_LEN: usize = 1024;

/// Width of the token field, terminator included.
pub const TOKEN_FIELD_LEN: usize = 128;

/// Padding between the token and `data_len`.
const RESERVED_LEN: usize = 4;

/// Total header size in bytes.
pub const HEADER_LEN: usize = 4 + PATH_FIELD_LEN + TOKEN_FIELD_LEN + RESERVED_LEN + 8 + 8;

const _: () = assert!(HEADER_LEN == 1176);
const _: () = assert!(TOKEN_FIELD_LEN == sealkeep_core::config::MAX_TOKEN_BYTES + 1);

/// Request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Replace the file contents.
    Modify = 1,
    /// Delete the file once retention allows it.
    Delete = 2,
    /// Merge the payload into the file in place.
    IncrementalUpdate = 3,
    /// Report size, times, checksum and retention status.
    GetInfo = 4,
}

impl Command {
    /// Wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns `true` if the command is followed by a payload.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        matches!(self, Self::Modify | Self::IncrementalUpdate)
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::IncrementalUpdate => "incremental_update",
            Self::GetInfo => "get_info",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Modify),
            2 => Ok(Self::Delete),
            3 => Ok(Self::IncrementalUpdate),
            4 => Ok(Self::GetInfo),
            _ => Err(ProtocolError::UnknownCommand { value }),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded request header.
#[derive(Debug)]
pub struct RequestHeader {
    /// Requested operation.
    pub command: Command,
    /// Path relative to the managed root, as sent by the client.
    pub path: String,
    /// Shared secret presented by the client.
    pub token: SecretString,
    /// Number of payload bytes following the header.
    pub data_len: u64,
    /// Client clock at request-build time, seconds since epoch.
    pub timestamp: i64,
}

impl RequestHeader {
    /// Creates a header.
    #[must_use]
    pub fn new(
        command: Command,
        path: impl Into<String>,
        token: SecretString,
        data_len: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            command,
            path: path.into(),
            token,
            data_len,
            timestamp,
        }
    }

    /// Encodes the header to its [`HEADER_LEN`]-byte wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHeader`] if the path or token does
    /// not fit its field or contains a NUL byte.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u32_le(self.command.as_u32());
        put_text(&mut buf, "path", &self.path, PATH_FIELD_LEN)?;
        put_text(
            &mut buf,
            "token",
            self.token.expose_secret(),
            TOKEN_FIELD_LEN,
        )?;
        buf.put_bytes(0, RESERVED_LEN);
        buf.put_u64_le(self.data_len);
        buf.put_i64_le(self.timestamp);

        debug_assert_eq!(buf.len(), HEADER_LEN);
        Ok(buf.freeze())
    }

    /// Decodes a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHeader`] for a wrong length or a bad
    /// text field, and [`ProtocolError::UnknownCommand`] for an unknown
    /// command value.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(ProtocolError::invalid_header(format!(
                "expected {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let command = Command::try_from(buf.get_u32_le())?;
        let path = take_text(&mut buf, "path", PATH_FIELD_LEN)?;
        let token = take_text(&mut buf, "token", TOKEN_FIELD_LEN)?;
        buf.advance(RESERVED_LEN);
        let data_len = buf.get_u64_le();
        let timestamp = buf.get_i64_le();

        Ok(Self {
            command,
            path,
            token: SecretString::from(token),
            data_len,
            timestamp,
        })
    }
}

fn put_text(buf: &mut BytesMut, field: &str, value: &str, width: usize) -> ProtocolResult<()> {
    if value.len() >= width {
        return Err(ProtocolError::invalid_header(format!(
            "{field} is {} bytes, limit is {}",
            value.len(),
            width - 1
        )));
    }
    if value.as_bytes().contains(&0) {
        return Err(ProtocolError::invalid_header(format!(
            "{field} contains a NUL byte"
        )));
    }
    buf.put_slice(value.as_bytes());
    buf.put_bytes(0, width - value.len());
    Ok(())
}

fn take_text(buf: &mut &[u8], field: &str, width: usize) -> ProtocolResult<String> {
    let slot = &buf[..width];
    let end = slot
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::invalid_header(format!("{field} is not NUL-terminated")))?;
    let text = std::str::from_utf8(&slot[..end])
        .map_err(|_| ProtocolError::invalid_header(format!("{field} is not valid UTF-8")))?
        .to_owned();
    buf.advance(width);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(command: Command, path: &str) -> RequestHeader {
        RequestHeader::new(
            command,
            path,
            SecretString::from("hunter2".to_string()),
            5,
            1_700_000_000,
        )
    }

    #[test]
    fn encoded_layout_is_fixed() {
        let bytes = header(Command::IncrementalUpdate, "a.txt").encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..9], b"a.txt");
        assert_eq!(bytes[9], 0);
        assert_eq!(&bytes[1028..1035], b"hunter2");
        assert_eq!(&bytes[1156..1160], &[0, 0, 0, 0]);
        assert_eq!(&bytes[1160..1168], &5u64.to_le_bytes());
        assert_eq!(&bytes[1168..1176], &1_700_000_000i64.to_le_bytes());
    }

    #[test]
    fn decode_reads_what_encode_wrote() {
        let bytes = header(Command::GetInfo, "dir/b.log").encode().unwrap();
        let decoded = RequestHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.command, Command::GetInfo);
        assert_eq!(decoded.path, "dir/b.log");
        assert_eq!(decoded.token.expose_secret(), "hunter2");
        assert_eq!(decoded.data_len, 5);
        assert_eq!(decoded.timestamp, 1_700_000_000);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = RequestHeader::decode(&[0u8; HEADER_LEN - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader { .. }));
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let mut bytes = header(Command::Modify, "a").encode().unwrap().to_vec();
        bytes[0..4].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            RequestHeader::decode(&bytes),
            Err(ProtocolError::UnknownCommand { value: 7 })
        ));

        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(RequestHeader::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_unterminated_path() {
        let mut bytes = header(Command::Modify, "a").encode().unwrap().to_vec();
        bytes[4..4 + PATH_FIELD_LEN].fill(b'x');
        let err = RequestHeader::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("path is not NUL-terminated"));
    }

    #[test]
    fn decode_rejects_unterminated_token() {
        let mut bytes = header(Command::Modify, "a").encode().unwrap().to_vec();
        bytes[1028..1028 + TOKEN_FIELD_LEN].fill(b'k');
        let err = RequestHeader::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut bytes = header(Command::Modify, "ab").encode().unwrap().to_vec();
        bytes[4] = 0xff;
        let err = RequestHeader::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn decode_ignores_bytes_after_terminator() {
        let mut bytes = header(Command::Modify, "a").encode().unwrap().to_vec();
        bytes[10] = b'z';
        assert_eq!(RequestHeader::decode(&bytes).unwrap().path, "a");
    }

    #[test]
    fn encode_rejects_oversized_fields() {
        let long_path = "p".repeat(PATH_FIELD_LEN);
        assert!(header(Command::Modify, &long_path).encode().is_err());

        let max_path = "p".repeat(PATH_FIELD_LEN - 1);
        assert!(header(Command::Modify, &max_path).encode().is_ok());

        let long_token = RequestHeader::new(
            Command::Delete,
            "a",
            SecretString::from("t".repeat(TOKEN_FIELD_LEN)),
            0,
            0,
        );
        assert!(long_token.encode().is_err());
    }

    #[test]
    fn encode_rejects_embedded_nul() {
        assert!(header(Command::Modify, "a\0b").encode().is_err());
    }

    #[test]
    fn payload_commands() {
        assert!(Command::Modify.carries_payload());
        assert!(Command::IncrementalUpdate.carries_payload());
        assert!(!Command::Delete.carries_payload());
        assert!(!Command::GetInfo.carries_payload());
    }

    #[test]
    fn debug_output_redacts_token() {
        let debug = format!("{:?}", header(Command::Modify, "a"));
        assert!(!debug.contains("hunter2"));
    }
}
