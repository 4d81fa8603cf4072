//! Null-terminated framing for the msgr control and push channels.
//!
//! Wire format: each string or number field is its bytes followed by a single
//! `0x00`; a status is one raw byte. There are no length prefixes, so a value
//! can never contain the terminator.

use crate::error::{MsgrError, MsgrResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Field terminator.
pub const TERMINATOR: u8 = 0x00;

/// Longest field payload accepted on either side, terminator excluded.
pub const MAX_FIELD_LEN: usize = 255;

/// Append `s` and its terminator to `buf`.
///
/// Rejects strings holding the terminator byte or exceeding [`MAX_FIELD_LEN`]
/// instead of emitting a frame the peer would split differently.
pub fn encode_string(buf: &mut Vec<u8>, s: &str) -> MsgrResult<()> {
    if s.as_bytes().contains(&TERMINATOR) {
        return Err(MsgrError::Framing("string contains NUL byte".into()));
    }
    if s.len() > MAX_FIELD_LEN {
        return Err(MsgrError::Framing(format!(
            "string of {} bytes exceeds {MAX_FIELD_LEN}",
            s.len()
        )));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(TERMINATOR);
    Ok(())
}

/// Append the decimal form of `n` and its terminator to `buf`.
pub fn encode_number(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.push(TERMINATOR);
}

/// Parse an unterminated decimal field.
pub fn parse_number(field: &[u8]) -> MsgrResult<u64> {
    if field.is_empty() {
        return Err(MsgrError::Framing("empty number field".into()));
    }
    if let Some(bad) = field.iter().find(|b| !b.is_ascii_digit()) {
        return Err(MsgrError::Framing(format!(
            "non-digit byte 0x{bad:02x} in number field"
        )));
    }
    // Digits only, so this is valid UTF-8 and the only parse failure is overflow.
    let digits = std::str::from_utf8(field).map_err(|e| MsgrError::Framing(e.to_string()))?;
    digits
        .parse::<u64>()
        .map_err(|_| MsgrError::Framing(format!("number out of range: {digits}")))
}

/// Builds one frame in memory so it can be written with a single `write_all`.
#[derive(Debug, Default, Clone)]
pub struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn string(mut self, s: &str) -> MsgrResult<Self> {
        encode_string(&mut self.buf, s)?;
        Ok(self)
    }

    pub fn number(mut self, n: u64) -> Self {
        encode_number(&mut self.buf, n);
        self
    }

    pub fn status(mut self, code: u8) -> Self {
        self.buf.push(code);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Read one raw field up to (and consuming) its terminator.
///
/// Fails with [`MsgrError::Framing`] if the peer closes before the terminator
/// or sends more than [`MAX_FIELD_LEN`] bytes without one.
pub async fn read_field<R: AsyncBufRead + Unpin>(reader: &mut R) -> MsgrResult<Vec<u8>> {
    let limit = (MAX_FIELD_LEN + 1) as u64;
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(limit)
        .read_until(TERMINATOR, &mut buf)
        .await
        .map_err(|e| MsgrError::Transport(format!("read failed: {e}")))?;

    match buf.last() {
        Some(&TERMINATOR) => {
            buf.pop();
            Ok(buf)
        }
        _ if n as u64 == limit => Err(MsgrError::Framing(format!(
            "field exceeds {MAX_FIELD_LEN} bytes"
        ))),
        _ => Err(MsgrError::Framing("connection closed before terminator".into())),
    }
}

pub async fn read_string<R: AsyncBufRead + Unpin>(reader: &mut R) -> MsgrResult<String> {
    let field = read_field(reader).await?;
    String::from_utf8(field).map_err(|e| MsgrError::Framing(format!("invalid UTF-8: {e}")))
}

pub async fn read_number<R: AsyncBufRead + Unpin>(reader: &mut R) -> MsgrResult<u64> {
    let field = read_field(reader).await?;
    parse_number(&field)
}

pub async fn read_status<R: AsyncBufRead + Unpin>(reader: &mut R) -> MsgrResult<u8> {
    match reader.read_u8().await {
        Ok(code) => Ok(code),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(MsgrError::Framing("connection closed before status byte".into()))
        }
        Err(e) => Err(MsgrError::Transport(format!("read failed: {e}"))),
    }
}

async fn write_bytes<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> MsgrResult<()> {
    writer
        .write_all(bytes)
        .await
        .map_err(|e| MsgrError::Transport(format!("write failed: {e}")))
}

pub async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, s: &str) -> MsgrResult<()> {
    let mut buf = Vec::with_capacity(s.len() + 1);
    encode_string(&mut buf, s)?;
    write_bytes(writer, &buf).await
}

pub async fn write_number<W: AsyncWrite + Unpin>(writer: &mut W, n: u64) -> MsgrResult<()> {
    let mut buf = Vec::with_capacity(21);
    encode_number(&mut buf, n);
    write_bytes(writer, &buf).await
}

pub async fn write_status<W: AsyncWrite + Unpin>(writer: &mut W, code: u8) -> MsgrResult<()> {
    write_bytes(writer, &[code]).await
}

/// Write a prebuilt frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> MsgrResult<()> {
    write_bytes(writer, frame).await?;
    writer
        .flush()
        .await
        .map_err(|e| MsgrError::Transport(format!("flush failed: {e}")))
}
