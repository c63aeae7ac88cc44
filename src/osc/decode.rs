use std::fmt;

/// One typed OSC argument, in the order it appeared on the wire.
///
/// Covers the OSC 1.0 tags this receiver accepts: `i`, `f`, `s`, `b`,
/// `T`/`F`, `t`, `N`. Anything else is rejected during decoding.
#[derive(Clone, Debug, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    Bool(bool),
    /// Raw 64-bit OSC time tag (seconds in the high word, fraction low).
    Time(u64),
    Nil,
}

/// A decoded OSC message: address pattern plus arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscArg>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Address does not start with `/`, or its NUL terminator is missing.
    MalformedAddress,
    /// An argument (or the type tag string) needs more bytes than remain.
    TruncatedPayload,
    /// A type tag character outside the supported set. Bundles are reported
    /// here as `'#'` since `#bundle` payloads are deliberately unsupported.
    UnknownTypeTag(char),
    /// Padding bytes that are missing or non-NUL, a negative blob length,
    /// or bytes left over after the last argument.
    SizeAlignment,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::MalformedAddress => write!(f, "malformed address pattern"),
            DecodeErrorKind::TruncatedPayload => write!(f, "truncated payload"),
            DecodeErrorKind::UnknownTypeTag(tag) => write!(f, "unknown type tag {:?}", tag),
            DecodeErrorKind::SizeAlignment => write!(f, "size/alignment violation"),
        }
    }
}

/// A failed decode, keeping the raw datagram so callers can display or dump
/// the offending bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub data: Vec<u8>,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}-byte datagram", self.kind, self.data.len())
    }
}

impl std::error::Error for DecodeError {}

/// Decode one UDP datagram payload as an OSC 1.0 message.
///
/// OSC over UDP is message-atomic: one datagram is one message, so there is
/// no reassembly here. The function is pure and total: malformed input
/// always comes back as a `DecodeError` carrying the original bytes, never
/// a panic.
///
/// `#bundle` payloads are not supported; they are reported as
/// `UnknownTypeTag('#')` rather than mis-decoded as a message.
pub fn decode(data: &[u8]) -> Result<OscMessage, DecodeError> {
    decode_inner(data).map_err(|kind| DecodeError {
        kind,
        data: data.to_vec(),
    })
}

const BUNDLE_HEADER: &[u8] = b"#bundle\0";

fn decode_inner(data: &[u8]) -> Result<OscMessage, DecodeErrorKind> {
    if data.starts_with(BUNDLE_HEADER) {
        return Err(DecodeErrorKind::UnknownTypeTag('#'));
    }
    if data.first() != Some(&b'/') {
        return Err(DecodeErrorKind::MalformedAddress);
    }

    let mut cursor = Cursor::new(data);
    let addr = cursor.read_padded_str(DecodeErrorKind::MalformedAddress)?;

    if cursor.remaining() == 0 {
        return Err(DecodeErrorKind::TruncatedPayload);
    }
    let tags = cursor.read_padded_str(DecodeErrorKind::TruncatedPayload)?;
    let mut tag_chars = tags.chars();
    match tag_chars.next() {
        Some(',') => (),
        Some(other) => return Err(DecodeErrorKind::UnknownTypeTag(other)),
        // An empty tag string is a lone NUL, which is not a `,`.
        None => return Err(DecodeErrorKind::UnknownTypeTag('\0')),
    }

    let mut args = Vec::new();
    for tag in tag_chars {
        args.push(cursor.read_arg(tag)?);
    }

    // UDP preserves datagram length, so leftover bytes mean the tag string
    // and the payload disagree.
    if cursor.remaining() != 0 {
        return Err(DecodeErrorKind::SizeAlignment);
    }

    Ok(OscMessage { addr, args })
}

/// Byte-level reader over one datagram. All reads are bounds-checked and
/// report which decode rule was violated; nothing here panics.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeErrorKind> {
        if n > self.remaining() {
            return Err(DecodeErrorKind::TruncatedPayload);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, DecodeErrorKind> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, DecodeErrorKind> {
        let bytes = self.take(4)?;
        Ok(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeErrorKind> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a NUL-terminated string padded with NULs to a 4-byte boundary.
    ///
    /// `on_unterminated` is the error to report when no terminator exists
    /// before the buffer ends: a missing address terminator is a malformed
    /// address, a missing string-argument terminator is a truncation.
    /// Non-UTF-8 bytes are replaced rather than rejected; this is a
    /// monitoring receiver and a displayable string beats a dropped message.
    fn read_padded_str(
        &mut self,
        on_unterminated: DecodeErrorKind,
    ) -> Result<String, DecodeErrorKind> {
        let start = self.pos;
        let len = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(on_unterminated)?;
        let value = String::from_utf8_lossy(&self.buf[start..start + len]).into_owned();
        self.pos += len + 1;
        self.skip_padding(len + 1)?;
        Ok(value)
    }

    /// Consume the NUL padding that rounds `consumed` bytes up to a 4-byte
    /// boundary. Padding that runs past the buffer or is non-NUL is a
    /// size/alignment violation.
    fn skip_padding(&mut self, consumed: usize) -> Result<(), DecodeErrorKind> {
        let pad = (4 - consumed % 4) % 4;
        if pad > self.remaining() {
            return Err(DecodeErrorKind::SizeAlignment);
        }
        for _ in 0..pad {
            if self.buf[self.pos] != 0 {
                return Err(DecodeErrorKind::SizeAlignment);
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn read_blob(&mut self) -> Result<Vec<u8>, DecodeErrorKind> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(DecodeErrorKind::SizeAlignment);
        }
        let len = len as usize;
        let bytes = self.take(len)?.to_vec();
        self.skip_padding(len)?;
        Ok(bytes)
    }

    fn read_arg(&mut self, tag: char) -> Result<OscArg, DecodeErrorKind> {
        match tag {
            'i' => Ok(OscArg::Int(self.read_i32()?)),
            'f' => Ok(OscArg::Float(self.read_f32()?)),
            's' => Ok(OscArg::Str(
                self.read_padded_str(DecodeErrorKind::TruncatedPayload)?,
            )),
            'b' => Ok(OscArg::Blob(self.read_blob()?)),
            't' => Ok(OscArg::Time(self.read_u64()?)),
            'T' => Ok(OscArg::Bool(true)),
            'F' => Ok(OscArg::Bool(false)),
            'N' => Ok(OscArg::Nil),
            other => Err(DecodeErrorKind::UnknownTypeTag(other)),
        }
    }
}
