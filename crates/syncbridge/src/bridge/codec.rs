//! Fixed-width text codec for mailbox payloads.
//!
//! Text travels as UTF-16 code units, two little-endian bytes each. The byte
//! count of an encoded message is always even and equals twice the number of
//! code units.
//!
//! Characters outside the Basic Multilingual Plane take two code units (a
//! surrogate pair). They round-trip losslessly, but count double against the
//! mailbox capacity.

/// Width of one code unit on the wire.
pub const CODE_UNIT_BYTES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("payload has odd byte length {0}, expected whole 2-byte code units")]
    OddLength(usize),

    #[error("payload is not valid UTF-16: {0}")]
    InvalidUtf16(String),
}

/// Encode text into little-endian UTF-16 bytes.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * CODE_UNIT_BYTES);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Number of bytes `encode_text` would produce, without allocating.
pub fn encoded_len(text: &str) -> usize {
    text.encode_utf16().count() * CODE_UNIT_BYTES
}

/// Decode little-endian UTF-16 bytes back into text.
///
/// Unpaired surrogates are rejected rather than replaced.
pub fn decode_text(bytes: &[u8]) -> Result<String, CodecError> {
    if bytes.len() % CODE_UNIT_BYTES != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(CODE_UNIT_BYTES)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| CodecError::InvalidUtf16(e.to_string()))
}
