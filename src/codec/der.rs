// Sigvault — DER signature normalization
//
// Authenticators emit ECDSA signatures as DER `SEQUENCE { INTEGER r, INTEGER s }`.
// Verifiers downstream expect the fixed-width big-endian `r ‖ s` form. DER
// integers are minimal two's-complement, so a coordinate can arrive one byte
// long (0x00 sign guard when the high bit is set) or short (leading zero
// bytes dropped). Both are folded back to exactly `width` bytes here.

use super::CodecError;

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;

/// Coordinate width of P-256 (and any other 256-bit curve), in bytes.
pub const P256_COORDINATE_WIDTH: usize = 32;

/// Convert a DER-encoded ECDSA signature into fixed-width `r ‖ s` (`2 * width` bytes).
pub fn normalize_der_signature(der: &[u8], width: usize) -> Result<Vec<u8>, CodecError> {
    let mut outer = DerReader::new(der);
    let body = outer.read_element(SEQUENCE_TAG, CodecError::NotASequence)?;
    if !outer.is_empty() {
        return Err(CodecError::TrailingBytes(outer.remaining()));
    }

    let mut inner = DerReader::new(body);
    let mut integers: Vec<&[u8]> = Vec::with_capacity(2);
    while !inner.is_empty() {
        integers.push(inner.read_element(INTEGER_TAG, CodecError::NotAnInteger)?);
    }

    let [r, s] = integers.as_slice() else {
        return Err(CodecError::ElementCount(integers.len()));
    };

    let mut out = Vec::with_capacity(2 * width);
    out.extend_from_slice(&to_fixed_width(r, width, "r")?);
    out.extend_from_slice(&to_fixed_width(s, width, "s")?);
    Ok(out)
}

/// Strip the sign guard or left-pad so the integer is exactly `width` bytes.
fn to_fixed_width(
    value: &[u8],
    width: usize,
    component: &'static str,
) -> Result<Vec<u8>, CodecError> {
    let digits = match value {
        [0x00, rest @ ..] if value.len() == width + 1 => rest,
        _ => value,
    };

    if digits.is_empty() || digits.len() > width {
        return Err(CodecError::Width {
            component,
            len: value.len(),
            width,
        });
    }

    let mut fixed = vec![0u8; width - digits.len()];
    fixed.extend_from_slice(digits);
    Ok(fixed)
}

/// Cursor over a DER byte string that reads one tag-length-value at a time.
struct DerReader<'a> {
    input: &'a [u8],
}

impl<'a> DerReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    fn remaining(&self) -> usize {
        self.input.len()
    }

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let (&byte, rest) = self.input.split_first().ok_or(CodecError::Truncated)?;
        self.input = rest;
        Ok(byte)
    }

    /// Short form (< 0x80) or long form with one or two length octets.
    fn read_length(&mut self) -> Result<usize, CodecError> {
        match self.read_byte()? {
            len @ 0x00..=0x7f => Ok(len as usize),
            0x81 => Ok(self.read_byte()? as usize),
            0x82 => {
                let hi = self.read_byte()? as usize;
                let lo = self.read_byte()? as usize;
                Ok((hi << 8) | lo)
            }
            _ => Err(CodecError::BadLength),
        }
    }

    fn read_element(
        &mut self,
        expected_tag: u8,
        wrong_tag: fn(u8) -> CodecError,
    ) -> Result<&'a [u8], CodecError> {
        let tag = self.read_byte()?;
        if tag != expected_tag {
            return Err(wrong_tag(tag));
        }
        let len = self.read_length()?;
        if len > self.input.len() {
            return Err(CodecError::Truncated);
        }
        let (value, rest) = self.input.split_at(len);
        self.input = rest;
        Ok(value)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
