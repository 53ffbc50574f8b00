//! Decoding of the fixed-width textual numbers stored in archive headers.

/// An error that occurs when a numeric header field cannot be decoded.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum NumericFieldError {
    /// The field contains a byte that is not a digit in the requested radix.
    #[error("invalid digit {byte:#04x} at position {position}")]
    InvalidDigit {
        /// The offending byte.
        byte: u8,
        /// The offset of the byte within the field.
        position: usize,
    },

    /// The decoded value lies outside of the accepted bounds, or does not fit in an `i64`.
    #[error("value is out of range")]
    OutOfRange,

    /// The radix is not supported.
    #[error("unsupported radix {0}")]
    InvalidRadix(u32),
}

/// Parses `field` as an integer in the given `radix` and returns it if it lies within the
/// inclusive range `[lo, hi]`.
///
/// Leading spaces are skipped and a single `+` or `-` sign is accepted. Digits are consumed until
/// the end of the field or until a nul or space terminator; after a terminator only nul and space
/// bytes may follow. A field without any digits decodes to zero. Nothing outside of `field` is
/// ever read, so the field does not have to contain a terminator.
pub fn parse_numeric(field: &[u8], radix: u32, lo: i64, hi: i64) -> Result<i64, NumericFieldError> {
    if !(2..=36).contains(&radix) {
        return Err(NumericFieldError::InvalidRadix(radix));
    }

    let mut position = field.iter().take_while(|&&b| b == b' ').count();
    let negative = match field.get(position) {
        Some(b'-') => {
            position += 1;
            true
        }
        Some(b'+') => {
            position += 1;
            false
        }
        _ => false,
    };

    let mut magnitude: i64 = 0;
    while let Some(&byte) = field.get(position) {
        if is_terminator(byte) {
            break;
        }
        let digit = char::from(byte)
            .to_digit(radix)
            .ok_or(NumericFieldError::InvalidDigit { byte, position })?;
        magnitude = magnitude
            .checked_mul(i64::from(radix))
            .and_then(|value| value.checked_add(i64::from(digit)))
            .ok_or(NumericFieldError::OutOfRange)?;
        position += 1;
    }

    // Anything after the terminator must be padding.
    if let Some(offset) = field[position..].iter().position(|&b| !is_terminator(b)) {
        return Err(NumericFieldError::InvalidDigit {
            byte: field[position + offset],
            position: position + offset,
        });
    }

    let value = if negative { -magnitude } else { magnitude };
    if value < lo || value > hi {
        return Err(NumericFieldError::OutOfRange);
    }
    Ok(value)
}

/// Parses an octal archive field into a value in the range `[0, i64::MAX]`.
pub fn parse_octal(field: &[u8]) -> Result<u64, NumericFieldError> {
    let value = parse_numeric(field, 8, 0, i64::MAX)?;
    u64::try_from(value).map_err(|_| NumericFieldError::OutOfRange)
}

fn is_terminator(byte: u8) -> bool {
    byte == 0 || byte == b' '
}
