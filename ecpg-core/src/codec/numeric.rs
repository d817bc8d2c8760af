//! Arbitrary precision numeric values.
//!
//! Host `numeric` and `decimal` cells hold a serialized [`Decimal`]. The digit-array form
//! ([`NumericParts`]) is only used by the SQLDA builder, whose binary layout exposes it.

use std::str::FromStr;

use atoi::FromRadix10SignedChecked;
use rust_decimal::Decimal;

pub const CELL_SIZE: usize = 16;

pub const SIGN_POS: i32 = 0x0000;
pub const SIGN_NEG: i32 = 0x4000;
pub const SIGN_NAN: i32 = 0xC000;

/// A numeric value split into base-10 digits.
///
/// `buf` begins with one spare zero digit plus any leading zeros that were stripped from the
/// input; the significant digits start at `digits_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericParts {
    pub ndigits: i32,
    pub weight: i32,
    pub rscale: i32,
    pub dscale: i32,
    pub sign: i32,
    pub buf: Vec<u8>,
    pub digits_offset: usize,
}

impl NumericParts {
    /// Parses a complete numeric literal. Surrounding white space is allowed.
    pub fn parse(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        if bytes.len() - pos >= 3 && bytes[pos..pos + 3].eq_ignore_ascii_case(b"nan") {
            return rest_is_blank(&bytes[pos + 3..]).then(|| NumericParts {
                ndigits: 0,
                weight: 0,
                rscale: 0,
                dscale: 0,
                sign: SIGN_NAN,
                buf: vec![0],
                digits_offset: 1,
            });
        }

        let mut sign = SIGN_POS;
        match bytes.get(pos) {
            Some(b'+') => pos += 1,
            Some(b'-') => {
                sign = SIGN_NEG;
                pos += 1;
            }
            _ => {}
        }

        let mut have_dp = false;
        if bytes.get(pos) == Some(&b'.') {
            have_dp = true;
            pos += 1;
        }

        if !bytes.get(pos).map_or(false, u8::is_ascii_digit) {
            return None;
        }

        let mut buf = vec![0u8];
        let mut weight: i32 = -1;
        let mut dscale: i32 = 0;

        while let Some(&c) = bytes.get(pos) {
            if c.is_ascii_digit() {
                buf.push(c - b'0');
                if have_dp {
                    dscale += 1;
                } else {
                    weight += 1;
                }
            } else if c == b'.' {
                if have_dp {
                    return None;
                }
                have_dp = true;
            } else {
                break;
            }
            pos += 1;
        }

        if matches!(bytes.get(pos), Some(b'e' | b'E')) {
            pos += 1;
            let (exponent, used) =
                <i32 as FromRadix10SignedChecked>::from_radix_10_signed_checked(&bytes[pos..]);
            let exponent = exponent?;
            if used == 0 || exponent >= i32::MAX / 2 || exponent <= -(i32::MAX / 2) {
                return None;
            }
            pos += used;
            weight += exponent;
            dscale = (dscale - exponent).max(0);
        }

        if !rest_is_blank(&bytes[pos..]) {
            return None;
        }

        let mut digits_offset = 1;
        let mut ndigits = (buf.len() - 1) as i32;
        while ndigits > 0 && buf[digits_offset] == 0 {
            digits_offset += 1;
            weight -= 1;
            ndigits -= 1;
        }
        if ndigits == 0 {
            weight = 0;
        }

        Some(NumericParts {
            ndigits,
            weight,
            rscale: dscale,
            dscale,
            sign,
            buf,
            digits_offset,
        })
    }

    pub fn digits(&self) -> &[u8] {
        &self.buf[self.digits_offset..self.digits_offset + self.ndigits as usize]
    }

    pub fn is_nan(&self) -> bool {
        self.sign == SIGN_NAN
    }

    /// Renders the value with `dscale` fractional digits, rounding half up.
    pub fn to_text(&self) -> String {
        if self.is_nan() {
            return "NaN".to_owned();
        }

        let mut digits = self.digits().to_vec();
        let mut weight = self.weight;
        let dscale = self.dscale;

        let keep = dscale + weight + 1;
        if keep >= 0 && (digits.len() as i32) > keep {
            let mut carry = u8::from(digits[keep as usize] > 4);
            digits.truncate(keep as usize);

            let mut i = digits.len();
            while carry > 0 {
                if i == 0 {
                    digits.insert(0, carry);
                    weight += 1;
                    break;
                }
                i -= 1;
                let d = digits[i] + carry;
                digits[i] = d % 10;
                carry = d / 10;
            }
        } else {
            digits.truncate(keep.clamp(0, digits.len() as i32) as usize);
        }

        let mut out = String::with_capacity(digits.len() + 4);
        if self.sign == SIGN_NEG {
            out.push('-');
        }

        let mut d = 0;
        let mut i = weight.max(0);
        while i >= 0 {
            if i <= weight && d < digits.len() {
                out.push(char::from(b'0' + digits[d]));
                d += 1;
            } else {
                out.push('0');
            }
            i -= 1;
        }

        if dscale > 0 {
            out.push('.');
            while i >= -dscale {
                if i <= weight && d < digits.len() {
                    out.push(char::from(b'0' + digits[d]));
                    d += 1;
                } else {
                    out.push('0');
                }
                i -= 1;
            }
        }

        out
    }
}

fn rest_is_blank(rest: &[u8]) -> bool {
    rest.iter().all(u8::is_ascii_whitespace)
}

/// Parses a numeric literal into a [`Decimal`].
///
/// Fails for `NaN` and for values outside the range of a 96-bit mantissa.
pub fn parse(text: &str) -> Option<Decimal> {
    let parts = NumericParts::parse(text)?;
    if parts.is_nan() {
        return None;
    }

    Decimal::from_str(&parts.to_text()).ok()
}

pub fn format(value: &Decimal) -> String {
    value.to_string()
}

pub fn to_cell(value: &Decimal) -> [u8; CELL_SIZE] {
    value.serialize()
}

pub fn from_cell(cell: &[u8]) -> Decimal {
    let mut bytes = [0u8; CELL_SIZE];
    bytes.copy_from_slice(&cell[..CELL_SIZE]);
    Decimal::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_splits_into_digits() {
        let parts = NumericParts::parse("  -0012.340 ").unwrap();

        assert_eq!(parts.sign, SIGN_NEG);
        assert_eq!(parts.digits(), &[1, 2, 3, 4, 0]);
        assert_eq!(parts.weight, 1);
        assert_eq!(parts.dscale, 3);
        // spare digit plus the two stripped leading zeros
        assert_eq!(parts.digits_offset, 3);
        assert_eq!(parts.to_text(), "-12.340");
    }

    #[test]
    fn it_applies_exponents() {
        assert_eq!(NumericParts::parse("1.5e3").unwrap().to_text(), "1500");
        assert_eq!(NumericParts::parse("15e-3").unwrap().to_text(), "0.015");
        assert_eq!(NumericParts::parse("0").unwrap().to_text(), "0");
        assert_eq!(NumericParts::parse(".5").unwrap().to_text(), "0.5");
    }

    #[test]
    fn it_rejects_garbage() {
        assert!(NumericParts::parse("").is_none());
        assert!(NumericParts::parse("1.2.3").is_none());
        assert!(NumericParts::parse("12abc").is_none());
        assert!(NumericParts::parse("1e").is_none());
        assert!(NumericParts::parse("NaN").unwrap().is_nan());
        assert!(parse("NaN").is_none());
    }

    #[test]
    fn it_round_trips_cells() {
        let value = parse("-98765.4321").unwrap();
        let cell = to_cell(&value);

        assert_eq!(from_cell(&cell), value);
        assert_eq!(format(&value), "-98765.4321");
    }
}
