//! Prefix scanners for numeric field text.
//!
//! Each scanner reads the longest numeric prefix of its input and reports how many bytes it
//! consumed, leaving the caller to decide whether the remainder is acceptable. Parsing never
//! consults the process locale.

use atoi::{FromRadix10Checked, FromRadix10SignedChecked};

use crate::types::{ArrayKind, CompatMode};

fn skip_blanks(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_whitespace()).count()
}

/// Length of an optional sign followed by at least one digit, or `None` if there is no digit.
fn integer_span(bytes: &[u8]) -> Option<(usize, bool)> {
    let (sign, negative) = match bytes.first() {
        Some(b'-') => (1, true),
        Some(b'+') => (1, false),
        _ => (0, false),
    };

    let digits = bytes[sign..].iter().take_while(|b| b.is_ascii_digit()).count();
    (digits > 0).then_some((sign + digits, negative))
}

/// Scans a signed decimal integer. Out-of-range values saturate.
///
/// Returns `(0, 0)` when no digits are present.
pub(crate) fn scan_i64(bytes: &[u8]) -> (i64, usize) {
    let start = skip_blanks(bytes);
    let Some((len, negative)) = integer_span(&bytes[start..]) else {
        return (0, 0);
    };

    let span = &bytes[start..start + len];
    let (value, _) = i64::from_radix_10_signed_checked(span);
    let value = value.unwrap_or(if negative { i64::MIN } else { i64::MAX });

    (value, start + len)
}

/// Scans an unsigned decimal integer. A leading `-` negates the result modulo 2^64.
pub(crate) fn scan_u64(bytes: &[u8]) -> (u64, usize) {
    let start = skip_blanks(bytes);
    let Some((len, negative)) = integer_span(&bytes[start..]) else {
        return (0, 0);
    };

    let span = &bytes[start..start + len];
    let digits = match span[0] {
        b'-' | b'+' => &span[1..],
        _ => span,
    };

    let (value, _) = u64::from_radix_10_checked(digits);
    let value = match value {
        Some(v) if negative => v.wrapping_neg(),
        Some(v) => v,
        None => u64::MAX,
    };

    (value, start + len)
}

/// Scans a floating point number, including `NaN`, `Infinity` and `-Infinity`.
pub(crate) fn scan_f64(bytes: &[u8]) -> (f64, usize) {
    let start = skip_blanks(bytes);
    let rest = &bytes[start..];

    for (word, value) in [
        (&b"NaN"[..], f64::NAN),
        (&b"Infinity"[..], f64::INFINITY),
        (&b"-Infinity"[..], f64::NEG_INFINITY),
    ] {
        if rest.len() >= word.len() && rest[..word.len()].eq_ignore_ascii_case(word) {
            return (value, start + word.len());
        }
    }

    let mut pos = match rest.first() {
        Some(b'-' | b'+') => 1,
        _ => 0,
    };

    let int_digits = rest[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
    pos += int_digits;

    let mut frac_digits = 0;
    if rest.get(pos) == Some(&b'.') {
        frac_digits = rest[pos + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        if int_digits > 0 || frac_digits > 0 {
            pos += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return (0.0, 0);
    }

    // an exponent only counts when digits follow it
    if matches!(rest.get(pos), Some(b'e' | b'E')) {
        let mut exp = pos + 1;
        if matches!(rest.get(exp), Some(b'-' | b'+')) {
            exp += 1;
        }

        let exp_digits = rest[exp..].iter().take_while(|b| b.is_ascii_digit()).count();
        if exp_digits > 0 {
            pos = exp + exp_digits;
        }
    }

    // the span is ASCII by construction
    let text = std::str::from_utf8(&rest[..pos]).unwrap_or_default();
    (text.parse().unwrap_or(0.0), start + pos)
}

/// Checks what follows a scanned number.
///
/// A scalar must be followed by a blank or the end of the text; in Informix mode a fractional
/// part after an integer is skipped. An array element must be followed by a delimiter or the
/// closing boundary. Returns the remainder after anything skipped, or `None` if garbage is left.
pub(crate) fn garbage_left(kind: ArrayKind, rest: &[u8], compat: CompatMode) -> Option<&[u8]> {
    let first = rest.first().copied().unwrap_or(0);

    if !kind.is_array() {
        let mut rest = rest;
        if compat.is_informix() && first == b'.' {
            let digits = rest[1..].iter().take_while(|b| b.is_ascii_digit()).count();
            rest = &rest[1 + digits..];
        }

        return match rest.first() {
            None | Some(b' ') => Some(rest),
            Some(_) => None,
        };
    }

    if kind.is_delimiter(first) || kind.is_boundary(first) {
        Some(rest)
    } else {
        None
    }
}
