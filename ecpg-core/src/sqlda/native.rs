//! The native layout: fixed-size column slots with the column name embedded.
//!
//! ```text
//! header   sqldaid[8] sqldabc:i64 sqln:i16 sqld:i16 _ desc_next:ptr
//! column   sqltype:i16 sqllen:i16 _ sqldata:ptr sqlind:ptr sqlname{length:i16 data[64]} _
//! ```
//!
//! Numeric values are stored as a digit-array header followed by the digit buffer.

use byteorder::{ByteOrder, NativeEndian};

use super::{get_i16, get_i32, get_u64, put_i16, put_i32, put_u64, NULL_PTR};
use crate::codec::numeric::NumericParts;

pub(super) const HEADER_SIZE: usize = 32;
pub(super) const VAR_SIZE: usize = 96;
pub(super) const NAMEDATALEN: usize = 64;
pub(super) const NUMERIC_HEADER: usize = 40;

const SQLDAID: &[u8; 8] = b"SQLDA  \0";

const SQLDABC: usize = 8;
const SQLN: usize = 16;
const SQLD: usize = 18;
const DESC_NEXT: usize = 24;

const SQLLEN: usize = 2;
const SQLNAME_LENGTH: usize = 24;
const SQLNAME_DATA: usize = 26;

const NUM_NDIGITS: usize = 0;
const NUM_WEIGHT: usize = 4;
const NUM_RSCALE: usize = 8;
const NUM_DSCALE: usize = 12;
const NUM_SIGN: usize = 16;
const NUM_BUF: usize = 24;
const NUM_DIGITS: usize = 32;

pub(super) fn write_header(block: &mut [u8], sqld: usize, total: usize) {
    block[..SQLDAID.len()].copy_from_slice(SQLDAID);
    NativeEndian::write_i64(&mut block[SQLDABC..SQLDABC + 8], total as i64);
    put_i16(block, SQLN, sqld as i16);
    put_i16(block, SQLD, sqld as i16);
    put_u64(block, DESC_NEXT, NULL_PTR);
}

pub(super) fn sqld(block: &[u8]) -> usize {
    get_i16(block, SQLD).max(0) as usize
}

pub(super) fn write_column(block: &mut [u8], var: usize, sqllen: i32, name: &str) {
    put_i16(block, var + SQLLEN, sqllen as i16);

    let mut len = name.len().min(NAMEDATALEN);
    while !name.is_char_boundary(len) {
        len -= 1;
    }

    let data = var + SQLNAME_DATA;
    block[data..data + len].copy_from_slice(&name.as_bytes()[..len]);
    put_i16(block, var + SQLNAME_LENGTH, len as i16);
}

pub(super) fn sqllen(block: &[u8], var: usize) -> i32 {
    i32::from(get_i16(block, var + SQLLEN))
}

pub(super) fn name(block: &[u8], var: usize) -> &str {
    let len = (get_i16(block, var + SQLNAME_LENGTH).max(0) as usize).min(NAMEDATALEN);
    let data = var + SQLNAME_DATA;

    std::str::from_utf8(&block[data..data + len]).unwrap_or_default()
}

pub(super) fn write_numeric(block: &mut [u8], at: usize, parts: &NumericParts) {
    put_i32(block, at + NUM_NDIGITS, parts.ndigits);
    put_i32(block, at + NUM_WEIGHT, parts.weight);
    put_i32(block, at + NUM_RSCALE, parts.rscale);
    put_i32(block, at + NUM_DSCALE, parts.dscale);
    put_i32(block, at + NUM_SIGN, parts.sign);

    let buf = at + NUMERIC_HEADER;
    block[buf..buf + parts.buf.len()].copy_from_slice(&parts.buf);

    put_u64(block, at + NUM_BUF, buf as u64);
    put_u64(block, at + NUM_DIGITS, (buf + parts.digits_offset) as u64);
}

/// Reads back a numeric written by [`write_numeric`]; `cell` is its header.
pub(super) fn read_numeric(block: &[u8], cell: &[u8]) -> Option<NumericParts> {
    let ndigits = get_i32(cell, NUM_NDIGITS);
    let buf = get_u64(cell, NUM_BUF);
    let digits = get_u64(cell, NUM_DIGITS);

    if buf == NULL_PTR || digits < buf || ndigits < 0 {
        return None;
    }

    let (buf, digits) = (buf as usize, digits as usize);

    Some(NumericParts {
        ndigits,
        weight: get_i32(cell, NUM_WEIGHT),
        rscale: get_i32(cell, NUM_RSCALE),
        dscale: get_i32(cell, NUM_DSCALE),
        sign: get_i32(cell, NUM_SIGN),
        buf: block.get(buf..digits + ndigits as usize)?.to_vec(),
        digits_offset: digits - buf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_truncates_long_names() {
        let mut block = vec![0u8; VAR_SIZE];
        let long = "x".repeat(70);

        write_column(&mut block, 0, 4, &long);

        assert_eq!(name(&block, 0).len(), NAMEDATALEN);
        assert_eq!(sqllen(&block, 0), 4);
    }

    #[test]
    fn numerics_round_trip_through_the_block() {
        let parts = NumericParts::parse("-0.0042").unwrap();
        let mut block = vec![0u8; 8 + NUMERIC_HEADER + parts.buf.len()];

        write_numeric(&mut block, 8, &parts);
        let read = read_numeric(&block, &block[8..8 + NUMERIC_HEADER]).unwrap();

        assert_eq!(read, parts);
        assert_eq!(read.to_text(), "-0.0042");
    }
}
