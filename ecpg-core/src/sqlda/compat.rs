//! The Informix-compatible layout: column names live in an arena after the column slots.
//!
//! ```text
//! header   sqld:i16 _ sqlvar:ptr desc_name[19] _ desc_occ:i16 _ desc_next:ptr reserved:ptr
//! column   sqltype:i16 _ sqllen:i32 sqldata:ptr sqlind:ptr sqlname:ptr sqlformat:ptr
//!          sqlitype:i16 sqlilen:i16 _ sqlidata:ptr sqlxid:i32 _ sqltypename:ptr
//!          sqltypelen:i16 sqlownerlen:i16 sqlsourcetype:i16 _ sqlownername:ptr
//!          sqlsourceid:i32 _ sqlilongdata:ptr sqlflags:i32 _ sqlreserved:ptr
//! ```

use super::{get_i16, get_i32, get_u64, put_i16, put_i32, put_u64, NULL_PTR};
use crate::value::cell;

pub(super) const HEADER_SIZE: usize = 56;
pub(super) const VAR_SIZE: usize = 120;

const SQLD: usize = 0;
const SQLVAR: usize = 8;
const DESC_NEXT: usize = 40;
const RESERVED: usize = 48;

const SQLLEN: usize = 4;
const SQLNAME: usize = 24;
const SQLXID: usize = 56;

// pointer fields this runtime never fills
const UNUSED_POINTERS: [usize; 6] = [32, 48, 64, 80, 96, 112];

pub(super) fn write_header(block: &mut [u8], sqld: usize, vars: usize) {
    put_i16(block, SQLD, sqld as i16);
    put_u64(block, SQLVAR, vars as u64);
    put_u64(block, DESC_NEXT, NULL_PTR);
    put_u64(block, RESERVED, NULL_PTR);
}

pub(super) fn sqld(block: &[u8]) -> usize {
    get_i16(block, SQLD).max(0) as usize
}

pub(super) fn write_column(
    block: &mut [u8],
    var: usize,
    sqllen: i32,
    name: &str,
    name_at: usize,
    type_oid: u32,
) {
    put_i32(block, var + SQLLEN, sqllen);

    block[name_at..name_at + name.len()].copy_from_slice(name.as_bytes());
    block[name_at + name.len()] = 0;
    put_u64(block, var + SQLNAME, name_at as u64);

    put_i32(block, var + SQLXID, type_oid as i32);

    for field in UNUSED_POINTERS {
        put_u64(block, var + field, NULL_PTR);
    }
}

pub(super) fn sqllen(block: &[u8], var: usize) -> i32 {
    get_i32(block, var + SQLLEN)
}

pub(super) fn name(block: &[u8], var: usize) -> &str {
    match get_u64(block, var + SQLNAME) {
        NULL_PTR => "",
        at => block
            .get(at as usize..)
            .and_then(|name| std::str::from_utf8(cell::c_str(name)).ok())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_read_from_the_arena() {
        let mut block = vec![0u8; VAR_SIZE + 16];

        write_column(&mut block, 0, -1, "total", VAR_SIZE, 1700);

        assert_eq!(name(&block, 0), "total");
        assert_eq!(sqllen(&block, 0), -1);
        assert_eq!(get_i32(&block, SQLXID), 1700);
        assert_eq!(get_u64(&block, 32), NULL_PTR);
    }
}
