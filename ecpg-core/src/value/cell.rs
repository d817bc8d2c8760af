//! Reading and writing single host cells.
//!
//! Cells are native-endian and exactly as wide as the C type they stand for; callers
//! obtain them through the strided views, which guarantee the width.

use byteorder::{ByteOrder, NativeEndian};

use crate::types::HostType;

/// Width of the length header in front of varchar data.
pub(crate) const VARCHAR_HEADER: usize = 4;

pub(crate) fn read_int(ty: HostType, cell: &[u8]) -> Option<i64> {
    use HostType::*;

    Some(match ty {
        Short => NativeEndian::read_i16(cell).into(),
        UnsignedShort => NativeEndian::read_u16(cell).into(),
        Int => NativeEndian::read_i32(cell).into(),
        UnsignedInt => NativeEndian::read_u32(cell).into(),
        Long | LongLong => NativeEndian::read_i64(cell),
        UnsignedLong | UnsignedLongLong => NativeEndian::read_u64(cell) as i64,
        _ => return None,
    })
}

/// Stores `value` truncated to the width of `ty`.
pub(crate) fn write_int(ty: HostType, cell: &mut [u8], value: i64) -> bool {
    use HostType::*;

    match ty {
        Short | UnsignedShort => NativeEndian::write_i16(cell, value as i16),
        Int | UnsignedInt => NativeEndian::write_i32(cell, value as i32),
        Long | LongLong | UnsignedLong | UnsignedLongLong => NativeEndian::write_i64(cell, value),
        _ => return false,
    }

    true
}

pub(crate) fn read_float(ty: HostType, cell: &[u8]) -> Option<f64> {
    match ty {
        HostType::Float => Some(NativeEndian::read_f32(cell).into()),
        HostType::Double => Some(NativeEndian::read_f64(cell)),
        _ => None,
    }
}

pub(crate) fn write_float(ty: HostType, cell: &mut [u8], value: f64) -> bool {
    match ty {
        HostType::Float => NativeEndian::write_f32(cell, value as f32),
        HostType::Double => NativeEndian::write_f64(cell, value),
        _ => return false,
    }

    true
}

pub(crate) fn read_bool(cell: &[u8]) -> bool {
    cell.iter().any(|&b| b != 0)
}

pub(crate) fn write_bool(cell: &mut [u8], value: bool) {
    cell.fill(0);
    // the low byte of a wide bool is at the low address only on little endian
    let at = if cfg!(target_endian = "big") {
        cell.len() - 1
    } else {
        0
    };
    cell[at] = u8::from(value);
}

/// The bytes of a NUL-terminated string stored in a fixed-width cell.
pub(crate) fn c_str(cell: &[u8]) -> &[u8] {
    match memchr::memchr(0, cell) {
        Some(end) => &cell[..end],
        None => cell,
    }
}

pub(crate) fn varchar_len(cell: &[u8]) -> usize {
    NativeEndian::read_i32(&cell[..VARCHAR_HEADER]).max(0) as usize
}

pub(crate) fn set_varchar_len(cell: &mut [u8], len: usize) {
    NativeEndian::write_i32(&mut cell[..VARCHAR_HEADER], len as i32);
}

/// The used part of a varchar cell.
pub(crate) fn varchar_data(cell: &[u8]) -> &[u8] {
    let data = &cell[VARCHAR_HEADER..];
    &data[..varchar_len(cell).min(data.len())]
}

/// Writes the in-band NULL pattern used when no indicator is bound.
///
/// Types without such a pattern are left untouched.
pub(crate) fn set_null_sentinel(ty: HostType, cell: &mut [u8]) {
    use HostType::*;

    match ty {
        Char | UnsignedChar | String => {
            if let Some(first) = cell.first_mut() {
                *first = 0;
            }
        }
        Short => NativeEndian::write_i16(cell, i16::MIN),
        Int | Date => NativeEndian::write_i32(cell, i32::MIN),
        Long | LongLong => NativeEndian::write_i64(cell, i64::MIN),
        Float | Double | Numeric | Decimal | Timestamp | Interval => cell.fill(0xff),
        Varchar | Varchar2 => {
            set_varchar_len(cell, 0);
            if let Some(first) = cell.get_mut(VARCHAR_HEADER) {
                *first = 0;
            }
        }
        _ => {}
    }
}

/// Whether `cell` holds the in-band NULL pattern of its type.
pub(crate) fn is_null_sentinel(ty: HostType, cell: &[u8]) -> bool {
    use HostType::*;

    match ty {
        Char | UnsignedChar | String => cell.first() == Some(&0),
        Short => NativeEndian::read_i16(cell) == i16::MIN,
        Int | Date => NativeEndian::read_i32(cell) == i32::MIN,
        Long | LongLong => NativeEndian::read_i64(cell) == i64::MIN,
        Float | Double | Numeric | Decimal | Timestamp | Interval => {
            cell.iter().all(|&b| b == 0xff)
        }
        Varchar | Varchar2 => {
            varchar_len(cell) == 0 && cell.get(VARCHAR_HEADER).map_or(true, |&b| b == 0)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_round_trips_null_sentinels() {
        for (ty, width) in [
            (HostType::Char, 4),
            (HostType::Short, 2),
            (HostType::Int, 4),
            (HostType::LongLong, 8),
            (HostType::Double, 8),
            (HostType::Numeric, 16),
            (HostType::Date, 4),
            (HostType::Interval, 16),
            (HostType::Varchar, 8),
        ] {
            let mut cell = vec![1u8; width];
            assert!(!is_null_sentinel(ty, &cell), "{ty}");

            set_null_sentinel(ty, &mut cell);
            assert!(is_null_sentinel(ty, &cell), "{ty}");
        }
    }

    #[test]
    fn unsigned_types_have_no_sentinel() {
        let mut cell = [7u8; 4];
        set_null_sentinel(HostType::UnsignedInt, &mut cell);

        assert_eq!(cell, [7u8; 4]);
        assert!(!is_null_sentinel(HostType::UnsignedInt, &[0; 4]));
    }

    #[test]
    fn it_truncates_integers_to_width() {
        let mut cell = [0u8; 2];
        write_int(HostType::Short, &mut cell, 70_000);

        assert_eq!(read_int(HostType::Short, &cell), Some(70_000i64 as i16 as i64));
        assert_eq!(read_int(HostType::UnsignedShort, &[0xff, 0xff]), Some(65_535));
    }

    #[test]
    fn it_reads_varchar_cells() {
        let mut cell = [0u8; 10];
        set_varchar_len(&mut cell, 3);
        cell[4..7].copy_from_slice(b"abc");

        assert_eq!(varchar_data(&cell), b"abc");
        assert_eq!(c_str(b"ab\0cd"), b"ab");
    }
}
