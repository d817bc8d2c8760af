//! SQLDA: a result row described and stored in one contiguous block.
//!
//! The block starts with a header and one column slot per field, followed by the column
//! values, each aligned to its natural boundary. Pointers of the C structure are stored as
//! offsets into the block, [`NULL_PTR`] standing in for a null pointer, so a whole SQLDA is
//! released by dropping a single buffer.
//!
//! Two layouts exist: the native one, used by default, and the Informix-compatible one,
//! selected by the Informix compatibility modes.

use std::borrow::Cow;

use byteorder::{ByteOrder, NativeEndian};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::backend::QueryResult;
use crate::codec::numeric::{self, NumericParts};
use crate::codec::{datetime, Interval};
use crate::error::{Error, Result};
use crate::strided::StridedMut;
use crate::types::{sqlda_type, ArrayKind, CompatMode, HostType};
use crate::value::cell;
use crate::value::decode::{get_data, DecodeContext, Target};
use crate::variable::{Storage, Variable};

mod compat;
mod native;

/// Offset value of a null pointer.
pub const NULL_PTR: u64 = u64::MAX;

// offsets shared by the column slots of both layouts
const VAR_SQLTYPE: usize = 0;
const VAR_SQLDATA: usize = 8;
const VAR_SQLIND: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SqldaLayout {
    Native,
    Compat,
}

impl SqldaLayout {
    fn for_mode(compat: CompatMode) -> Self {
        if compat.is_informix() {
            SqldaLayout::Compat
        } else {
            SqldaLayout::Native
        }
    }

    /// Offset of the two indicator sentinels.
    fn sentinels(self) -> usize {
        match self {
            SqldaLayout::Native => native::HEADER_SIZE,
            SqldaLayout::Compat => compat::HEADER_SIZE,
        }
    }

    fn vars(self) -> usize {
        align(self.sentinels() + 4, 8)
    }

    fn var_size(self) -> usize {
        match self {
            SqldaLayout::Native => native::VAR_SIZE,
            SqldaLayout::Compat => compat::VAR_SIZE,
        }
    }
}

fn align(offset: usize, to: usize) -> usize {
    (offset + to - 1) & !(to - 1)
}

pub(crate) fn put_i16(block: &mut [u8], at: usize, value: i16) {
    NativeEndian::write_i16(&mut block[at..at + 2], value);
}

pub(crate) fn put_i32(block: &mut [u8], at: usize, value: i32) {
    NativeEndian::write_i32(&mut block[at..at + 4], value);
}

pub(crate) fn put_u64(block: &mut [u8], at: usize, value: u64) {
    NativeEndian::write_u64(&mut block[at..at + 8], value);
}

fn get_i16(block: &[u8], at: usize) -> i16 {
    NativeEndian::read_i16(&block[at..at + 2])
}

fn get_i32(block: &[u8], at: usize) -> i32 {
    NativeEndian::read_i32(&block[at..at + 4])
}

fn get_u64(block: &[u8], at: usize) -> u64 {
    NativeEndian::read_u64(&block[at..at + 8])
}

/// One field of a result row, as both layouts need it.
struct DescribedColumn<'r> {
    name: &'r str,
    type_oid: u32,
    size: i32,
    sqltype: HostType,
    value: Option<&'r str>,

    /// Digits of a native numeric value, split once for sizing and writing.
    numeric: Option<NumericParts>,
}

impl DescribedColumn<'_> {
    /// Alignment and size of the value in the data area.
    fn value_size(&self) -> (usize, usize) {
        use HostType::*;

        match self.sqltype {
            Numeric => (
                8,
                native::NUMERIC_HEADER + self.numeric.as_ref().map_or(0, |parts| parts.buf.len()),
            ),
            Interval | Decimal | Timestamp | LongLong | Double => {
                (8, self.sqltype.fixed_size().unwrap_or(8))
            }
            ty => match ty.fixed_size() {
                Some(size) => (size, size),
                None => (1, self.value.map_or(0, str::len) + 1),
            },
        }
    }

    /// The `sqllen` reported for the column.
    fn sqllen(&self, with_data: bool) -> i32 {
        match self.sqltype {
            _ if !with_data => self.size,
            HostType::Numeric => native::NUMERIC_HEADER as i32,
            _ => self.value_size().1 as i32,
        }
    }
}

fn describe(
    line: i32,
    result: &QueryResult,
    row: Option<usize>,
    compat: CompatMode,
) -> Result<Vec<DescribedColumn<'_>>> {
    result
        .fields()
        .iter()
        .enumerate()
        .map(|(field, desc)| {
            let sqltype = sqlda_type(desc.type_oid, compat);
            let value = row.and_then(|row| result.value(row, field));

            let numeric = match (sqltype, value) {
                (HostType::Numeric, Some(text)) => Some(NumericParts::parse(text).ok_or_else(
                    || Error::NumericFormat {
                        line,
                        value: text.to_owned(),
                    },
                )?),
                _ => None,
            };

            Ok(DescribedColumn {
                name: &desc.name,
                type_oid: desc.type_oid,
                size: desc.size,
                sqltype,
                value,
                numeric,
            })
        })
        .collect()
}

/// A self-contained SQLDA block.
#[derive(Clone, PartialEq, Eq)]
pub struct Sqlda {
    layout: SqldaLayout,
    block: Vec<u8>,
}

impl std::fmt::Debug for Sqlda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sqlda")
            .field("layout", &self.layout)
            .field("sqld", &self.sqld())
            .field("len", &self.block.len())
            .finish()
    }
}

impl Sqlda {
    /// Builds the SQLDA of row `row`, or only the column metadata when `row` is `None`.
    pub(crate) fn build(
        line: i32,
        result: &QueryResult,
        row: Option<usize>,
        compat: CompatMode,
    ) -> Result<Self> {
        let layout = SqldaLayout::for_mode(compat);
        let columns = describe(line, result, row, compat)?;

        // first pass: place everything
        let mut offset = layout.vars() + columns.len() * layout.var_size();

        let mut names = Vec::new();
        if layout == SqldaLayout::Compat {
            for column in &columns {
                names.push(offset);
                offset += column.name.len() + 1;
            }
        }

        let mut values = Vec::new();
        if row.is_some() {
            for column in &columns {
                let (alignment, size) = column.value_size();
                offset = align(offset, alignment);
                values.push(offset);
                offset += size;
            }
        }

        log::trace!(
            target: "ecpg",
            "on line {}: building {:?} sqlda of {} bytes for {} columns",
            line,
            layout,
            offset,
            columns.len()
        );

        // second pass: fill it in
        let mut block = vec![0u8; offset];
        let sentinels = layout.sentinels();

        match layout {
            SqldaLayout::Native => native::write_header(&mut block, columns.len(), offset),
            SqldaLayout::Compat => compat::write_header(&mut block, columns.len(), layout.vars()),
        }

        put_i16(&mut block, sentinels, 0);
        put_i16(&mut block, sentinels + 2, -1);

        let cx = DecodeContext {
            line,
            compat,
            force_indicator: false,
        };

        for (i, column) in columns.iter().enumerate() {
            let var = layout.vars() + i * layout.var_size();

            put_i16(&mut block, var + VAR_SQLTYPE, column.sqltype.code());
            put_u64(&mut block, var + VAR_SQLDATA, NULL_PTR);
            put_u64(&mut block, var + VAR_SQLIND, NULL_PTR);

            let sqllen = column.sqllen(row.is_some());
            match layout {
                SqldaLayout::Native => {
                    native::write_column(&mut block, var, sqllen, column.name);
                }
                SqldaLayout::Compat => compat::write_column(
                    &mut block,
                    var,
                    sqllen,
                    column.name,
                    names[i],
                    column.type_oid,
                ),
            }

            let Some(&at) = values.get(i) else {
                continue;
            };

            let size = column.value_size().1;
            let null = column.value.is_none();

            put_u64(&mut block, var + VAR_SQLDATA, at as u64);
            put_u64(
                &mut block,
                var + VAR_SQLIND,
                (sentinels + if null { 2 } else { 0 }) as u64,
            );

            match (&column.numeric, column.value) {
                (Some(parts), _) => native::write_numeric(&mut block, at, parts),
                // the native layout leaves NULL values untouched
                (None, None) if layout == SqldaLayout::Native => {}
                (None, value) => {
                    let cell = &mut block[at..at + size];
                    let mut target = Target {
                        ty: column.sqltype,
                        varcharsize: size,
                        data: StridedMut::new(cell, size, size, 1).map_err(|e| e.at(line))?,
                        ind_ty: HostType::NoIndicator,
                        ind: None,
                    };

                    get_data(&cx, value, ArrayKind::None, &mut target, 0)?;
                }
            }
        }

        Ok(Sqlda { layout, block })
    }

    pub fn layout(&self) -> SqldaLayout {
        self.layout
    }

    /// The raw block.
    pub fn as_bytes(&self) -> &[u8] {
        &self.block
    }

    /// Number of columns.
    pub fn sqld(&self) -> usize {
        match self.layout {
            SqldaLayout::Native => native::sqld(&self.block),
            SqldaLayout::Compat => compat::sqld(&self.block),
        }
    }

    pub fn column(&self, index: usize) -> Option<SqlVar<'_>> {
        (index < self.sqld()).then(|| SqlVar {
            sqlda: self,
            at: self.layout.vars() + index * self.layout.var_size(),
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = SqlVar<'_>> {
        (0..self.sqld()).filter_map(move |index| self.column(index))
    }

    /// The columns as input variables, one placeholder each.
    pub(crate) fn input_variables(&self) -> Vec<Variable<'_>> {
        let null = &self.block[self.layout.sentinels() + 2..self.layout.sentinels() + 4];

        self.columns()
            .map(|var| {
                let ty = var.sqltype().unwrap_or(HostType::Char);

                let (ty, bytes): (HostType, Cow<'_, [u8]>) = match (ty, var.data()) {
                    (_, None) => (ty, Cow::Borrowed(&[][..])),
                    (HostType::Numeric, Some(_)) => match var.as_numeric() {
                        Some(parts) => match numeric::parse(&parts.to_text()) {
                            Some(value) => (ty, Cow::Owned(numeric::to_cell(&value).to_vec())),
                            None => (HostType::Char, Cow::Owned(c_string(&parts.to_text()))),
                        },
                        None => (HostType::Char, Cow::Borrowed(&b"\0"[..])),
                    },
                    (ty, Some(data)) => (ty, Cow::Borrowed(data)),
                };

                let ind = match (var.data(), var.indicator_bytes()) {
                    (None, _) => Some(null),
                    (Some(_), ind) => ind,
                };

                let varcharsize = if ty.is_char() {
                    cell::c_str(&bytes).len()
                } else {
                    0
                };

                Variable {
                    ty,
                    storage: Storage::In(bytes),
                    varcharsize,
                    arrsize: 1,
                    offset: 0,
                    ind_ty: if ind.is_some() {
                        HostType::Short
                    } else {
                        HostType::NoIndicator
                    },
                    ind: ind.map(|ind| Storage::In(Cow::Borrowed(ind))),
                    ind_varcharsize: 0,
                    ind_arrsize: 1,
                    ind_offset: 0,
                }
            })
            .collect()
    }
}

fn c_string(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// One column slot of a [`Sqlda`].
#[derive(Copy, Clone)]
pub struct SqlVar<'s> {
    sqlda: &'s Sqlda,
    at: usize,
}

impl std::fmt::Debug for SqlVar<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlVar")
            .field("name", &self.name())
            .field("sqltype", &self.sqltype())
            .field("sqllen", &self.sqllen())
            .field("is_null", &self.is_null())
            .finish()
    }
}

impl<'s> SqlVar<'s> {
    fn block(&self) -> &'s [u8] {
        &self.sqlda.block
    }

    pub fn sqltype(&self) -> Option<HostType> {
        HostType::from_code(get_i16(self.block(), self.at + VAR_SQLTYPE))
    }

    pub fn sqllen(&self) -> i32 {
        match self.sqlda.layout {
            SqldaLayout::Native => native::sqllen(self.block(), self.at),
            SqldaLayout::Compat => compat::sqllen(self.block(), self.at),
        }
    }

    pub fn name(&self) -> &'s str {
        match self.sqlda.layout {
            SqldaLayout::Native => native::name(self.block(), self.at),
            SqldaLayout::Compat => compat::name(self.block(), self.at),
        }
    }

    fn indicator_bytes(&self) -> Option<&'s [u8]> {
        match get_u64(self.block(), self.at + VAR_SQLIND) {
            NULL_PTR => None,
            at => {
                let at = at as usize;
                self.block().get(at..at + 2)
            }
        }
    }

    /// Whether the indicator marks the value as NULL; metadata-only columns are never NULL.
    pub fn is_null(&self) -> bool {
        self.indicator_bytes()
            .map_or(false, |ind| NativeEndian::read_i16(ind) < 0)
    }

    /// The value cell, absent for metadata-only SQLDAs.
    pub fn data(&self) -> Option<&'s [u8]> {
        let at = match get_u64(self.block(), self.at + VAR_SQLDATA) {
            NULL_PTR => return None,
            at => at as usize,
        };

        let size = match self.sqltype()? {
            HostType::Numeric => native::NUMERIC_HEADER,
            ty => ty
                .fixed_size()
                .unwrap_or_else(|| self.sqllen().max(0) as usize),
        };

        self.block().get(at..at + size)
    }

    fn value(&self) -> Option<&'s [u8]> {
        if self.is_null() {
            return None;
        }

        self.data()
    }

    pub fn as_i64(&self) -> Option<i64> {
        cell::read_int(self.sqltype()?, self.value()?)
    }

    pub fn as_f64(&self) -> Option<f64> {
        cell::read_float(self.sqltype()?, self.value()?)
    }

    pub fn as_str(&self) -> Option<&'s str> {
        if !self.sqltype()?.is_char() {
            return None;
        }

        std::str::from_utf8(cell::c_str(self.value()?)).ok()
    }

    pub fn as_numeric(&self) -> Option<NumericParts> {
        match self.sqltype()? {
            HostType::Numeric => native::read_numeric(self.block(), self.value()?),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self.sqltype()? {
            HostType::Decimal => Some(numeric::from_cell(self.value()?)),
            HostType::Numeric => numeric::parse(&self.as_numeric()?.to_text()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self.sqltype()? {
            HostType::Date => datetime::date_to_naive(get_i32(self.value()?, 0)),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self.sqltype()? {
            HostType::Timestamp => {
                datetime::timestamp_to_naive(NativeEndian::read_i64(self.value()?))
            }
            _ => None,
        }
    }

    pub fn as_interval(&self) -> Option<Interval> {
        match self.sqltype()? {
            HostType::Interval => Some(Interval::from_cell(self.value()?)),
            _ => None,
        }
    }
}
