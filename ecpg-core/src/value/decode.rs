//! Decoding result fields into host cells.

use crate::backend::QueryResult;
use crate::codec::{datetime, numeric, Interval};
use crate::error::{Error, Result};
use crate::memory::AutoBuffer;
use crate::sqlca;
use crate::strided::StridedMut;
use crate::types::{ArrayKind, CompatMode, HostType};
use crate::value::cell::{self, VARCHAR_HEADER};
use crate::value::number::{garbage_left, scan_f64, scan_i64, scan_u64};
use crate::variable::{Storage, Variable};

/// Statement settings that influence decoding.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DecodeContext {
    pub(crate) line: i32,
    pub(crate) compat: CompatMode,
    pub(crate) force_indicator: bool,
}

/// The cells of one output variable and its indicator.
pub(crate) struct Target<'b> {
    pub(crate) ty: HostType,
    pub(crate) varcharsize: usize,
    pub(crate) data: StridedMut<'b>,
    pub(crate) ind_ty: HostType,
    pub(crate) ind: Option<StridedMut<'b>>,
}

impl Target<'_> {
    fn cell(&mut self, line: i32, index: usize) -> Result<&mut [u8]> {
        self.data
            .get_mut(index)
            .ok_or(Error::TooManyMatches { line })
    }

    /// Stores `value` in the indicator, if there is one.
    fn set_indicator(&mut self, line: i32, index: usize, value: i64) -> Result<()> {
        let ind_ty = self.ind_ty;
        if let Some(ind) = &mut self.ind {
            let cell = ind.get_mut(index).ok_or(Error::TooManyMatches { line })?;
            cell::write_int(ind_ty, cell, value);
        }

        Ok(())
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decodes one field into `target`, starting at element `index`.
///
/// Array fields fill consecutive elements. `None` is SQL NULL.
pub(crate) fn get_data(
    cx: &DecodeContext,
    value: Option<&str>,
    kind: ArrayKind,
    target: &mut Target<'_>,
    index: usize,
) -> Result<()> {
    let line = cx.line;

    match target.ind_ty {
        HostType::NoIndicator => {
            if value.is_none() {
                if cx.force_indicator {
                    return Err(Error::MissingIndicator { line });
                }

                let ty = target.ty;
                cell::set_null_sentinel(ty, target.cell(line, index)?);
            }
        }
        ty if ty.is_numeric() && ty != HostType::Float && ty != HostType::Double => {
            target.set_indicator(line, index, if value.is_some() { 0 } else { -1 })?;
        }
        other => {
            return Err(Error::Unsupported {
                line,
                ty: other.name().to_owned(),
            })
        }
    }

    let Some(text) = value else {
        return Ok(());
    };

    let text = text.as_bytes();
    let mut pos = 0;

    if kind == ArrayKind::Array {
        if text.first() != Some(&b'{') {
            return Err(Error::DataNotArray { line });
        }

        // character targets receive the array text as a whole
        if !(target.ty.is_char() || target.ty.is_varchar()) {
            pos = 1;
        }
    }

    let mut index = index;
    loop {
        if kind.is_array() && text.get(pos).map_or(true, |&c| kind.is_boundary(c)) {
            break;
        }

        pos += decode_element(cx, kind, target, index, &text[pos..])?;

        if !kind.is_array() {
            break;
        }

        index += 1;

        let mut quoted = false;
        while let Some(&c) = text.get(pos) {
            if !quoted && (kind.is_delimiter(c) || kind.is_boundary(c)) {
                break;
            }
            if c == b'"' {
                quoted = !quoted;
            }
            pos += 1;
        }

        if text.get(pos).map_or(false, |&c| kind.is_delimiter(c)) {
            pos += 1;
        }
    }

    Ok(())
}

/// Decodes the element at the start of `pval` and returns the number of bytes consumed.
fn decode_element(
    cx: &DecodeContext,
    kind: ArrayKind,
    target: &mut Target<'_>,
    index: usize,
    pval: &[u8],
) -> Result<usize> {
    use HostType::*;

    let line = cx.line;
    let ty = target.ty;

    let consumed = match ty {
        Short | Int | Long | LongLong => {
            let (value, used) = scan_i64(pval);
            let rest = garbage_left(kind, &pval[used..], cx.compat).ok_or_else(|| {
                Error::IntFormat {
                    line,
                    value: lossy(pval),
                }
            })?;

            cell::write_int(ty, target.cell(line, index)?, value);
            pval.len() - rest.len()
        }

        UnsignedShort | UnsignedInt | UnsignedLong | UnsignedLongLong => {
            let (value, used) = scan_u64(pval);
            let rest = garbage_left(kind, &pval[used..], cx.compat).ok_or_else(|| {
                Error::UintFormat {
                    line,
                    value: lossy(pval),
                }
            })?;

            cell::write_int(ty, target.cell(line, index)?, value as i64);
            pval.len() - rest.len()
        }

        Float | Double => {
            let skip = usize::from(kind.is_array() && pval.first() == Some(&b'"'));
            let (value, used) = scan_f64(&pval[skip..]);

            let mut after = &pval[skip + used..];
            if kind.is_array() && after.first() == Some(&b'"') {
                after = &after[1..];
            }

            // no Informix leniency for floating point
            let rest = garbage_left(kind, after, CompatMode::Pgsql).ok_or_else(|| {
                Error::FloatFormat {
                    line,
                    value: lossy(pval),
                }
            })?;

            cell::write_float(ty, target.cell(line, index)?, value);
            pval.len() - rest.len()
        }

        Bool => {
            let value = match pval {
                [b't', rest @ ..] if ends_element(kind, rest) => true,
                [b'f', rest @ ..] if ends_element(kind, rest) => false,
                _ => {
                    return Err(Error::ConvertBool {
                        line,
                        value: Some(lossy(pval)),
                    })
                }
            };

            cell::write_bool(target.cell(line, index)?, value);
            1
        }

        Char | UnsignedChar | String => {
            decode_char(cx, target, index, pval)?;
            pval.len()
        }

        Varchar | Varchar2 => {
            decode_varchar(cx, target, index, pval)?;
            pval.len()
        }

        Numeric | Decimal => {
            let end = memchr::memchr2(b',', b'}', pval).unwrap_or(pval.len());
            let parsed = std::str::from_utf8(&pval[..end])
                .ok()
                .and_then(numeric::parse);

            match parsed {
                Some(value) => {
                    let mut rest = &pval[end..];
                    if !kind.is_array() && rest.first() == Some(&b'"') {
                        rest = &rest[1..];
                    }

                    let rest = garbage_left(kind, rest, cx.compat).ok_or_else(|| {
                        Error::NumericFormat {
                            line,
                            value: lossy(pval),
                        }
                    })?;

                    target
                        .cell(line, index)?
                        .copy_from_slice(&numeric::to_cell(&value));
                    pval.len() - rest.len()
                }

                // Informix reads unparsable numerics as NULL
                None if cx.compat.is_informix() => {
                    cell::set_null_sentinel(ty, target.cell(line, index)?);
                    end
                }

                None => {
                    return Err(Error::NumericFormat {
                        line,
                        value: lossy(pval),
                    })
                }
            }
        }

        Interval | Date | Timestamp => decode_datetime(cx, kind, target, index, pval)?,

        other => {
            return Err(Error::Unsupported {
                line,
                ty: other.name().to_owned(),
            })
        }
    };

    Ok(consumed)
}

fn ends_element(kind: ArrayKind, rest: &[u8]) -> bool {
    match rest.first() {
        None => true,
        Some(&c) => kind.is_delimiter(c) || kind.is_boundary(c),
    }
}

fn decode_char(
    cx: &DecodeContext,
    target: &mut Target<'_>,
    index: usize,
    pval: &[u8],
) -> Result<()> {
    let line = cx.line;
    let ty = target.ty;
    let varcharsize = target.varcharsize;
    let oracle = cx.compat.is_oracle() && ty != HostType::String;
    let size = pval.len();

    let str = target.cell(line, index)?;

    if varcharsize > size {
        if str.len() < varcharsize {
            return Err(Error::HostBuffer {
                line,
                needed: varcharsize,
                len: str.len(),
            });
        }

        if oracle {
            // blank padded and NUL terminated
            str[..varcharsize].fill(b' ');
            str[..size].copy_from_slice(pval);
            str[varcharsize - 1] = 0;
        } else {
            str[..size].copy_from_slice(pval);
            str[size] = 0;
        }

        if ty == HostType::String {
            let mut last = size;
            while last > 0 && (str[last] == b' ' || str[last] == 0) {
                str[last] = 0;
                last -= 1;
            }
        }

        // an empty string reads as NULL for Oracle
        if oracle && size == 0 {
            target.set_indicator(line, index, -1)?;
        }

        return Ok(());
    }

    let charsize = match varcharsize {
        0 => size + 1,
        n => n,
    };

    if str.len() < charsize {
        return Err(Error::HostBuffer {
            line,
            needed: charsize,
            len: str.len(),
        });
    }

    let copied = size.min(charsize);
    str[..copied].copy_from_slice(&pval[..copied]);
    str[copied..charsize].fill(0);

    if oracle && charsize - 1 < size {
        str[charsize - 1] = 0;
    }

    if charsize < size || (oracle && charsize - 1 < size) {
        target.set_indicator(line, index, size as i64)?;
        sqlca::warn_truncated();
    }

    Ok(())
}

fn decode_varchar(
    cx: &DecodeContext,
    target: &mut Target<'_>,
    index: usize,
    pval: &[u8],
) -> Result<()> {
    let line = cx.line;
    let varcharsize = target.varcharsize;
    let size = pval.len();

    let slot = target.cell(line, index)?;
    let room = slot.len() - VARCHAR_HEADER;
    let arr = &mut slot[VARCHAR_HEADER..];

    if varcharsize == 0 {
        if room < size {
            return Err(Error::HostBuffer {
                line,
                needed: VARCHAR_HEADER + size,
                len: VARCHAR_HEADER + room,
            });
        }

        arr[..size].copy_from_slice(pval);
        cell::set_varchar_len(slot, size);
        return Ok(());
    }

    let copied = size.min(varcharsize);
    arr[..copied].copy_from_slice(&pval[..copied]);
    arr[copied..varcharsize].fill(0);
    cell::set_varchar_len(slot, copied);

    if size > varcharsize {
        target.set_indicator(line, index, size as i64)?;
        sqlca::warn_truncated();
    }

    Ok(())
}

fn decode_datetime(
    cx: &DecodeContext,
    kind: ArrayKind,
    target: &mut Target<'_>,
    index: usize,
    pval: &[u8],
) -> Result<usize> {
    let line = cx.line;
    let ty = target.ty;

    let start = usize::from(pval.first() == Some(&b'"'));
    let end = pval[start..]
        .iter()
        .position(|&c| c == b',' || c == b'"' || c == b'}')
        .map_or(pval.len(), |at| start + at);

    let text = std::str::from_utf8(&pval[start..end]).unwrap_or_default();
    let parsed: Option<Vec<u8>> = match ty {
        HostType::Interval => Interval::parse(text).map(|iv| iv.to_cell().to_vec()),
        HostType::Date => datetime::parse_date(text).map(|d| d.to_ne_bytes().to_vec()),
        _ => datetime::parse_timestamp(text).map(|ts| ts.to_ne_bytes().to_vec()),
    };

    let format_error = || {
        let value = lossy(pval);
        match ty {
            HostType::Interval => Error::IntervalFormat { line, value },
            HostType::Date => Error::DateFormat { line, value },
            _ => Error::TimestampFormat { line, value },
        }
    };

    let Some(bytes) = parsed else {
        if cx.compat.is_informix() {
            cell::set_null_sentinel(ty, target.cell(line, index)?);
            return Ok(end);
        }

        return Err(format_error());
    };

    let mut rest = &pval[end..];
    if rest.first() == Some(&b'"') {
        rest = &rest[1..];
    }

    if !kind.is_array() && garbage_left(kind, rest, cx.compat).is_none() {
        return Err(format_error());
    }

    target.cell(line, index)?.copy_from_slice(&bytes);
    Ok(pval.len() - rest.len())
}

/// Text of the longest value in a column, for sizing buffers.
fn longest(result: &QueryResult, field: usize) -> usize {
    (0..result.ntuples())
        .filter_map(|row| result.value(row, field))
        .map(str::len)
        .max()
        .unwrap_or(0)
}

/// Decodes every row of column `field` into `var`.
///
/// Scalar columns fill one element per row. An auto-allocated variable gets a fresh buffer
/// sized to the column first.
pub(crate) fn store_result(
    cx: &DecodeContext,
    result: &QueryResult,
    field: usize,
    kind: ArrayKind,
    var: &mut Variable<'_>,
) -> Result<()> {
    let line = cx.line;
    let ntuples = result.ntuples();

    if !kind.is_array() {
        if (var.arrsize > 0 && ntuples > var.arrsize)
            || (var.ind_arrsize > 0 && ntuples > var.ind_arrsize)
        {
            log::debug!(
                target: "ecpg",
                "on line {}: incorrect number of matches; {} don't fit into array of {}",
                line,
                ntuples,
                var.arrsize
            );
            return Err(Error::TooManyMatches { line });
        }
    } else if var.arrsize == 0 {
        // an array column needs an array variable
        return Err(Error::NoArray { line });
    }

    if let Storage::Auto(slot) = &mut var.storage {
        let (varcharsize, stride) = match var.ty {
            ty if ty.is_char() => {
                let width = longest(result, field) + 1;
                (width, width)
            }
            ty if ty.is_varchar() => {
                let width = match var.varcharsize {
                    0 => longest(result, field),
                    n => n,
                };
                let cell = VARCHAR_HEADER + width;
                let stride = match var.offset {
                    0 => (cell + 3) & !3,
                    n => n.max(cell),
                };
                (width, stride)
            }
            ty => {
                let size = ty.fixed_size().ok_or_else(|| Error::Unsupported {
                    line,
                    ty: ty.name().to_owned(),
                })?;
                let size = if ty == HostType::Bool && var.offset == 4 { 4 } else { size };
                (var.varcharsize, var.offset.max(size))
            }
        };

        let buf = AutoBuffer::for_rows(line, stride, ntuples)?;
        log::trace!(
            target: "ecpg",
            "on line {}: allocated {} bytes for {} tuples",
            line,
            buf.len(),
            ntuples
        );

        **slot = Some(buf);
        var.varcharsize = varcharsize;
        var.offset = stride;
        var.arrsize = ntuples;
    }

    if let Some(Storage::Auto(slot)) = &mut var.ind {
        let stride = var.ind_offset.max(var.ind_ty.fixed_size().unwrap_or(0));
        **slot = Some(AutoBuffer::for_rows(line, stride, ntuples)?);
        var.ind_offset = stride;
        var.ind_arrsize = ntuples;
    }

    let geometry = var.geometry();
    let mut data = var.storage.bytes_mut().ok_or_else(|| Error::Unsupported {
        line,
        ty: geometry.ty.name().to_owned(),
    })?;
    let mut ind = var.ind.as_mut().and_then(Storage::bytes_mut);

    let mut target = Target {
        ty: geometry.ty,
        varcharsize: geometry.varcharsize,
        data: geometry.output_view(line, &mut data)?,
        ind_ty: geometry.ind_ty,
        ind: match &mut ind {
            Some(ind) => Some(geometry.ind_output_view(line, ind)?),
            None => None,
        },
    };

    for row in 0..ntuples {
        get_data(cx, result.value(row, field), kind, &mut target, row)?;
    }

    Ok(())
}
