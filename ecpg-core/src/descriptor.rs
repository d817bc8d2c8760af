//! SQL descriptors: `ALLOCATE`, `GET`, `SET` and `DEALLOCATE DESCRIPTOR`.
//!
//! A descriptor holds the last result handed to it by a statement, read back with
//! [`Runtime::get_desc`], and a set of numbered items written by [`Runtime::set_desc`] that
//! a later statement binds as its input values.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::QueryResult;
use crate::error::{Error, Result};
use crate::memory::AutoBuffer;
use crate::runtime::{entry, Runtime};
use crate::sqlca;
use crate::typecache::TypeCache;
use crate::types::{dynamic_type, dynamic_type_ddt, ArrayKind, CompatMode};
use crate::value::cell::{self, VARCHAR_HEADER};
use crate::value::decode::{store_result, DecodeContext};
use crate::value::encode::{store_input, EncodeContext, Mode};
use crate::variable::{HostArg, Storage, Variable, VariableList};

/// Width of the length header counted in a type modifier.
const VARHDRSZ: i32 = 4;

/// The items of a descriptor column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DescItem {
    Count = 1,
    Data = 2,
    DiCode = 3,
    DiPrecision = 4,
    Indicator = 5,
    KeyMember = 6,
    Length = 7,
    Name = 8,
    Nullable = 9,
    Octet = 10,
    Precision = 11,
    ReturnedLength = 12,
    ReturnedOctet = 13,
    Scale = 14,
    Type = 15,
    Cardinality = 17,
}

impl DescItem {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        use DescItem::*;

        Some(match code {
            1 => Count,
            2 => Data,
            3 => DiCode,
            4 => DiPrecision,
            5 => Indicator,
            6 => KeyMember,
            7 => Length,
            8 => Name,
            9 => Nullable,
            10 => Octet,
            11 => Precision,
            12 => ReturnedLength,
            13 => ReturnedOctet,
            14 => Scale,
            15 => Type,
            17 => Cardinality,
            _ => return None,
        })
    }

    fn unknown(self, line: i32) -> Error {
        Error::UnknownDescriptorItem {
            line,
            item: self.code().to_string(),
        }
    }
}

/// Values stored by `SET DESCRIPTOR` for one column.
#[derive(Debug, Clone, Default)]
struct DescriptorItem {
    num: usize,

    /// `DATA` encoded for statement text and as a bound parameter; `None` is NULL.
    literal: Option<String>,
    param: Option<String>,

    indicator: i64,
    length: i64,
    precision: i64,
    scale: i64,
    ty: i64,
}

#[derive(Debug)]
struct Descriptor {
    name: String,
    result: Arc<QueryResult>,

    /// Number of input items, from `SET DESCRIPTOR ... COUNT` or the highest item set.
    count: Option<usize>,
    items: Vec<DescriptorItem>,
}

impl Descriptor {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            result: Arc::new(QueryResult::empty()),
            count: None,
            items: Vec::new(),
        }
    }

    fn item_mut(&mut self, index: usize) -> &mut DescriptorItem {
        let at = match self.items.iter().position(|item| item.num == index) {
            Some(at) => at,
            None => {
                self.items.push(DescriptorItem {
                    num: index,
                    ..DescriptorItem::default()
                });

                if self.count.map_or(true, |count| count < index) {
                    self.count = Some(index);
                }

                self.items.len() - 1
            }
        };

        &mut self.items[at]
    }
}

/// The descriptors of one runtime.
#[derive(Debug, Default)]
pub(crate) struct DescriptorRegistry {
    descriptors: Mutex<Vec<Descriptor>>,
}

fn unknown_descriptor(line: i32, name: &str) -> Error {
    Error::UnknownDescriptor {
        line,
        name: name.to_owned(),
    }
}

impl DescriptorRegistry {
    fn with<R>(&self, line: i32, name: &str, f: impl FnOnce(&mut Descriptor) -> R) -> Result<R> {
        let mut descriptors = self.descriptors.lock();
        let desc = descriptors
            .iter_mut()
            .find(|desc| desc.name == name)
            .ok_or_else(|| unknown_descriptor(line, name))?;

        Ok(f(desc))
    }

    fn allocate(&self, name: &str) {
        let mut descriptors = self.descriptors.lock();

        match descriptors.iter_mut().find(|desc| desc.name == name) {
            Some(desc) => *desc = Descriptor::new(name),
            None => descriptors.push(Descriptor::new(name)),
        }
    }

    fn deallocate(&self, line: i32, name: &str) -> Result<()> {
        let mut descriptors = self.descriptors.lock();
        let at = descriptors
            .iter()
            .position(|desc| desc.name == name)
            .ok_or_else(|| unknown_descriptor(line, name))?;

        descriptors.remove(at);
        Ok(())
    }

    pub(crate) fn result(&self, line: i32, name: &str) -> Result<Arc<QueryResult>> {
        self.with(line, name, |desc| Arc::clone(&desc.result))
    }

    /// Replaces the result held by `name`.
    pub(crate) fn set_result(&self, line: i32, name: &str, result: QueryResult) -> Result<()> {
        self.with(line, name, |desc| desc.result = Arc::new(result))
    }

    /// The input values of `name`, in item order, encoded for `mode`.
    ///
    /// Positions without an item and items with a negative indicator are NULL.
    pub(crate) fn inputs(&self, line: i32, name: &str, mode: Mode) -> Result<Vec<Option<String>>> {
        self.with(line, name, |desc| {
            let count = desc.count.unwrap_or(desc.items.len());

            (1..=count)
                .map(|num| {
                    let item = desc.items.iter().find(|item| item.num == num)?;
                    if item.indicator < 0 {
                        return None;
                    }

                    match mode {
                        Mode::Literal => item.literal.clone(),
                        Mode::Param => item.param.clone(),
                    }
                })
                .collect()
        })
    }
}

fn variable<'a>(line: i32, name: &str, arg: HostArg<'a>) -> Result<Variable<'a>> {
    let mut list = VariableList::build(line, name, [arg.into()])?;
    list.inputs
        .pop()
        .ok_or(Error::TooFewArguments { line })
}

/// Stores `value` into element `index` of a numeric host variable.
fn put_int(line: i32, var: &mut Variable<'_>, index: usize, value: i64) -> Result<()> {
    let ty = var.ty;
    if !ty.is_numeric() {
        return Err(Error::VarNotNumeric { line });
    }

    let geometry = var.geometry();
    let mut bytes = var.storage.bytes_mut().ok_or(Error::VarNotNumeric { line })?;
    let mut view = geometry.output_view(line, &mut bytes)?;
    let cell = view
        .get_mut(index)
        .ok_or(Error::TooManyMatches { line })?;

    if !cell::write_int(ty, cell, value) {
        cell::write_float(ty, cell, value as f64);
    }

    Ok(())
}

/// Copies `value` into a character host variable, truncating to its declared size.
fn put_char(line: i32, var: &mut Variable<'_>, value: &str) -> Result<()> {
    let ty = var.ty;
    let varcharsize = var.varcharsize;
    let value = value.as_bytes();

    let mut bytes = var.storage.bytes_mut().ok_or(Error::VarNotChar { line })?;
    let too_small = |needed: usize, len: usize| Error::HostBuffer { line, needed, len };

    if ty.is_char() {
        let size = match varcharsize {
            0 => value.len() + 1,
            n => n,
        };
        if bytes.len() < size {
            return Err(too_small(size, bytes.len()));
        }

        let copied = value.len().min(size);
        bytes[..copied].copy_from_slice(&value[..copied]);
        bytes[copied..size].fill(0);
        return Ok(());
    }

    if ty.is_varchar() {
        let len = match varcharsize {
            0 => value.len(),
            n => value.len().min(n),
        };
        if bytes.len() < VARCHAR_HEADER + len {
            return Err(too_small(VARCHAR_HEADER + len, bytes.len()));
        }

        bytes[VARCHAR_HEADER..VARCHAR_HEADER + len].copy_from_slice(&value[..len]);
        cell::set_varchar_len(&mut bytes, len);
        return Ok(());
    }

    Err(Error::VarNotChar { line })
}

/// Reads an integer out of the first element of an input host variable.
fn get_int(line: i32, var: &Variable<'_>) -> Result<i64> {
    let bytes = var.storage.bytes().ok_or(Error::VarNotNumeric { line })?;
    let view = var.geometry().input_view(line, &bytes)?;
    let cell = view.get(0).ok_or(Error::VarNotNumeric { line })?;

    cell::read_int(var.ty, cell)
        .or_else(|| cell::read_float(var.ty, cell).map(|value| value as i64))
        .ok_or(Error::VarNotNumeric { line })
}

/// Makes room for one element per tuple in a runtime-allocated buffer.
fn allocate_per_tuple(line: i32, var: &mut Variable<'_>, ntuples: usize) -> Result<()> {
    if var.arrsize != 0 {
        return Ok(());
    }

    if let Storage::Auto(slot) = &mut var.storage {
        let stride = var.offset.max(var.ty.fixed_size().unwrap_or(0));
        **slot = Some(AutoBuffer::for_rows(line, stride, ntuples)?);
        var.offset = stride;
        var.arrsize = ntuples;
    }

    Ok(())
}

impl Runtime {
    /// Creates the descriptor `name`, holding an empty result and no items.
    pub fn allocate_desc(&self, line: i32, name: &str) -> Result<()> {
        entry(|| {
            log::debug!(target: "ecpg", "on line {}: allocating descriptor {}", line, name);
            self.descriptors.allocate(name);
            Ok(())
        })
    }

    pub fn deallocate_desc(&self, line: i32, name: &str) -> Result<()> {
        entry(|| self.descriptors.deallocate(line, name))
    }

    /// Number of columns of the result held by `name`.
    pub fn get_desc_header(&self, line: i32, name: &str) -> Result<usize> {
        entry(|| {
            let count = self.descriptors.result(line, name)?.nfields();
            log::debug!(target: "ecpg", "on line {}: descriptor {} has {} fields", line, name, count);

            sqlca::set_rows(1);
            Ok(count)
        })
    }

    /// Declares how many input items `name` carries.
    pub fn set_desc_header(&self, line: i32, name: &str, count: usize) -> Result<()> {
        entry(|| self.descriptors.with(line, name, |desc| desc.count = Some(count)))
    }

    /// Reads items of column `index` (1-based) of the result held by `name`.
    ///
    /// `DATA` and `INDICATOR` receive one element per row; `DATA` is decoded the way a
    /// statement decodes its output variables.
    pub fn get_desc<'a>(
        &self,
        line: i32,
        name: &str,
        index: usize,
        items: impl IntoIterator<Item = (DescItem, HostArg<'a>)>,
    ) -> Result<()> {
        entry(|| self.get_desc_in(line, name, index, items))
    }

    fn get_desc_in<'a>(
        &self,
        line: i32,
        name: &str,
        index: usize,
        items: impl IntoIterator<Item = (DescItem, HostArg<'a>)>,
    ) -> Result<()> {
        let result = self.descriptors.result(line, name)?;
        let ntuples = result.ntuples();

        if index < 1 || index > result.nfields() {
            return Err(Error::InvalidDescriptorIndex { line });
        }

        log::debug!(target: "ecpg", "on line {}: reading items for tuple {}", line, index);

        let field = index - 1;
        let Some(desc) = result.field(field) else {
            return Err(Error::InvalidDescriptorIndex { line });
        };

        let mut data: Option<HostArg<'a>> = None;
        let mut indicator: Option<HostArg<'a>> = None;

        for (item, arg) in items {
            if matches!(
                item,
                DescItem::Data | DescItem::Indicator | DescItem::ReturnedLength | DescItem::ReturnedOctet
            ) && ntuples == 0
            {
                return Err(Error::NotFound { line });
            }

            let value = match item {
                DescItem::Data => {
                    data = Some(arg);
                    continue;
                }
                DescItem::Indicator => {
                    indicator = Some(arg);
                    continue;
                }
                DescItem::Name => {
                    let mut var = variable(line, name, arg)?;
                    put_char(line, &mut var, &desc.name)?;
                    log::trace!(target: "ecpg", "on line {}: NAME = {}", line, desc.name);
                    continue;
                }
                DescItem::ReturnedLength | DescItem::ReturnedOctet => {
                    let mut var = variable(line, name, arg)?;
                    if var.arrsize > 0 && ntuples > var.arrsize {
                        return Err(Error::TooManyMatches { line });
                    }

                    allocate_per_tuple(line, &mut var, ntuples)?;
                    for row in 0..ntuples {
                        put_int(line, &mut var, row, result.length(row, field) as i64)?;
                    }
                    continue;
                }
                DescItem::Nullable => 1,
                DescItem::KeyMember => 0,
                DescItem::Scale => i64::from((desc.modifier - VARHDRSZ) & 0xffff),
                DescItem::Precision => i64::from(desc.modifier >> 16),
                DescItem::Octet => i64::from(desc.size),
                DescItem::Length => i64::from(desc.modifier - VARHDRSZ),
                DescItem::Type => i64::from(dynamic_type(desc.type_oid)),
                DescItem::DiCode => i64::from(dynamic_type_ddt(desc.type_oid)),
                DescItem::Cardinality => ntuples as i64,
                DescItem::Count | DescItem::DiPrecision => return Err(item.unknown(line)),
            };

            log::trace!(target: "ecpg", "on line {}: {:?} = {}", line, item, value);

            let mut var = variable(line, name, arg)?;
            put_int(line, &mut var, 0, value)?;
        }

        if let Some(mut data) = data {
            if let Some(ind) = indicator {
                data.ind_ty = ind.ty;
                data.ind = ind.storage;
                data.ind_varcharsize = ind.varcharsize;
                data.ind_arrsize = ind.arrsize;
                data.ind_offset = ind.offset;
            }

            let kind = self.array_kind_of(line, desc.type_oid)?;
            let cx = DecodeContext {
                line,
                compat: CompatMode::Pgsql,
                force_indicator: false,
            };

            let mut var = variable(line, name, data)?;
            store_result(&cx, &result, field, kind, &mut var)?;
        } else if let Some(ind) = indicator {
            let mut var = variable(line, name, ind)?;
            if var.arrsize > 0 && ntuples > var.arrsize {
                return Err(Error::TooManyMatches { line });
            }

            allocate_per_tuple(line, &mut var, ntuples)?;
            for row in 0..ntuples {
                put_int(line, &mut var, row, -i64::from(result.is_null(row, field)))?;
            }
        }

        sqlca::set_rows(ntuples as i64);
        Ok(())
    }

    /// Array kind of a type, asking the current connection when it is not a builtin.
    fn array_kind_of(&self, line: i32, type_oid: u32) -> Result<ArrayKind> {
        match self.connections.current() {
            Some(conn) => {
                let mut conn = conn.lock();
                let conn = &mut *conn;
                conn.types
                    .array_kind(&mut *conn.backend, line, CompatMode::Pgsql, type_oid)
            }
            None => Ok(TypeCache::new().get(type_oid).unwrap_or(ArrayKind::None)),
        }
    }

    /// Writes items of input column `index` (1-based) of `name`, creating the column.
    ///
    /// `DATA` is encoded like a statement input; the other items are stored as integers.
    pub fn set_desc<'a>(
        &self,
        line: i32,
        name: &str,
        index: usize,
        items: impl IntoIterator<Item = (DescItem, HostArg<'a>)>,
    ) -> Result<()> {
        entry(|| {
            // fail on an unknown descriptor before looking at the items
            self.descriptors.with(line, name, |_| ())?;

            for (item, arg) in items {
                let var = variable(line, name, arg)?;

                match item {
                    DescItem::Data => {
                        let literal = store_input(&EncodeContext::new(line, CompatMode::Pgsql, Mode::Literal), &var)?;
                        let param = store_input(&EncodeContext::new(line, CompatMode::Pgsql, Mode::Param), &var)?;

                        self.descriptors.with(line, name, |desc| {
                            let item = desc.item_mut(index);
                            item.literal = literal;
                            item.param = param;
                        })?;
                    }
                    DescItem::Indicator
                    | DescItem::Length
                    | DescItem::Precision
                    | DescItem::Scale
                    | DescItem::Type => {
                        let value = get_int(line, &var)?;

                        self.descriptors.with(line, name, |desc| {
                            let slot = desc.item_mut(index);
                            match item {
                                DescItem::Indicator => slot.indicator = value,
                                DescItem::Length => slot.length = value,
                                DescItem::Precision => slot.precision = value,
                                DescItem::Scale => slot.scale = value,
                                _ => slot.ty = value,
                            }
                        })?;
                    }
                    other => return Err(other.unknown(line)),
                }
            }

            Ok(())
        })
    }
}
