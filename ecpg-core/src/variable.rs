//! Host variables as passed by generated code.
//!
//! A statement receives one ordered stream of [`Arg`]s: the input variables, an
//! [`Arg::EndOfInput`] marker, then the output variables. [`VariableList::build`] validates
//! and normalizes the stream; order is preserved since it decides positional binding.

use std::borrow::Cow;
use std::cell::RefMut;
use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};
use crate::memory::AutoBuffer;
use crate::sqlda::Sqlda;
use crate::strided::{self, Strided, StridedMut};
use crate::types::HostType;
use crate::value::cell::VARCHAR_HEADER;

/// Where a host variable lives.
#[derive(Debug)]
pub enum Storage<'a> {
    /// Bytes of an input variable.
    In(Cow<'a, [u8]>),

    /// A caller buffer that receives output.
    Out(&'a mut [u8]),

    /// Output into a buffer the runtime allocates to fit the result.
    Auto(&'a mut Option<AutoBuffer>),

    /// SQL text spliced into the statement as is (`const` and `char_variable`).
    Text(Cow<'a, str>),

    /// Name of a SQL descriptor.
    Descriptor(Cow<'a, str>),

    /// Receives one SQLDA per result row.
    Sqlda(&'a mut Vec<Sqlda>),
}

/// One host variable with its optional indicator, as generated code describes it.
///
/// Sizes are signed because a negative size is the caller's way of saying "unbounded"; they
/// are normalized to zero when the statement is built.
#[derive(Debug)]
pub struct HostArg<'a> {
    pub(crate) ty: HostType,
    pub(crate) storage: Option<Storage<'a>>,
    pub(crate) varcharsize: i64,
    pub(crate) arrsize: i64,
    pub(crate) offset: i64,

    pub(crate) ind_ty: HostType,
    pub(crate) ind: Option<Storage<'a>>,
    pub(crate) ind_varcharsize: i64,
    pub(crate) ind_arrsize: i64,
    pub(crate) ind_offset: i64,
}

impl<'a> HostArg<'a> {
    /// A scalar of type `ty`; the stride defaults to the width of the type.
    pub fn new(ty: HostType, storage: Option<Storage<'a>>) -> Self {
        HostArg {
            ty,
            storage,
            varcharsize: 1,
            arrsize: 1,
            offset: ty.fixed_size().unwrap_or(0) as i64,
            ind_ty: HostType::NoIndicator,
            ind: None,
            ind_varcharsize: 0,
            ind_arrsize: 0,
            ind_offset: 0,
        }
    }

    pub fn input(ty: HostType, bytes: impl Into<Cow<'a, [u8]>>) -> Self {
        HostArg::new(ty, Some(Storage::In(bytes.into())))
    }

    pub fn output(ty: HostType, buf: &'a mut [u8]) -> Self {
        HostArg::new(ty, Some(Storage::Out(buf)))
    }

    /// Output into a runtime-allocated buffer sized to the result.
    pub fn auto(ty: HostType, slot: &'a mut Option<AutoBuffer>) -> Self {
        HostArg::new(ty, Some(Storage::Auto(slot)))
            .varcharsize(0)
            .arrsize(0)
    }

    pub fn int(value: i32) -> Self {
        HostArg::input(HostType::Int, value.to_ne_bytes().to_vec())
    }

    pub fn long(value: i64) -> Self {
        HostArg::input(HostType::Long, value.to_ne_bytes().to_vec())
    }

    pub fn double(value: f64) -> Self {
        HostArg::input(HostType::Double, value.to_ne_bytes().to_vec())
    }

    /// A NUL-terminated `char` input.
    pub fn string(value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);

        let len = bytes.len() as i64;
        HostArg::input(HostType::Char, bytes)
            .varcharsize(len)
            .offset(len)
    }

    /// SQL text inserted verbatim.
    pub fn constant(text: impl Into<Cow<'a, str>>) -> Self {
        HostArg::new(HostType::Const, Some(Storage::Text(text.into())))
    }

    pub fn char_variable(text: impl Into<Cow<'a, str>>) -> Self {
        HostArg::new(HostType::CharVariable, Some(Storage::Text(text.into())))
    }

    pub fn descriptor(name: impl Into<Cow<'a, str>>) -> Self {
        HostArg::new(HostType::Descriptor, Some(Storage::Descriptor(name.into())))
    }

    pub fn sqlda(target: &'a mut Vec<Sqlda>) -> Self {
        HostArg::new(HostType::Sqlda, Some(Storage::Sqlda(target)))
    }

    pub fn varcharsize(mut self, size: i64) -> Self {
        self.varcharsize = size;
        self
    }

    pub fn arrsize(mut self, size: i64) -> Self {
        self.arrsize = size;
        self
    }

    /// Distance in bytes between consecutive array elements.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn indicator(mut self, ty: HostType, storage: Storage<'a>) -> Self {
        self.ind_ty = ty;
        self.ind_offset = ty.fixed_size().unwrap_or(0) as i64;
        self.ind_arrsize = 1;
        self.ind_varcharsize = 1;
        self.ind = Some(storage);
        self
    }

    pub fn ind_arrsize(mut self, size: i64) -> Self {
        self.ind_arrsize = size;
        self
    }

    pub fn ind_offset(mut self, offset: i64) -> Self {
        self.ind_offset = offset;
        self
    }

    pub fn ind_varcharsize(mut self, size: i64) -> Self {
        self.ind_varcharsize = size;
        self
    }
}

/// An element of the argument stream of a statement.
#[derive(Debug)]
pub enum Arg<'a> {
    Var(HostArg<'a>),

    /// Separates the input variables from the output variables.
    EndOfInput,

    /// Ends the stream; anything after it is ignored.
    EndOfList,
}

impl<'a> From<HostArg<'a>> for Arg<'a> {
    fn from(arg: HostArg<'a>) -> Self {
        Arg::Var(arg)
    }
}

/// A validated host variable.
#[derive(Debug)]
pub(crate) struct Variable<'a> {
    pub(crate) ty: HostType,
    pub(crate) storage: Storage<'a>,
    pub(crate) varcharsize: usize,
    pub(crate) arrsize: usize,
    pub(crate) offset: usize,

    pub(crate) ind_ty: HostType,
    pub(crate) ind: Option<Storage<'a>>,
    pub(crate) ind_varcharsize: usize,
    pub(crate) ind_arrsize: usize,
    pub(crate) ind_offset: usize,
}

/// Read access to the bytes behind a [`Storage`].
pub(crate) enum Bytes<'s> {
    Slice(&'s [u8]),
    Auto(std::cell::Ref<'s, [u8]>),
}

impl Deref for Bytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Slice(bytes) => bytes,
            Bytes::Auto(bytes) => bytes,
        }
    }
}

/// Write access to the bytes behind a [`Storage`].
pub(crate) enum BytesMut<'s> {
    Slice(&'s mut [u8]),
    Auto(RefMut<'s, [u8]>),
}

impl Deref for BytesMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BytesMut::Slice(bytes) => bytes,
            BytesMut::Auto(bytes) => bytes,
        }
    }
}

impl DerefMut for BytesMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            BytesMut::Slice(bytes) => bytes,
            BytesMut::Auto(bytes) => bytes,
        }
    }
}

impl Storage<'_> {
    pub(crate) fn bytes(&self) -> Option<Bytes<'_>> {
        match self {
            Storage::In(bytes) => Some(Bytes::Slice(bytes)),
            Storage::Out(bytes) => Some(Bytes::Slice(bytes)),
            Storage::Auto(Some(buf)) => Some(Bytes::Auto(buf.bytes())),
            _ => None,
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> Option<BytesMut<'_>> {
        match self {
            Storage::Out(bytes) => Some(BytesMut::Slice(bytes)),
            Storage::Auto(Some(buf)) => Some(BytesMut::Auto(buf.bytes_mut())),
            _ => None,
        }
    }
}

fn non_negative(size: i64) -> usize {
    size.max(0) as usize
}

impl<'a> Variable<'a> {
    fn from_arg(line: i32, statement: &str, arg: HostArg<'a>) -> Result<Self> {
        // a missing pointer means generated code never prepared the statement
        let storage = arg.storage.ok_or_else(|| Error::InvalidStatement {
            line,
            name: statement.to_owned(),
        })?;

        let (ind_ty, ind) = match arg.ind {
            Some(ind) if arg.ind_ty != HostType::NoIndicator => (arg.ind_ty, Some(ind)),
            _ => (HostType::NoIndicator, None),
        };

        Ok(Variable {
            ty: arg.ty,
            storage,
            varcharsize: non_negative(arg.varcharsize),
            arrsize: non_negative(arg.arrsize),
            offset: non_negative(arg.offset),
            ind_ty,
            ind,
            ind_varcharsize: non_negative(arg.ind_varcharsize),
            ind_arrsize: non_negative(arg.ind_arrsize),
            ind_offset: non_negative(arg.ind_offset),
        })
    }

    pub(crate) fn descriptor_name(&self) -> Option<&str> {
        match &self.storage {
            Storage::Descriptor(name) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn geometry(&self) -> Geometry {
        Geometry {
            ty: self.ty,
            varcharsize: self.varcharsize,
            arrsize: self.arrsize,
            offset: self.offset,
            ind_ty: self.ind_ty,
            ind_arrsize: self.ind_arrsize,
            ind_offset: self.ind_offset,
        }
    }
}

/// The shape of a variable's cells, detached from its storage.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Geometry {
    pub(crate) ty: HostType,
    pub(crate) varcharsize: usize,
    pub(crate) arrsize: usize,
    pub(crate) offset: usize,
    pub(crate) ind_ty: HostType,
    pub(crate) ind_arrsize: usize,
    pub(crate) ind_offset: usize,
}

impl Geometry {
    /// Width of one element in bytes, given the length of the buffer holding the elements.
    pub(crate) fn elem_size(&self, line: i32, buf_len: usize) -> Result<usize> {
        use HostType::*;

        let unbounded = || match self.offset {
            0 => buf_len,
            stride => stride.min(buf_len),
        };

        Ok(match self.ty {
            Char | UnsignedChar | String => match self.varcharsize {
                0 => unbounded(),
                n => n,
            },
            Varchar | Varchar2 => match self.varcharsize {
                0 => unbounded().max(VARCHAR_HEADER),
                n => VARCHAR_HEADER + n,
            },
            // a C++ bool is as wide as an int
            Bool => match self.offset {
                0 | 1 => 1,
                4 => 4,
                _ => return Err(Error::ConvertBool { line, value: None }),
            },
            ty => ty.fixed_size().ok_or_else(|| Error::Unsupported {
                line,
                ty: ty.name().to_owned(),
            })?,
        })
    }

    pub(crate) fn stride(&self, elem_size: usize) -> usize {
        match self.offset {
            0 => elem_size,
            stride => stride.max(elem_size),
        }
    }

    /// Number of elements an input variable contributes.
    pub(crate) fn input_count(&self) -> usize {
        self.arrsize.max(1)
    }

    pub(crate) fn input_view<'s>(&self, line: i32, bytes: &'s [u8]) -> Result<Strided<'s>> {
        let elem = self.elem_size(line, bytes.len())?;
        Strided::new(bytes, self.stride(elem), elem, self.input_count()).map_err(|e| e.at(line))
    }

    pub(crate) fn output_view<'s>(&self, line: i32, bytes: &'s mut [u8]) -> Result<StridedMut<'s>> {
        let elem = self.elem_size(line, bytes.len())?;
        let stride = self.stride(elem);
        let count = match self.arrsize {
            0 => strided::capacity(bytes.len(), stride, elem),
            n => n,
        };

        StridedMut::new(bytes, stride, elem, count).map_err(|e| e.at(line))
    }

    fn ind_elem_size(&self) -> usize {
        self.ind_ty.fixed_size().unwrap_or(0)
    }

    fn ind_stride(&self) -> usize {
        match self.ind_offset {
            0 => self.ind_elem_size(),
            stride => stride.max(self.ind_elem_size()),
        }
    }

    pub(crate) fn ind_input_view<'s>(&self, line: i32, bytes: &'s [u8]) -> Result<Strided<'s>> {
        let elem = self.ind_elem_size();
        Strided::new(bytes, self.ind_stride(), elem, self.ind_arrsize.max(1))
            .map_err(|e| e.at(line))
    }

    pub(crate) fn ind_output_view<'s>(
        &self,
        line: i32,
        bytes: &'s mut [u8],
    ) -> Result<StridedMut<'s>> {
        let elem = self.ind_elem_size();
        let stride = self.ind_stride();
        let count = match self.ind_arrsize {
            0 => strided::capacity(bytes.len(), stride, elem),
            n => n,
        };

        StridedMut::new(bytes, stride, elem, count).map_err(|e| e.at(line))
    }
}

/// The input and output variables of one statement.
#[derive(Debug, Default)]
pub(crate) struct VariableList<'a> {
    pub(crate) inputs: Vec<Variable<'a>>,
    pub(crate) outputs: Vec<Variable<'a>>,
}

impl<'a> VariableList<'a> {
    pub(crate) fn build(
        line: i32,
        statement: &str,
        args: impl IntoIterator<Item = Arg<'a>>,
    ) -> Result<Self> {
        let mut list = VariableList::default();
        let mut outputs = false;

        for arg in args {
            match arg {
                Arg::EndOfInput => outputs = true,
                Arg::EndOfList => break,
                Arg::Var(arg) => {
                    let var = Variable::from_arg(line, statement, arg)?;
                    if outputs {
                        list.outputs.push(var);
                    } else {
                        list.inputs.push(var);
                    }
                }
            }
        }

        Ok(list)
    }
}
