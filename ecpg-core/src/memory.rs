//! Buffers the runtime allocates on behalf of output variables.
//!
//! An output variable bound with [`Storage::Auto`](crate::Storage::Auto) receives a buffer
//! sized to the result. Each buffer is also recorded in a per-thread list so that a failed
//! call, or an explicit [`free_auto_mem`], can release everything the thread still holds.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    released: bool,
}

/// Handle to a runtime-allocated output buffer.
///
/// Clones share the same storage. Once released, the buffer is empty and stays empty.
#[derive(Debug, Clone)]
pub struct AutoBuffer(Rc<RefCell<Inner>>);

impl AutoBuffer {
    pub(crate) fn allocate(len: usize) -> Self {
        let buf = AutoBuffer(Rc::new(RefCell::new(Inner {
            data: vec![0; len],
            released: false,
        })));

        AUTO_MEM.with(|list| list.borrow_mut().push(buf.clone()));

        buf
    }

    /// A buffer holding `rows` cells `stride` bytes apart.
    pub(crate) fn for_rows(line: i32, stride: usize, rows: usize) -> Result<Self> {
        let len = stride
            .checked_mul(rows)
            .ok_or(Error::OutOfMemory { line })?;

        Ok(Self::allocate(len))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.0.borrow().released
    }

    pub fn bytes(&self) -> Ref<'_, [u8]> {
        Ref::map(self.0.borrow(), |inner| inner.data.as_slice())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }

    pub(crate) fn bytes_mut(&self) -> RefMut<'_, [u8]> {
        RefMut::map(self.0.borrow_mut(), |inner| inner.data.as_mut_slice())
    }

    fn release(&self) {
        let mut inner = self.0.borrow_mut();
        inner.data = Vec::new();
        inner.released = true;
    }
}

thread_local! {
    static AUTO_MEM: RefCell<Vec<AutoBuffer>> = RefCell::new(Vec::new());
}

/// Forgets the buffers recorded by earlier calls without releasing them.
///
/// Called at the start of every top-level operation so a later failure only releases what
/// that operation allocated.
pub(crate) fn clear_auto_mem() {
    AUTO_MEM.with(|list| list.borrow_mut().clear());
}

/// Releases every buffer recorded on this thread since the last top-level call began.
pub fn free_auto_mem() {
    let pending = AUTO_MEM.with(|list| std::mem::take(&mut *list.borrow_mut()));

    if !pending.is_empty() {
        log::trace!(target: "ecpg", "releasing {} auto-allocated buffers", pending.len());
    }

    for buf in pending {
        buf.release();
    }
}
