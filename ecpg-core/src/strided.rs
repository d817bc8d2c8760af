//! Bounds-checked views over caller buffers holding arrays of host cells.
//!
//! A host array is `count` cells of `elem_size` bytes, each starting `stride` bytes after the
//! previous one. The stride is usually the cell size but is larger when the cells are fields
//! of an array of structs. Bounds are checked once, when the view is built, so element access
//! afterwards cannot run past the caller's buffer.

use crate::error::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct TooSmall {
    pub(crate) needed: usize,
    pub(crate) len: usize,
}

impl TooSmall {
    pub(crate) fn at(self, line: i32) -> Error {
        Error::HostBuffer {
            line,
            needed: self.needed,
            len: self.len,
        }
    }
}

/// Bytes spanned by `count` cells, or `None` when that does not fit in `usize`.
fn required(stride: usize, elem_size: usize, count: usize) -> Option<usize> {
    match count {
        0 => Some(0),
        n => (n - 1).checked_mul(stride)?.checked_add(elem_size),
    }
}

fn check(len: usize, stride: usize, elem_size: usize, count: usize) -> Result<(), TooSmall> {
    match required(stride, elem_size, count) {
        Some(needed) if needed <= len => Ok(()),
        needed => Err(TooSmall {
            needed: needed.unwrap_or(usize::MAX),
            len,
        }),
    }
}

/// How many cells of the given geometry fit into `len` bytes.
pub(crate) fn capacity(len: usize, stride: usize, elem_size: usize) -> usize {
    if len < elem_size {
        0
    } else if stride == 0 {
        1
    } else {
        (len - elem_size) / stride + 1
    }
}

#[derive(Debug)]
pub(crate) struct Strided<'b> {
    buf: &'b [u8],
    stride: usize,
    elem_size: usize,
    count: usize,
}

impl<'b> Strided<'b> {
    pub(crate) fn new(
        buf: &'b [u8],
        stride: usize,
        elem_size: usize,
        count: usize,
    ) -> Result<Self, TooSmall> {
        check(buf.len(), stride, elem_size, count)?;

        Ok(Self {
            buf,
            stride,
            elem_size,
            count,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn get(&self, index: usize) -> Option<&'b [u8]> {
        if index >= self.count {
            return None;
        }

        let start = index * self.stride;
        Some(&self.buf[start..start + self.elem_size])
    }
}

#[derive(Debug)]
pub(crate) struct StridedMut<'b> {
    buf: &'b mut [u8],
    stride: usize,
    elem_size: usize,
    count: usize,
}

impl<'b> StridedMut<'b> {
    pub(crate) fn new(
        buf: &'b mut [u8],
        stride: usize,
        elem_size: usize,
        count: usize,
    ) -> Result<Self, TooSmall> {
        check(buf.len(), stride, elem_size, count)?;

        Ok(Self {
            buf,
            stride,
            elem_size,
            count,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub(crate) fn get(&self, index: usize) -> Option<&[u8]> {
        if index >= self.count {
            return None;
        }

        let start = index * self.stride;
        Some(&self.buf[start..start + self.elem_size])
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        if index >= self.count {
            return None;
        }

        let start = index * self.stride;
        Some(&mut self.buf[start..start + self.elem_size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_rejects_short_buffers() {
        let buf = [0u8; 10];

        // three 2-byte cells, 4 bytes apart: 0..2, 4..6, 8..10
        assert!(Strided::new(&buf, 4, 2, 3).is_ok());
        assert_eq!(
            Strided::new(&buf, 4, 4, 3).unwrap_err(),
            TooSmall { needed: 12, len: 10 }
        );
        assert!(Strided::new(&buf, 4, 4, 0).is_ok());
    }

    #[test]
    fn it_rejects_geometries_that_overflow() {
        let buf = [0u8; 10];

        assert_eq!(
            Strided::new(&buf, 4, 4, usize::MAX).unwrap_err(),
            TooSmall {
                needed: usize::MAX,
                len: 10
            }
        );
        assert!(Strided::new(&buf, usize::MAX, 1, 2).is_err());
        assert!(Strided::new(&buf, 0, usize::MAX, 1).is_err());
    }

    #[test]
    fn it_addresses_strided_cells() {
        let mut buf = [0u8; 12];
        let mut view = StridedMut::new(&mut buf, 6, 2, 2).unwrap();

        view.get_mut(1).unwrap().copy_from_slice(&[7, 9]);
        assert!(view.get_mut(2).is_none());

        assert_eq!(&buf[6..8], &[7, 9]);
        assert_eq!(capacity(buf.len(), 6, 2), 2);
        assert_eq!(capacity(1, 6, 2), 0);
    }
}
