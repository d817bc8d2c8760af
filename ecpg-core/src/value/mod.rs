//! Conversion between host cells and the text form values take on the wire.

pub(crate) mod cell;
pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod float;
pub(crate) mod number;
