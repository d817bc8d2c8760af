//! Text and host-cell codecs for the non-primitive value types.
//!
//! All parsing and formatting here is locale independent: the decimal separator is always `.`.

pub mod datetime;
pub mod interval;
pub mod numeric;

pub use interval::Interval;
