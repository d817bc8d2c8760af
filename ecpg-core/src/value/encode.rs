//! Encoding host cells as statement text or bound parameter values.

use std::fmt::Write;

use byteorder::{ByteOrder, NativeEndian};

use crate::codec::{datetime, numeric};
use crate::error::{Error, Result};
use crate::strided::Strided;
use crate::types::{CompatMode, HostType};
use crate::value::cell;
use crate::value::float::{format_g, FLOAT_DIGITS};
use crate::variable::{Storage, Variable};

/// How an encoded value reaches the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Spliced into the statement text; strings are quoted, arrays use `array [...]`.
    Literal,

    /// Sent as a bound parameter; raw text, arrays use `{...}`.
    Param,
}

/// Backend routine escaping a string literal, quotes included.
pub(crate) type Escape<'c> = &'c dyn Fn(&str) -> Option<String>;

#[derive(Copy, Clone)]
pub(crate) struct EncodeContext<'c> {
    pub(crate) line: i32,
    pub(crate) force_indicator: bool,
    pub(crate) mode: Mode,
    pub(crate) escape: Option<Escape<'c>>,
}

impl<'c> EncodeContext<'c> {
    pub(crate) fn new(line: i32, compat: CompatMode, mode: Mode) -> Self {
        Self {
            line,
            force_indicator: !compat.is_informix(),
            mode,
            escape: None,
        }
    }

    pub(crate) fn escape(mut self, escape: Escape<'c>) -> Self {
        self.escape = Some(escape);
        self
    }
}

/// Quotes `text` as a string constant.
///
/// Text containing a backslash uses the escape string syntax so the result means the same
/// whatever `standard_conforming_strings` is set to.
pub(crate) fn quote_literal(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 3);

    if text.contains('\\') {
        quoted.push('E');
    }

    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');

    quoted
}

/// Quotes `text` as an element of an array literal (`{"a b","c\"d"}`).
fn quote_element(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);

    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');

    quoted
}

/// Whether the first cell of `var` (or its indicator) marks SQL NULL.
fn is_null(cx: &EncodeContext<'_>, var: &Variable<'_>, data: &Strided<'_>) -> Result<bool> {
    let geometry = var.geometry();

    if let Some(ind) = var.ind.as_ref().and_then(Storage::bytes) {
        let view = geometry.ind_input_view(cx.line, &ind)?;
        let value = view
            .get(0)
            .and_then(|cell| cell::read_int(var.ind_ty, cell))
            .unwrap_or(0);

        return Ok(value < 0);
    }

    if var.ind_ty == HostType::NoIndicator && !cx.force_indicator {
        return Ok(data
            .get(0)
            .map_or(false, |cell| cell::is_null_sentinel(var.ty, cell)));
    }

    Ok(false)
}

/// Encodes an input variable.
///
/// Returns `None` for SQL NULL. Descriptor and SQLDA inputs are expanded by the caller and
/// never reach this function.
pub(crate) fn store_input(cx: &EncodeContext<'_>, var: &Variable<'_>) -> Result<Option<String>> {
    let line = cx.line;

    let bytes = match &var.storage {
        Storage::Text(text) => return Ok(Some(text.clone().into_owned())),
        storage => storage.bytes().ok_or_else(|| Error::Unsupported {
            line,
            ty: var.ty.name().to_owned(),
        })?,
    };

    let geometry = var.geometry();
    let data = geometry.input_view(line, &bytes)?;

    if is_null(cx, var, &data)? {
        return Ok(None);
    }

    if var.arrsize <= 1 {
        let cell = data.get(0).ok_or(Error::TooFewArguments { line })?;
        return encode_element(cx, var.ty, cell, false).map(Some);
    }

    let mut out = String::from(match cx.mode {
        Mode::Literal => "array [",
        Mode::Param => "{",
    });

    for index in 0..data.len() {
        if index > 0 {
            out.push(',');
        }

        if let Some(cell) = data.get(index) {
            out.push_str(&encode_element(cx, var.ty, cell, true)?);
        }
    }

    out.push(match cx.mode {
        Mode::Literal => ']',
        Mode::Param => '}',
    });

    Ok(Some(out))
}

fn encode_element(
    cx: &EncodeContext<'_>,
    ty: HostType,
    cell: &[u8],
    in_array: bool,
) -> Result<String> {
    use HostType::*;

    let line = cx.line;

    let text = match ty {
        Short | Int | Long | LongLong => {
            let value = cell::read_int(ty, cell).unwrap_or_default();
            itoa::Buffer::new().format(value).to_owned()
        }

        UnsignedShort | UnsignedInt | UnsignedLong | UnsignedLongLong => {
            let value = cell::read_int(ty, cell).unwrap_or_default() as u64;
            itoa::Buffer::new().format(value).to_owned()
        }

        Float | Double => {
            let value = cell::read_float(ty, cell).unwrap_or_default();
            let text = format_g(value, FLOAT_DIGITS);

            if !value.is_finite() && cx.mode == Mode::Literal {
                format!("'{text}'")
            } else {
                text
            }
        }

        Bool => {
            let value = if cell::read_bool(cell) { "t" } else { "f" };

            match cx.mode {
                Mode::Literal => format!("'{value}'"),
                Mode::Param => value.to_owned(),
            }
        }

        Char | UnsignedChar | String => string_value(cx, cell::c_str(cell), in_array),

        Varchar | Varchar2 => string_value(cx, cell::varchar_data(cell), in_array),

        Numeric | Decimal => numeric::format(&numeric::from_cell(cell)),

        Date => {
            let days = NativeEndian::read_i32(cell);
            let text = datetime::format_date(days).ok_or_else(|| Error::DateFormat {
                line,
                value: days.to_string(),
            })?;
            typed_value(cx, "date", text, in_array)
        }

        Timestamp => {
            let micros = NativeEndian::read_i64(cell);
            let text = datetime::format_timestamp(micros).ok_or_else(|| Error::TimestampFormat {
                line,
                value: micros.to_string(),
            })?;
            typed_value(cx, "timestamp", text, in_array)
        }

        Interval => typed_value(
            cx,
            "interval",
            crate::codec::Interval::from_cell(cell).to_string(),
            in_array,
        ),

        other => {
            return Err(Error::Unsupported {
                line,
                ty: other.name().to_owned(),
            })
        }
    };

    Ok(text)
}

fn string_value(cx: &EncodeContext<'_>, bytes: &[u8], in_array: bool) -> String {
    let text = String::from_utf8_lossy(bytes);

    match cx.mode {
        Mode::Literal => cx
            .escape
            .and_then(|escape| escape(&text))
            .unwrap_or_else(|| quote_literal(&text)),
        Mode::Param if in_array => quote_element(&text),
        Mode::Param => text.into_owned(),
    }
}

fn typed_value(cx: &EncodeContext<'_>, keyword: &str, text: String, in_array: bool) -> String {
    match cx.mode {
        Mode::Literal => {
            let mut out = String::with_capacity(keyword.len() + text.len() + 3);
            let _ = write!(out, "{keyword} '{text}'");
            out
        }
        Mode::Param if in_array => quote_element(&text),
        Mode::Param => text,
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::codec::Interval;
    use crate::variable::{HostArg, VariableList};

    fn encode(mode: Mode, compat: CompatMode, arg: HostArg<'_>) -> Result<Option<String>> {
        let list = VariableList::build(1, "", vec![arg.into()])?;
        store_input(&EncodeContext::new(1, compat, mode), &list.inputs[0])
    }

    fn literal(arg: HostArg<'_>) -> Option<String> {
        encode(Mode::Literal, CompatMode::Pgsql, arg).unwrap()
    }

    fn param(arg: HostArg<'_>) -> Option<String> {
        encode(Mode::Param, CompatMode::Pgsql, arg).unwrap()
    }

    #[test]
    fn it_encodes_scalars() {
        assert_eq!(literal(HostArg::int(42)).as_deref(), Some("42"));
        assert_eq!(literal(HostArg::long(-7)).as_deref(), Some("-7"));
        assert_eq!(literal(HostArg::double(0.1)).as_deref(), Some("0.1"));
        assert_eq!(literal(HostArg::double(f64::NAN)).as_deref(), Some("'NaN'"));
        assert_eq!(param(HostArg::double(f64::NAN)).as_deref(), Some("NaN"));
        assert_eq!(
            literal(HostArg::input(HostType::UnsignedLong, u64::MAX.to_ne_bytes().to_vec()))
                .as_deref(),
            Some("18446744073709551615")
        );
        assert_eq!(
            literal(HostArg::input(HostType::Bool, vec![1])).as_deref(),
            Some("'t'")
        );
        assert_eq!(param(HostArg::input(HostType::Bool, vec![0])).as_deref(), Some("f"));
    }

    #[test]
    fn it_quotes_strings() {
        assert_eq!(literal(HostArg::string("it's")).as_deref(), Some("'it''s'"));
        assert_eq!(literal(HostArg::string(r"a\b")).as_deref(), Some(r"E'a\\b'"));
        assert_eq!(param(HostArg::string("it's")).as_deref(), Some("it's"));

        let mut varchar = vec![0u8; 12];
        cell::set_varchar_len(&mut varchar, 3);
        varchar[4..7].copy_from_slice(b"xyz");
        let arg = HostArg::input(HostType::Varchar, varchar).varcharsize(8);
        assert_eq!(literal(arg).as_deref(), Some("'xyz'"));
    }

    #[test]
    fn it_prefers_the_backend_escape() {
        let list = VariableList::build(1, "", vec![HostArg::string("a'b").into()]).unwrap();
        let escape = |text: &str| Some(format!("$${text}$$"));
        let cx = EncodeContext::new(1, CompatMode::Pgsql, Mode::Literal).escape(&escape);

        assert_eq!(store_input(&cx, &list.inputs[0]).unwrap().as_deref(), Some("$$a'b$$"));
    }

    #[test]
    fn it_rejects_arrays_larger_than_the_buffer() {
        let err = encode(Mode::Literal, CompatMode::Pgsql, HostArg::int(1).arrsize(i64::MAX))
            .unwrap_err();
        assert!(matches!(err, Error::HostBuffer { line: 1, len: 4, .. }));

        let err = encode(
            Mode::Param,
            CompatMode::Pgsql,
            HostArg::int(1).arrsize(2).offset(i64::MAX),
        )
        .unwrap_err();
        assert!(matches!(err, Error::HostBuffer { .. }));
    }

    #[test]
    fn it_encodes_arrays() {
        let mut bytes = Vec::new();
        for v in [1i32, 2, 3] {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }

        let arg = || HostArg::input(HostType::Int, bytes.clone()).arrsize(3);
        assert_eq!(literal(arg()).as_deref(), Some("array [1,2,3]"));
        assert_eq!(param(arg()).as_deref(), Some("{1,2,3}"));

        let words = b"a\"b\0\0c d\0\0".to_vec();
        let arg = || HostArg::input(HostType::Char, words.clone()).varcharsize(5).arrsize(2);
        assert_eq!(literal(arg()).as_deref(), Some("array ['a\"b','c d']"));
        assert_eq!(param(arg()).as_deref(), Some(r#"{"a\"b","c d"}"#));
    }

    #[test]
    fn it_encodes_codec_values() {
        let date = datetime::parse_date("2024-02-29").unwrap();
        let arg = || HostArg::input(HostType::Date, date.to_ne_bytes().to_vec());
        assert_eq!(literal(arg()).as_deref(), Some("date '2024-02-29'"));
        assert_eq!(param(arg()).as_deref(), Some("2024-02-29"));

        let value = numeric::parse("-12.50").unwrap();
        let arg = HostArg::input(HostType::Numeric, numeric::to_cell(&value).to_vec());
        assert_eq!(literal(arg).as_deref(), Some("-12.50"));

        let interval = Interval {
            time: 3_600_000_000,
            month: 0,
        };
        let arg = HostArg::input(HostType::Interval, interval.to_cell().to_vec());
        assert_eq!(literal(arg).as_deref(), Some("interval '01:00:00'"));
    }

    #[test]
    fn it_detects_nulls() {
        let arg = HostArg::int(5).indicator(HostType::Short, Storage::In(Cow::Owned((-1i16).to_ne_bytes().to_vec())));
        assert_eq!(literal(arg), None);

        let arg = HostArg::int(5).indicator(HostType::Short, Storage::In(Cow::Owned(0i16.to_ne_bytes().to_vec())));
        assert_eq!(literal(arg).as_deref(), Some("5"));

        // the in-band pattern only counts where indicators are optional
        assert_eq!(literal(HostArg::int(i32::MIN)).as_deref(), Some("-2147483648"));
        assert_eq!(
            encode(Mode::Literal, CompatMode::Informix, HostArg::int(i32::MIN)).unwrap(),
            None
        );
    }

    #[test]
    fn it_passes_sql_text_through() {
        assert_eq!(literal(HostArg::constant("now()")).as_deref(), Some("now()"));
    }

    #[test]
    fn it_rejects_structs() {
        let err = encode(Mode::Literal, CompatMode::Pgsql, HostArg::input(HostType::Struct, vec![0; 4]))
            .unwrap_err();

        assert!(matches!(err, Error::Unsupported { .. }));
    }
}
