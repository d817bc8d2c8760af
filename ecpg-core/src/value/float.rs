/// Significant digits used when sending floating point values to the server.
pub(crate) const FLOAT_DIGITS: usize = 14;

/// Formats `value` the way C's `%.*g` does.
///
/// Non-finite values are spelled the way the server spells them.
pub(crate) fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }

    let precision = precision.max(1);
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }

    // let the exponent form do the rounding, then decide on the notation
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_owned()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_matches_printf_g() {
        assert_eq!(format_g(0.1, FLOAT_DIGITS), "0.1");
        assert_eq!(format_g(1.0 / 3.0, FLOAT_DIGITS), "0.33333333333333");
        assert_eq!(format_g(100.0, FLOAT_DIGITS), "100");
        assert_eq!(format_g(-2.5, FLOAT_DIGITS), "-2.5");
        assert_eq!(format_g(1e20, FLOAT_DIGITS), "1e+20");
        assert_eq!(format_g(1.5e-7, FLOAT_DIGITS), "1.5e-07");
        assert_eq!(format_g(0.0001, FLOAT_DIGITS), "0.0001");
        assert_eq!(format_g(123456789012346.0, FLOAT_DIGITS), "1.2345678901235e+14");
        assert_eq!(format_g(f64::from(1.1f32), FLOAT_DIGITS), "1.1000000238419");
        assert_eq!(format_g(f64::NEG_INFINITY, FLOAT_DIGITS), "-Infinity");
    }
}
