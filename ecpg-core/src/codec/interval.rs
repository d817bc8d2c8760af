//! `interval` values: a month count plus a microsecond count.

use std::fmt::{self, Display, Formatter};

use byteorder::{ByteOrder, NativeEndian};

pub const CELL_SIZE: usize = 16;

const USECS_PER_SEC: i64 = 1_000_000;
const USECS_PER_MINUTE: i64 = 60 * USECS_PER_SEC;
const USECS_PER_HOUR: i64 = 60 * USECS_PER_MINUTE;
const USECS_PER_DAY: i64 = 24 * USECS_PER_HOUR;

/// Days and smaller units are folded into `time`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Interval {
    pub time: i64,
    pub month: i32,
}

enum Unit {
    Months(i64),
    Micros(i64),
}

fn unit(word: &str) -> Option<Unit> {
    Some(match word.to_ascii_lowercase().as_str() {
        "year" | "years" | "yr" | "yrs" | "y" => Unit::Months(12),
        "mon" | "mons" | "month" | "months" => Unit::Months(1),
        "week" | "weeks" | "w" => Unit::Micros(7 * USECS_PER_DAY),
        "day" | "days" | "d" => Unit::Micros(USECS_PER_DAY),
        "hour" | "hours" | "hr" | "hrs" | "h" => Unit::Micros(USECS_PER_HOUR),
        "minute" | "minutes" | "min" | "mins" | "m" => Unit::Micros(USECS_PER_MINUTE),
        "second" | "seconds" | "sec" | "secs" | "s" => Unit::Micros(USECS_PER_SEC),
        "millisecond" | "milliseconds" | "msec" | "msecs" | "ms" => Unit::Micros(1_000),
        "microsecond" | "microseconds" | "usec" | "usecs" | "us" => Unit::Micros(1),
        _ => return None,
    })
}

/// A signed decimal number kept exact: `int + frac / 10^scale`.
struct Quantity {
    negative: bool,
    int: i64,
    frac: i64,
    scale: u32,
}

impl Quantity {
    fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };

        let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if int.is_empty() && frac.is_empty() {
            return None;
        }
        if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        // anything past nanoseconds is noise for a microsecond clock
        let frac = &frac[..frac.len().min(9)];

        Some(Quantity {
            negative,
            int: if int.is_empty() { 0 } else { int.parse().ok()? },
            frac: if frac.is_empty() { 0 } else { frac.parse().ok()? },
            scale: frac.len() as u32,
        })
    }

    /// `self * per`, truncated toward zero.
    fn scaled(&self, per: i64) -> Option<i64> {
        let whole = self.int.checked_mul(per)?;
        let part = (i128::from(self.frac) * i128::from(per) / 10i128.pow(self.scale)) as i64;
        let total = whole.checked_add(part)?;

        Some(if self.negative { -total } else { total })
    }
}

fn parse_clock(text: &str) -> Option<i64> {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let mut fields = text.split(':');
    let hours: i64 = fields.next()?.parse().ok()?;
    let minutes: i64 = fields.next()?.parse().ok()?;
    let seconds = match fields.next() {
        Some(secs) => Quantity::parse(secs)?.scaled(USECS_PER_SEC)?,
        None => 0,
    };
    if fields.next().is_some() || minutes >= 60 || seconds >= 60 * USECS_PER_SEC {
        return None;
    }

    let total = hours
        .checked_mul(USECS_PER_HOUR)?
        .checked_add(minutes * USECS_PER_MINUTE)?
        .checked_add(seconds)?;

    Some(if negative { -total } else { total })
}

impl Interval {
    /// Parses the `postgres` and `postgres_verbose` output styles.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace().peekable();
        if words.peek() == Some(&"@") {
            words.next();
        }

        let mut months: i64 = 0;
        let mut time: i64 = 0;
        let mut ago = false;
        let mut seen = false;

        while let Some(word) = words.next() {
            if word.eq_ignore_ascii_case("ago") {
                ago = true;
                continue;
            }

            seen = true;

            if word.contains(':') {
                time = time.checked_add(parse_clock(word)?)?;
                continue;
            }

            // the unit may be glued to the number, as in "3days"
            let split = word
                .find(|c: char| c.is_ascii_alphabetic())
                .unwrap_or(word.len());
            let (number, glued) = word.split_at(split);
            let quantity = Quantity::parse(number)?;

            let unit = if !glued.is_empty() {
                unit(glued)?
            } else {
                match words.peek().and_then(|w| unit(w)) {
                    Some(unit) => {
                        words.next();
                        unit
                    }
                    // a bare number counts seconds
                    None => Unit::Micros(USECS_PER_SEC),
                }
            };

            match unit {
                Unit::Months(per) => {
                    months = months.checked_add(quantity.scaled(per)?)?;

                    // fractional months spill over as 30-day months
                    let whole = quantity.scaled(per)?;
                    let exact = quantity.scaled(per * 30 * USECS_PER_DAY)?;
                    time = time.checked_add(exact - whole * 30 * USECS_PER_DAY)?;
                }
                Unit::Micros(per) => {
                    time = time.checked_add(quantity.scaled(per)?)?;
                }
            }
        }

        if !seen {
            return None;
        }

        if ago {
            months = -months;
            time = -time;
        }

        Some(Interval {
            time,
            month: i32::try_from(months).ok()?,
        })
    }

    pub fn to_cell(&self) -> [u8; CELL_SIZE] {
        let mut cell = [0u8; CELL_SIZE];
        NativeEndian::write_i64(&mut cell[..8], self.time);
        NativeEndian::write_i32(&mut cell[8..12], self.month);
        cell
    }

    pub fn from_cell(cell: &[u8]) -> Self {
        Interval {
            time: NativeEndian::read_i64(&cell[..8]),
            month: NativeEndian::read_i32(&cell[8..12]),
        }
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let years = i64::from(self.month / 12);
        let mons = i64::from(self.month % 12);
        let days = self.time / USECS_PER_DAY;
        let clock = self.time % USECS_PER_DAY;

        let mut first = true;
        let mut sep = |f: &mut Formatter<'_>| {
            if first {
                first = false;
                Ok(())
            } else {
                f.write_str(" ")
            }
        };

        if years != 0 {
            sep(f)?;
            write!(f, "{years} year{}", plural(years))?;
        }
        if mons != 0 {
            sep(f)?;
            write!(f, "{mons} mon{}", plural(mons))?;
        }
        if days != 0 {
            sep(f)?;
            write!(f, "{days} day{}", plural(days))?;
        }

        if clock != 0 || (years == 0 && mons == 0 && days == 0) {
            sep(f)?;

            if clock < 0 {
                f.write_str("-")?;
            }

            let clock = clock.abs();
            write!(
                f,
                "{:02}:{:02}:{:02}",
                clock / USECS_PER_HOUR,
                clock % USECS_PER_HOUR / USECS_PER_MINUTE,
                clock % USECS_PER_MINUTE / USECS_PER_SEC
            )?;

            let micros = clock % USECS_PER_SEC;
            if micros != 0 {
                let digits = format!("{micros:06}");
                write!(f, ".{}", digits.trim_end_matches('0'))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_postgres_style() {
        let iv = Interval::parse("1 year 2 mons 3 days 04:05:06.5").unwrap();

        assert_eq!(iv.month, 14);
        assert_eq!(
            iv.time,
            3 * USECS_PER_DAY + 4 * USECS_PER_HOUR + 5 * USECS_PER_MINUTE + 6_500_000
        );
        assert_eq!(iv.to_string(), "1 year 2 mons 3 days 04:05:06.5");
    }

    #[test]
    fn it_parses_verbose_style() {
        let iv = Interval::parse("@ 1 day 2 hours ago").unwrap();

        assert_eq!(iv.month, 0);
        assert_eq!(iv.time, -(USECS_PER_DAY + 2 * USECS_PER_HOUR));
        assert_eq!(iv.to_string(), "-1 days -02:00:00");
        assert_eq!(Interval::parse(&iv.to_string()), Some(iv));
    }

    #[test]
    fn it_handles_fractions_and_bare_numbers() {
        assert_eq!(
            Interval::parse("1.5 hours").unwrap().time,
            USECS_PER_HOUR + 30 * USECS_PER_MINUTE
        );
        assert_eq!(Interval::parse("90").unwrap().time, 90 * USECS_PER_SEC);
        assert_eq!(Interval::parse("3days").unwrap().time, 3 * USECS_PER_DAY);
        assert_eq!(
            Interval::parse("0.5 mon"),
            Some(Interval {
                time: 15 * USECS_PER_DAY,
                month: 0
            })
        );
        assert_eq!(Interval::default().to_string(), "00:00:00");
    }

    #[test]
    fn it_rejects_garbage() {
        assert_eq!(Interval::parse(""), None);
        assert_eq!(Interval::parse("1 fortnight"), None);
        assert_eq!(Interval::parse("10:99"), None);
    }

    #[test]
    fn it_round_trips_cells() {
        let iv = Interval {
            time: -42,
            month: 7,
        };

        assert_eq!(Interval::from_cell(&iv.to_cell()), iv);
    }
}
