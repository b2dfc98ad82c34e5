//! Typed header values.
//!
//! A card's value field (bytes 10..80) holds a string, a logical, an integer,
//! a real or a complex pair, optionally followed by a `/` comment. Parsing
//! returns the typed [`Value`] together with the comment; formatting produces
//! the fixed-format field (numbers right-justified to column 30).

use std::fmt::Write as _;

/// A parsed FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS floating-point value.
    Float(f64),
    /// FITS character string (content between single quotes).
    String(String),
    /// FITS complex value `(real, imaginary)`.
    Complex(f64, f64),
}

impl Value {
    /// Integer view, accepting integral floats.
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(n) => Some(n),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(f as i64),
            _ => None,
        }
    }

    /// Float view of any numeric value.
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Integer(n) => Some(n as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }
}

/// Locate a ` /` comment separator in `field` and split there.
///
/// Real-world writers often omit the space after the slash, so only the
/// space before it is required.
fn split_comment(field: &[u8]) -> (&[u8], Option<&str>) {
    let sep = field.windows(2).position(|w| w == b" /");
    // A slash at the very start of an empty value field is a comment too.
    let sep = match sep {
        Some(i) => Some((i, i + 2)),
        None if field.first() == Some(&b'/') => Some((0, 1)),
        None => None,
    };
    match sep {
        Some((end, start)) => {
            let mut start = start;
            if field.get(start) == Some(&b' ') {
                start += 1;
            }
            let comment = std::str::from_utf8(&field[start..])
                .ok()
                .map(str::trim_end)
                .filter(|s| !s.is_empty());
            (&field[..end], comment)
        }
        None => (field, None),
    }
}

/// Parse a quoted string starting at `field[0] == '\''`.
///
/// Doubled quotes are literal quotes; an unterminated string is accepted
/// up to the end of the field.
fn parse_string(field: &[u8]) -> (Value, Option<&str>) {
    let mut text = String::new();
    let mut i = 1;
    while i < field.len() {
        match field[i] {
            b'\'' if field.get(i + 1) == Some(&b'\'') => {
                text.push('\'');
                i += 2;
            }
            b'\'' => {
                i += 1;
                break;
            }
            c => {
                text.push(c as char);
                i += 1;
            }
        }
    }
    let (_, comment) = split_comment(&field[i.min(field.len())..]);
    (Value::String(text.trim_end().to_string()), comment)
}

/// Parse a real, accepting the FITS `D` exponent.
fn parse_float_str(s: &str) -> Option<f64> {
    s.replace(['D', 'd'], "E").parse::<f64>().ok()
}

/// Complex pair: `(re, im)` or two reals separated by whitespace.
fn parse_complex(text: &str) -> Option<Value> {
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let mut parts = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty());
    let re = parse_float_str(parts.next()?)?;
    let im = parse_float_str(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(Value::Complex(re, im))
}

/// Parse the value region of a card (bytes 10..80).
///
/// Leading blanks are skipped, so free-format strings that do not start in
/// column 11 are accepted. Returns `None` for an empty or unparseable value.
pub fn parse_value(value_bytes: &[u8]) -> Option<(Value, Option<&str>)> {
    let start = value_bytes.iter().position(|&b| b != b' ')?;
    let field = &value_bytes[start..];

    if field[0] == b'\'' {
        return Some(parse_string(field));
    }

    let (val_part, comment) = split_comment(field);
    let text = std::str::from_utf8(val_part).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    let value = match text {
        "T" => Value::Logical(true),
        "F" => Value::Logical(false),
        t if t.starts_with('(') => parse_complex(t)?,
        t if !t.contains(['.', 'E', 'e', 'D', 'd']) => match t.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            // Integers too large for i64 fall back to a real.
            Err(_) => Value::Float(parse_float_str(t)?),
        },
        t => Value::Float(parse_float_str(t)?),
    };
    Some((value, comment))
}

/// Format a real so that it re-parses as a real and fits in `max_len` bytes.
fn format_float(f: f64, max_len: usize) -> String {
    if f == 0.0 {
        return String::from("0.0");
    }
    let plain = format!("{f:?}");
    if plain.len() <= max_len && plain.contains(['.', 'e', 'E']) {
        return plain.replace('e', "E");
    }
    let mut precision = 15usize;
    loop {
        let s = format!("{f:.precision$E}");
        if s.len() <= max_len || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}

/// Right-justify `src` within `dest`.
fn right_justify(src: &[u8], dest: &mut [u8]) {
    let len = src.len().min(dest.len());
    let start = dest.len() - len;
    dest.fill(b' ');
    dest[start..].copy_from_slice(&src[..len]);
}

/// Quote `s`, doubling embedded quotes and padding to at least 8 characters.
fn write_string(s: &str, buf: &mut [u8; 70]) {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for ch in s.chars() {
        if quoted.len() >= 68 {
            break;
        }
        if ch == '\'' {
            quoted.push_str("''");
        } else {
            quoted.push(ch);
        }
    }
    while quoted.len() < 9 {
        quoted.push(' ');
    }
    quoted.push('\'');
    let bytes = quoted.as_bytes();
    let len = bytes.len().min(70);
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// Serialize a [`Value`] into the 70-byte value field of a card.
///
/// Numeric and logical values are right-justified in the first 20 bytes
/// (columns 11-30 of the card); strings start with a quote at byte 0.
pub fn format_value(value: &Value) -> [u8; 70] {
    let mut buf = [b' '; 70];
    match value {
        Value::Logical(b) => buf[19] = if *b { b'T' } else { b'F' },
        Value::Integer(n) => right_justify(n.to_string().as_bytes(), &mut buf[..20]),
        Value::Float(f) => right_justify(format_float(*f, 20).as_bytes(), &mut buf[..20]),
        Value::String(s) => write_string(s, &mut buf),
        Value::Complex(re, im) => {
            let mut s = String::from("(");
            let _ = write!(s, "{}, {})", format_float(*re, 20), format_float(*im, 20));
            right_justify(s.as_bytes(), &mut buf[..50]);
        }
    }
    buf
}
