//! Classification of numeric words.
//!
//! A word that starts with a digit (or `.digit`) is lexed greedily and then
//! classified here: integer first, then floating point.

pub(super) enum Number {
    Integer(u64),
    Float(f64),
}

/// Returns `Ok(None)` when the word is neither an integer nor a float.
pub(super) fn classify(word: &str) -> Result<Option<Number>, String> {
    if let Some(value) = parse_integer(word)? {
        return Ok(Some(Number::Integer(value)));
    }
    if let Some(value) = parse_float(word) {
        if value.is_infinite() {
            return Err(format!("Float literal out of range: {}", word));
        }
        return Ok(Some(Number::Float(value)));
    }
    Ok(None)
}

fn parse_integer(word: &str) -> Result<Option<u64>, String> {
    let (digits, radix) = if let Some(rest) = strip_prefix_ci(word, "0x") {
        (rest, 16)
    } else if let Some(rest) = strip_prefix_ci(word, "0b") {
        (rest, 2)
    } else if word.len() > 1 && word.starts_with('0') {
        (&word[1..], 8)
    } else {
        (word, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Ok(None);
    }
    u64::from_str_radix(digits, radix)
        .map(Some)
        .map_err(|_| format!("Integer literal out of range: {}", word))
}

fn parse_float(word: &str) -> Option<f64> {
    match strip_prefix_ci(word, "0x") {
        Some(rest) => parse_hex_float(rest),
        None => parse_decimal_float(word),
    }
}

/// `digits [. digits] [e [+-] digits]`, with at least one mantissa digit.
fn parse_decimal_float(word: &str) -> Option<f64> {
    let (mantissa, exponent) = match word.find(['e', 'E']) {
        Some(at) => (&word[..at], Some(&word[at + 1..])),
        None => (word, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let decimal = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !decimal(int_part) || !decimal(frac_part) {
        return None;
    }
    if let Some(exponent) = exponent {
        let unsigned = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        if unsigned.is_empty() || !decimal(unsigned) {
            return None;
        }
    }
    word.parse().ok()
}

/// `hexdigits [. hexdigits] p [+-] digits`; the binary exponent is required.
fn parse_hex_float(rest: &str) -> Option<f64> {
    let at = rest.find(['p', 'P'])?;
    let (mantissa, exponent) = (&rest[..at], &rest[at + 1..]);
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value = 0.0f64;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    let (negative, digits) = match exponent.as_bytes().first() {
        Some(b'-') => (true, &exponent[1..]),
        Some(b'+') => (false, &exponent[1..]),
        _ => (false, exponent),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let magnitude: i32 = digits.parse().unwrap_or(i32::MAX);
    let exp = if negative { -magnitude } else { magnitude };
    Some(value * 2f64.powi(exp))
}

fn strip_prefix_ci<'a>(word: &'a str, prefix: &str) -> Option<&'a str> {
    let head = word.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &word[prefix.len()..])
}
