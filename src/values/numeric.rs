use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};
use std::str::FromStr;

use crate::global::error::ValueError;

/// Numeric view of a scalar: platform integer, arbitrary-precision integer,
/// or IEEE-754 double. Promotion only ever moves up this lattice; demotion
/// is never required.
#[derive(Debug, Clone, PartialEq)]
pub enum Num {
    Int(i64),
    Big(BigInt),
    Double(f64),
}

impl Num {
    pub fn zero() -> Num {
        Num::Int(0)
    }

    /// Collapses a big integer that fits back into `Int`. Construction-time
    /// convenience only; stored values keep whatever variant produced them.
    pub fn from_big(big: BigInt) -> Num {
        match big.to_i64() {
            Some(i) => Num::Int(i),
            None => Num::Big(big),
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Big(b) => b.to_f64().unwrap_or(f64::INFINITY),
            Num::Double(d) => *d,
        }
    }

    /// Truncating integer view. NaN reads as 0, infinities clamp.
    pub fn to_i64(&self) -> i64 {
        match self {
            Num::Int(i) => *i,
            Num::Big(b) => b.to_i64().unwrap_or(if b.is_negative() {
                i64::MIN
            } else {
                i64::MAX
            }),
            Num::Double(d) => {
                if d.is_nan() {
                    0
                } else if *d >= i64::MAX as f64 {
                    i64::MAX
                } else if *d <= i64::MIN as f64 {
                    i64::MIN
                } else {
                    d.trunc() as i64
                }
            }
        }
    }

    pub fn to_bigint(&self) -> BigInt {
        match self {
            Num::Int(i) => BigInt::from(*i),
            Num::Big(b) => b.clone(),
            Num::Double(d) => {
                if d.is_finite() {
                    BigInt::from(d.trunc() as i128)
                } else {
                    BigInt::zero()
                }
            }
        }
    }

    pub fn is_true(&self) -> bool {
        match self {
            Num::Int(i) => *i != 0,
            Num::Big(b) => !b.is_zero(),
            Num::Double(d) => *d != 0.0,
        }
    }
}

/// Outcome of coercing a string to a number: the numeric value plus whether
/// anything numeric was actually found (an unparseable string coerces to 0
/// and warrants an "uninitialised"-class warning at the call site).
pub struct ParsedNum {
    pub num: Num,
    pub clean: bool,
}

/// String-to-number coercion: strip leading whitespace, accept an optional
/// sign, then take the longest prefix that reads as an integer, float,
/// `0x…`, `0b…`, leading-zero octal, `Inf` or `NaN`. Integral values past
/// double precision become big integers to stay exact.
pub fn parse_numeric(text: &str) -> ParsedNum {
    let s = text.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let lower = s.get(..3).map(|p| p.to_ascii_lowercase());
    if matches!(lower.as_deref(), Some("inf")) {
        let v = if negative { f64::NEG_INFINITY } else { f64::INFINITY };
        return ParsedNum { num: Num::Double(v), clean: true };
    }
    if matches!(lower.as_deref(), Some("nan")) {
        return ParsedNum { num: Num::Double(f64::NAN), clean: true };
    }

    // radix prefixes
    if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return radix_prefix(rest, 16, negative);
    }
    if let Some(rest) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        return radix_prefix(rest, 2, negative);
    }
    if s.len() > 1
        && s.starts_with('0')
        && s.as_bytes()[1].is_ascii_digit()
        && !s.contains('.')
        && !s.contains(['e', 'E'])
    {
        return radix_prefix(&s[1..], 8, negative);
    }

    // decimal: longest prefix of digits [. digits] [e[+-]digits]
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_end = i;
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > i + 1 || int_end > 0 {
            is_float = true;
            i = j;
        }
    }
    if i > 0 && i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_digits_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_digits_start {
            is_float = true;
            i = j;
        }
    }

    if i == 0 {
        return ParsedNum { num: Num::Int(0), clean: false };
    }
    let prefix = &s[..i];
    let clean = i == s.len() || s[i..].trim().is_empty();

    if !is_float {
        // pure integer prefix
        if let Ok(v) = prefix.parse::<i64>() {
            let v = if negative { v.wrapping_neg() } else { v };
            return ParsedNum { num: Num::Int(v), clean };
        }
        if let Ok(b) = BigInt::from_str(prefix) {
            let b = if negative { -b } else { b };
            return ParsedNum { num: Num::Big(b), clean };
        }
    }
    let v = prefix.parse::<f64>().unwrap_or(0.0);
    let v = if negative { -v } else { v };
    ParsedNum { num: Num::Double(v), clean }
}

fn radix_prefix(digits: &str, radix: u32, negative: bool) -> ParsedNum {
    let end = digits
        .bytes()
        .position(|b| !(b as char).is_digit(radix) && b != b'_')
        .unwrap_or(digits.len());
    let run: String = digits[..end].chars().filter(|&c| c != '_').collect();
    if run.is_empty() {
        return ParsedNum { num: Num::Int(0), clean: false };
    }
    let clean = end == digits.len();
    if let Ok(v) = i64::from_str_radix(&run, radix) {
        let v = if negative { -v } else { v };
        return ParsedNum { num: Num::Int(v), clean };
    }
    match BigInt::parse_bytes(run.as_bytes(), radix) {
        Some(b) => {
            let b = if negative { -b } else { b };
            ParsedNum { num: Num::from_big(b), clean }
        }
        None => ParsedNum { num: Num::Int(0), clean: false },
    }
}

/// Formats a double the way Perl stringifies numbers: `%.15g`.
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Inf".into() } else { "-Inf".into() };
    }
    if value == 0.0 {
        return "0".into();
    }
    if value == value.trunc() && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let mut formatted = format!("{:.*e}", 14, value);
    // Rust renders `1.25e2`; %.15g wants `125` or `1.25e+20`.
    if let Some(epos) = formatted.find('e') {
        let exp: i32 = formatted[epos + 1..].parse().unwrap_or(0);
        let mantissa = formatted[..epos].trim_end_matches('0').trim_end_matches('.').to_string();
        if (-4..15).contains(&exp) {
            let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
            let negative = mantissa.starts_with('-');
            let mut out = String::new();
            if negative {
                out.push('-');
            }
            let point = exp + 1;
            if point <= 0 {
                out.push_str("0.");
                for _ in 0..-point {
                    out.push('0');
                }
                out.push_str(digits.trim_end_matches('0'));
            } else if (point as usize) >= digits.len() {
                out.push_str(&digits);
                for _ in 0..(point as usize - digits.len()) {
                    out.push('0');
                }
            } else {
                out.push_str(&digits[..point as usize]);
                let frac = digits[point as usize..].trim_end_matches('0');
                if !frac.is_empty() {
                    out.push('.');
                    out.push_str(frac);
                }
            }
            formatted = out;
        } else {
            formatted = format!("{}e{}{:02}", mantissa, if exp < 0 { "-" } else { "+" }, exp.abs());
        }
    }
    formatted
}

pub fn format_num(num: &Num) -> String {
    match num {
        Num::Int(i) => i.to_string(),
        Num::Big(b) => b.to_string(),
        Num::Double(d) => format_double(*d),
    }
}

// Binary arithmetic under the promotion lattice: Double wins, then Big,
// and Int/Int overflow promotes to Big rather than losing precision.

pub fn add(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Double(_), _) | (_, Num::Double(_)) => Num::Double(a.to_f64() + b.to_f64()),
        (Num::Int(x), Num::Int(y)) => match x.checked_add(*y) {
            Some(v) => Num::Int(v),
            None => Num::Big(BigInt::from(*x) + BigInt::from(*y)),
        },
        _ => Num::Big(a.to_bigint() + b.to_bigint()),
    }
}

pub fn sub(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Double(_), _) | (_, Num::Double(_)) => Num::Double(a.to_f64() - b.to_f64()),
        (Num::Int(x), Num::Int(y)) => match x.checked_sub(*y) {
            Some(v) => Num::Int(v),
            None => Num::Big(BigInt::from(*x) - BigInt::from(*y)),
        },
        _ => Num::Big(a.to_bigint() - b.to_bigint()),
    }
}

pub fn mul(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Double(_), _) | (_, Num::Double(_)) => Num::Double(a.to_f64() * b.to_f64()),
        (Num::Int(x), Num::Int(y)) => match x.checked_mul(*y) {
            Some(v) => Num::Int(v),
            None => Num::Big(BigInt::from(*x) * BigInt::from(*y)),
        },
        _ => Num::Big(a.to_bigint() * b.to_bigint()),
    }
}

/// Division: exact when integral operands divide evenly, floating otherwise.
pub fn div(a: &Num, b: &Num) -> Result<Num, ValueError> {
    match (a, b) {
        (Num::Double(_), _) | (_, Num::Double(_)) => {
            let rhs = b.to_f64();
            if rhs == 0.0 {
                return Err(ValueError::DivideByZero);
            }
            Ok(Num::Double(a.to_f64() / rhs))
        }
        (Num::Int(x), Num::Int(y)) => {
            if *y == 0 {
                return Err(ValueError::DivideByZero);
            }
            match x.checked_rem(*y) {
                Some(0) => match x.checked_div(*y) {
                    Some(q) => Ok(Num::Int(q)),
                    None => Ok(Num::from_big(BigInt::from(*x) / BigInt::from(*y))),
                },
                Some(_) => Ok(Num::Double(*x as f64 / *y as f64)),
                // i64::MIN rem -1 overflows but divides exactly
                None => Ok(Num::from_big(BigInt::from(*x) / BigInt::from(*y))),
            }
        }
        _ => {
            let (x, y) = (a.to_bigint(), b.to_bigint());
            if y.is_zero() {
                return Err(ValueError::DivideByZero);
            }
            if (&x % &y).is_zero() {
                Ok(Num::from_big(x / y))
            } else {
                Ok(Num::Double(a.to_f64() / b.to_f64()))
            }
        }
    }
}

/// `%` with the sign of the right operand, as Perl defines it.
pub fn modulo(a: &Num, b: &Num) -> Result<Num, ValueError> {
    match (a, b) {
        (Num::Big(_), _) | (_, Num::Big(_)) => {
            let (x, y) = (a.to_bigint(), b.to_bigint());
            if y.is_zero() {
                return Err(ValueError::ModuloByZero);
            }
            // floor modulus carries the sign of the right operand
            Ok(Num::from_big(x.mod_floor(&y)))
        }
        _ => {
            let (x, y) = (a.to_i64(), b.to_i64());
            if y == 0 {
                return Err(ValueError::ModuloByZero);
            }
            let mut r = x % y;
            if r != 0 && (r < 0) != (y < 0) {
                r += y;
            }
            Ok(Num::Int(r))
        }
    }
}

pub fn pow(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) if *y >= 0 => {
            if let Ok(exp) = u32::try_from(*y) {
                match x.checked_pow(exp) {
                    Some(v) => Num::Int(v),
                    None => Num::Big(BigInt::from(*x).pow(exp)),
                }
            } else {
                Num::Double((*x as f64).powf(*y as f64))
            }
        }
        (Num::Big(x), Num::Int(y)) if *y >= 0 => match u32::try_from(*y) {
            Ok(exp) => Num::Big(x.pow(exp)),
            Err(_) => Num::Double(a.to_f64().powf(*y as f64)),
        },
        _ => Num::Double(a.to_f64().powf(b.to_f64())),
    }
}

pub fn neg(a: &Num) -> Num {
    match a {
        Num::Int(i) => match i.checked_neg() {
            Some(v) => Num::Int(v),
            None => Num::Big(-BigInt::from(*i)),
        },
        Num::Big(b) => Num::from_big(-b.clone()),
        Num::Double(d) => Num::Double(-d),
    }
}

// Bit operations work on two's-complement representations; mixed widths go
// through BigInt, which models the infinite two's-complement Perl expects.

pub fn bit_and(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x & y),
        _ => Num::from_big(a.to_bigint() & b.to_bigint()),
    }
}

pub fn bit_or(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x | y),
        _ => Num::from_big(a.to_bigint() | b.to_bigint()),
    }
}

pub fn bit_xor(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x ^ y),
        _ => Num::from_big(a.to_bigint() ^ b.to_bigint()),
    }
}

pub fn bit_not(a: &Num) -> Num {
    match a {
        Num::Int(x) => Num::Int(!x),
        _ => Num::from_big(!a.to_bigint()),
    }
}

/// `<<` by a negative count shifts the other way; counts at or past the
/// bit width promote through BigInt instead of being masked.
pub fn shift_left(a: &Num, count: &Num) -> Num {
    let n = count.to_i64();
    if n < 0 {
        return shift_right(a, &Num::Int(n.wrapping_neg()));
    }
    match a {
        Num::Int(x) if n < 63 => match x.checked_shl(n as u32) {
            Some(v) if (v >> n) == *x => Num::Int(v),
            _ => Num::from_big(BigInt::from(*x) << n as usize),
        },
        _ => Num::from_big(a.to_bigint() << n as usize),
    }
}

pub fn shift_right(a: &Num, count: &Num) -> Num {
    let n = count.to_i64();
    if n < 0 {
        return shift_left(a, &Num::Int(n.wrapping_neg()));
    }
    match a {
        Num::Int(x) => {
            if n >= 64 {
                Num::Int(if *x < 0 { -1 } else { 0 })
            } else {
                Num::Int(x >> n)
            }
        }
        _ => Num::from_big(a.to_bigint() >> n as usize),
    }
}

/// Numeric comparison for `<=>` and friends; NaN yields `None`.
pub fn compare(a: &Num, b: &Num) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(y)),
        (Num::Double(_), _) | (_, Num::Double(_)) => {
            a.to_f64().partial_cmp(&b.to_f64())
        }
        _ => Some(a.to_bigint().cmp(&b.to_bigint())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_integers() {
        assert_eq!(parse_numeric("42").num, Num::Int(42));
        assert_eq!(parse_numeric("  -17").num, Num::Int(-17));
        assert_eq!(parse_numeric("9223372036854775807").num, Num::Int(i64::MAX));
    }

    #[test]
    fn parse_overflow_goes_big() {
        let parsed = parse_numeric("18446744073709551615");
        match parsed.num {
            Num::Big(b) => assert_eq!(b.to_string(), "18446744073709551615"),
            other => panic!("expected Big, got {other:?}"),
        }
    }

    #[test]
    fn parse_prefixes() {
        assert_eq!(parse_numeric("0x10").num, Num::Int(16));
        assert_eq!(parse_numeric("0b101").num, Num::Int(5));
        assert_eq!(parse_numeric("017").num, Num::Int(15));
        assert_eq!(parse_numeric("3.5e2").num, Num::Double(350.0));
    }

    #[test]
    fn parse_junk_prefix() {
        let parsed = parse_numeric("12abc");
        assert_eq!(parsed.num, Num::Int(12));
        assert!(!parsed.clean);
        let none = parse_numeric("abc");
        assert_eq!(none.num, Num::Int(0));
        assert!(!none.clean);
    }

    #[test]
    fn int_overflow_promotes() {
        let r = add(&Num::Int(i64::MAX), &Num::Int(1));
        match r {
            Num::Big(b) => assert_eq!(b.to_string(), "9223372036854775808"),
            other => panic!("expected Big, got {other:?}"),
        }
    }

    #[test]
    fn division_exactness() {
        assert_eq!(div(&Num::Int(10), &Num::Int(2)).unwrap(), Num::Int(5));
        assert_eq!(div(&Num::Int(10), &Num::Int(4)).unwrap(), Num::Double(2.5));
        assert!(div(&Num::Int(1), &Num::Int(0)).is_err());
    }

    #[test]
    fn modulo_sign_follows_rhs() {
        assert_eq!(modulo(&Num::Int(-7), &Num::Int(3)).unwrap(), Num::Int(2));
        assert_eq!(modulo(&Num::Int(7), &Num::Int(-3)).unwrap(), Num::Int(-2));
    }

    #[test]
    fn negative_shift_reverses() {
        assert_eq!(shift_left(&Num::Int(8), &Num::Int(-2)), Num::Int(2));
        assert_eq!(shift_right(&Num::Int(2), &Num::Int(-2)), Num::Int(8));
    }

    #[test]
    fn shift_overflow_promotes() {
        let r = shift_left(&Num::Int(1), &Num::Int(70));
        match r {
            Num::Big(b) => assert_eq!(b, BigInt::from(1) << 70usize),
            other => panic!("expected Big, got {other:?}"),
        }
    }

    #[test]
    fn g15_formatting() {
        assert_eq!(format_double(5.0), "5");
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(0.1 + 0.2), "0.3");
        assert_eq!(format_double(1e20), "1e+20");
        assert_eq!(format_double(-2.5), "-2.5");
    }
}
