//! Exact compile-time constant values.
//!
//! Integers are arbitrary precision, floats are exact rationals and complex
//! numbers are pairs of rationals. Nothing here ever rounds: rounding to a
//! concrete machine type is the job of whoever consumes the constant.

use std::fmt;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::error::{Error, Result};
use crate::token::{BinaryOp, UnaryOp};

/// The representation class of a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConstKind {
    Bool,
    String,
    Int,
    Float,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Bool(bool),
    Str(String),
    Int(BigInt),
    Float(BigRational),
    Complex(BigRational, BigRational),
}

impl ConstValue {
    pub fn int(v: i64) -> Self {
        ConstValue::Int(BigInt::from(v))
    }

    pub fn float(num: i64, den: i64) -> Self {
        ConstValue::Float(BigRational::new(BigInt::from(num), BigInt::from(den)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        ConstValue::Str(s.into())
    }

    pub fn kind(&self) -> ConstKind {
        match self {
            ConstValue::Bool(_) => ConstKind::Bool,
            ConstValue::Str(_) => ConstKind::String,
            ConstValue::Int(_) => ConstKind::Int,
            ConstValue::Float(_) => ConstKind::Float,
            ConstValue::Complex(..) => ConstKind::Complex,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConstValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an `i64`, if it is integral and in range.
    pub fn to_i64(&self) -> Option<i64> {
        match self.to_int()? {
            ConstValue::Int(i) => i.to_i64(),
            _ => None,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        match self.to_int()? {
            ConstValue::Int(i) => i.to_u64(),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            ConstValue::Int(i) => i.to_f64(),
            ConstValue::Float(r) => r.to_f64(),
            ConstValue::Complex(re, im) if im.is_zero() => re.to_f64(),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            ConstValue::Bool(b) => !b,
            ConstValue::Str(s) => s.is_empty(),
            ConstValue::Int(i) => i.is_zero(),
            ConstValue::Float(r) => r.is_zero(),
            ConstValue::Complex(re, im) => re.is_zero() && im.is_zero(),
        }
    }

    /// Converts a numeric constant to an integer if that is exact.
    pub fn to_int(&self) -> Option<ConstValue> {
        match self {
            ConstValue::Int(_) => Some(self.clone()),
            ConstValue::Float(r) if r.is_integer() => Some(ConstValue::Int(r.to_integer())),
            ConstValue::Complex(re, im) if im.is_zero() && re.is_integer() => {
                Some(ConstValue::Int(re.to_integer()))
            }
            _ => None,
        }
    }

    /// Converts a numeric constant to a float if that is exact.
    pub fn to_float(&self) -> Option<ConstValue> {
        match self {
            ConstValue::Int(i) => Some(ConstValue::Float(BigRational::from_integer(i.clone()))),
            ConstValue::Float(_) => Some(self.clone()),
            ConstValue::Complex(re, im) if im.is_zero() => Some(ConstValue::Float(re.clone())),
            _ => None,
        }
    }

    pub fn to_complex(&self) -> Option<ConstValue> {
        match self {
            ConstValue::Int(_) | ConstValue::Float(_) => {
                let ConstValue::Float(re) = self.to_float()? else {
                    return None;
                };
                Some(ConstValue::Complex(re, BigRational::zero()))
            }
            ConstValue::Complex(..) => Some(self.clone()),
            _ => None,
        }
    }

    /// Brings a numeric value up to the given representation class.
    fn promote(&self, kind: ConstKind) -> Option<ConstValue> {
        match kind {
            ConstKind::Int => self.to_int(),
            ConstKind::Float => self.to_float(),
            ConstKind::Complex => self.to_complex(),
            _ if self.kind() == kind => Some(self.clone()),
            _ => None,
        }
    }

    pub fn real(&self) -> Option<ConstValue> {
        match self.to_complex()? {
            ConstValue::Complex(re, _) => Some(ConstValue::Float(re)),
            _ => None,
        }
    }

    pub fn imag(&self) -> Option<ConstValue> {
        match self.to_complex()? {
            ConstValue::Complex(_, im) => Some(ConstValue::Float(im)),
            _ => None,
        }
    }

    pub fn make_complex(re: &ConstValue, im: &ConstValue) -> Option<ConstValue> {
        match (re.to_float()?, im.to_float()?) {
            (ConstValue::Float(re), ConstValue::Float(im)) => Some(ConstValue::Complex(re, im)),
            _ => None,
        }
    }
}

fn unsupported(op: impl fmt::Display, x: &ConstValue, y: &ConstValue) -> Error {
    eyre::eyre!("invalid constant operation {x} {op} {y}").into()
}

/// Evaluates `x op y` exactly. Comparisons are handled by [`compare`] and
/// shifts by [`shift`].
pub fn binary_op(x: &ConstValue, op: BinaryOp, y: &ConstValue) -> Result<ConstValue> {
    if op.is_comparison() {
        return compare(x, op, y).map(ConstValue::Bool);
    }
    if op.is_shift() {
        let count = y
            .to_u64()
            .ok_or_else(|| unsupported(op, x, y))?;
        return shift(x, op, count);
    }
    match (x, y) {
        (ConstValue::Bool(a), ConstValue::Bool(b)) => match op {
            BinaryOp::LAnd => Ok(ConstValue::Bool(*a && *b)),
            BinaryOp::LOr => Ok(ConstValue::Bool(*a || *b)),
            _ => Err(unsupported(op, x, y)),
        },
        (ConstValue::Str(a), ConstValue::Str(b)) if op == BinaryOp::Add => {
            Ok(ConstValue::Str(format!("{a}{b}")))
        }
        _ => {
            let kind = x.kind().max(y.kind());
            let (Some(a), Some(b)) = (x.promote(kind), y.promote(kind)) else {
                return Err(unsupported(op, x, y));
            };
            numeric_op(&a, op, &b).ok_or_else(|| unsupported(op, x, y))
        }
    }
}

fn numeric_op(x: &ConstValue, op: BinaryOp, y: &ConstValue) -> Option<ConstValue> {
    match (x, y) {
        (ConstValue::Int(a), ConstValue::Int(b)) => {
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Quo if !b.is_zero() => a / b,
                BinaryOp::Rem if !b.is_zero() => a % b,
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
                BinaryOp::AndNot => a & !b,
                _ => return None,
            };
            Some(ConstValue::Int(v))
        }
        (ConstValue::Float(a), ConstValue::Float(b)) => {
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Quo if !b.is_zero() => a / b,
                _ => return None,
            };
            Some(ConstValue::Float(v))
        }
        (ConstValue::Complex(ar, ai), ConstValue::Complex(br, bi)) => {
            let (re, im) = match op {
                BinaryOp::Add => (ar + br, ai + bi),
                BinaryOp::Sub => (ar - br, ai - bi),
                BinaryOp::Mul => (ar * br - ai * bi, ar * bi + ai * br),
                BinaryOp::Quo => {
                    let denom = br * br + bi * bi;
                    if denom.is_zero() {
                        return None;
                    }
                    (
                        (ar * br + ai * bi) / &denom,
                        (ai * br - ar * bi) / &denom,
                    )
                }
                _ => return None,
            };
            Some(ConstValue::Complex(re, im))
        }
        _ => None,
    }
}

pub fn shift(x: &ConstValue, op: BinaryOp, count: u64) -> Result<ConstValue> {
    let Some(ConstValue::Int(v)) = x.to_int() else {
        bail!("shift of non-integer constant {x}");
    };
    let count = usize::try_from(count).map_err(|_| eyre::eyre!("shift count {count} too large"))?;
    match op {
        BinaryOp::Shl => Ok(ConstValue::Int(v << count)),
        // Arithmetic shift: rounds towards negative infinity.
        BinaryOp::Shr => Ok(ConstValue::Int(v >> count)),
        _ => bail!("{op} is not a shift"),
    }
}

pub fn compare(x: &ConstValue, op: BinaryOp, y: &ConstValue) -> Result<bool> {
    use std::cmp::Ordering;

    let ordering: Option<Ordering> = match (x, y) {
        (ConstValue::Bool(a), ConstValue::Bool(b)) => match op {
            BinaryOp::Eql => return Ok(a == b),
            BinaryOp::Neq => return Ok(a != b),
            _ => None,
        },
        (ConstValue::Str(a), ConstValue::Str(b)) => Some(a.cmp(b)),
        _ => {
            let kind = x.kind().max(y.kind());
            match (x.promote(kind), y.promote(kind)) {
                (Some(ConstValue::Int(a)), Some(ConstValue::Int(b))) => Some(a.cmp(&b)),
                (Some(ConstValue::Float(a)), Some(ConstValue::Float(b))) => Some(a.cmp(&b)),
                (Some(ConstValue::Complex(ar, ai)), Some(ConstValue::Complex(br, bi))) => {
                    let eq = ar == br && ai == bi;
                    match op {
                        BinaryOp::Eql => return Ok(eq),
                        BinaryOp::Neq => return Ok(!eq),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
    };
    let ordering = ordering.ok_or_else(|| unsupported(op, x, y))?;
    Ok(match op {
        BinaryOp::Eql => ordering == Ordering::Equal,
        BinaryOp::Neq => ordering != Ordering::Equal,
        BinaryOp::Lss => ordering == Ordering::Less,
        BinaryOp::Leq => ordering != Ordering::Greater,
        BinaryOp::Gtr => ordering == Ordering::Greater,
        BinaryOp::Geq => ordering != Ordering::Less,
        _ => return Err(unsupported(op, x, y)),
    })
}

/// Evaluates a unary operator. `prec` is the bit width of the operand's
/// unsigned type for `^x` (0 for signed or untyped operands).
pub fn unary_op(op: UnaryOp, x: &ConstValue, prec: u32) -> Result<ConstValue> {
    match (op, x) {
        (UnaryOp::Pos, _) => Ok(x.clone()),
        (UnaryOp::Neg, ConstValue::Int(v)) => Ok(ConstValue::Int(-v)),
        (UnaryOp::Neg, ConstValue::Float(v)) => Ok(ConstValue::Float(-v)),
        (UnaryOp::Neg, ConstValue::Complex(re, im)) => Ok(ConstValue::Complex(-re, -im)),
        (UnaryOp::Not, ConstValue::Bool(b)) => Ok(ConstValue::Bool(!b)),
        (UnaryOp::Xor, ConstValue::Int(v)) => {
            if prec == 0 {
                Ok(ConstValue::Int(!v))
            } else {
                let mask = (BigInt::one() << prec as usize) - BigInt::one();
                Ok(ConstValue::Int(v ^ mask))
            }
        }
        _ => bail!("invalid constant operation {op}{x}"),
    }
}

fn fmt_rational(r: &BigRational, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if r.is_integer() {
        return write!(f, "{}", r.numer());
    }
    match r.to_f64() {
        Some(v) if v.is_finite() && BigRational::from_float(v).as_ref() == Some(r) => {
            write!(f, "{v}")
        }
        _ => {
            let sign = if r.is_negative() { "-" } else { "" };
            write!(f, "{sign}{}/{}", r.numer().abs(), r.denom())
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::Str(s) => write!(f, "\"{}\"", crate::pretty::escape_string(s)),
            ConstValue::Int(i) => write!(f, "{i}"),
            ConstValue::Float(r) => fmt_rational(r, f),
            ConstValue::Complex(re, im) => {
                write!(f, "(")?;
                fmt_rational(re, f)?;
                write!(f, " + ")?;
                fmt_rational(im, f)?;
                write!(f, "i)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_is_exact() {
        let big = shift(&ConstValue::int(1), BinaryOp::Shl, 100).unwrap();
        let sum = binary_op(&big, BinaryOp::Add, &ConstValue::int(1)).unwrap();
        assert_eq!(sum.to_string(), "1267650600228229401496703205377");
        assert_eq!(sum.to_i64(), None);
    }

    #[test]
    fn mixed_int_and_float_promote_to_float() {
        let half = ConstValue::float(1, 2);
        let v = binary_op(&ConstValue::int(3), BinaryOp::Mul, &half).unwrap();
        assert_eq!(v.kind(), ConstKind::Float);
        assert_eq!(v.to_string(), "1.5");
        assert_eq!(v.to_int(), None);
    }

    #[test]
    fn integer_division_truncates() {
        let v = binary_op(&ConstValue::int(-7), BinaryOp::Quo, &ConstValue::int(2)).unwrap();
        assert_eq!(v.to_i64(), Some(-3));
        assert!(binary_op(&ConstValue::int(1), BinaryOp::Quo, &ConstValue::int(0)).is_err());
    }

    #[test]
    fn comparisons_and_complement() {
        assert!(compare(&ConstValue::string("a"), BinaryOp::Lss, &ConstValue::string("b")).unwrap());
        assert!(compare(&ConstValue::int(2), BinaryOp::Eql, &ConstValue::float(4, 2)).unwrap());
        let v = unary_op(UnaryOp::Xor, &ConstValue::int(1), 8).unwrap();
        assert_eq!(v.to_i64(), Some(254));
    }

    #[test]
    fn shifts_reject_bad_operands() {
        let err = shift(&ConstValue::string("s"), BinaryOp::Shl, 1).unwrap_err();
        assert!(err.to_string().contains("non-integer"), "{err}");
        assert!(shift(&ConstValue::int(1), BinaryOp::Add, 1).is_err());
        assert!(unary_op(UnaryOp::Not, &ConstValue::int(1), 0).is_err());
    }

    #[test]
    fn complex_values() {
        let i = ConstValue::make_complex(&ConstValue::int(0), &ConstValue::int(1)).unwrap();
        let sq = binary_op(&i, BinaryOp::Mul, &i).unwrap();
        assert_eq!(sq.real(), Some(ConstValue::Float(BigRational::from_integer((-1).into()))));
        assert_eq!(sq.to_string(), "(-1 + 0i)");
    }
}
