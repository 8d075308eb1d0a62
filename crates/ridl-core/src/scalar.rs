//! Scalar kinds and the C-like arithmetic rules used by constant evaluation
//!
//! All constant values are stored as a `u64` bit pattern paired with a
//! [`ScalarKind`]. Signed kinds keep their value sign-extended in the
//! pattern, so casts between kinds reduce to truncate-then-extend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The scalar kinds, in conversion-rank order. `Float` and `Double` exist as
/// field types but are not valid in constant expressions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ScalarKind {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

use ScalarKind::*;

impl ScalarKind {
    /// Usable in constant expressions?
    pub fn supports_arithmetic(self) -> bool {
        !matches!(self, Float | Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Int8 | Int16 | Int32 | Int64)
    }

    /// Valid as the storage type of an enum declaration?
    pub fn is_valid_enum_storage(self) -> bool {
        matches!(self, Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64)
    }

    pub fn size_bytes(self) -> usize {
        match self {
            Bool | Int8 | UInt8 => 1,
            Int16 | UInt16 => 2,
            Int32 | UInt32 | Float => 4,
            Int64 | UInt64 | Double => 8,
        }
    }

    /// Integral promotion: anything below `int` becomes `int`.
    pub fn promoted(self) -> ScalarKind {
        debug_assert!(self.supports_arithmetic());
        self.max(Int32)
    }

    /// The usual arithmetic conversion for a binary operation on two
    /// (already promoted) kinds.
    pub fn usual_arithmetic_conversion(lhs: ScalarKind, rhs: ScalarKind) -> ScalarKind {
        debug_assert!(lhs.supports_arithmetic() && rhs.supports_arithmetic());
        if lhs == rhs {
            lhs
        } else if lhs == Bool {
            rhs
        } else if rhs == Bool {
            lhs
        } else if lhs.is_signed() == rhs.is_signed() {
            lhs.max(rhs)
        } else {
            let (signed, unsigned) = if lhs.is_signed() { (lhs, rhs) } else { (rhs, lhs) };
            if unsigned >= signed {
                unsigned
            } else {
                signed
            }
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Bool => "bool",
            Int8 => "int8_t",
            UInt8 => "uint8_t",
            Int16 => "int16_t",
            UInt16 => "uint16_t",
            Int32 => "int32_t",
            UInt32 => "uint32_t",
            Int64 => "int64_t",
            UInt64 => "uint64_t",
            Float => "float",
            Double => "double",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

macro_rules! cast_to_kind {
    ($value:expr, $kind:expr) => {
        match $kind {
            Bool => ($value != 0) as u64,
            Int8 => $value as i8 as u64,
            UInt8 => $value as u8 as u64,
            Int16 => $value as i16 as u64,
            UInt16 => $value as u16 as u64,
            Int32 => $value as i32 as u64,
            UInt32 => $value as u32 as u64,
            Int64 => $value as i64 as u64,
            UInt64 => $value,
            Float | Double => unreachable!("floating point in constant expression"),
        }
    };
}

/// Truncate `value` to `kind`, sign-extending signed kinds back into the
/// full bit pattern.
pub fn cast_value(value: u64, kind: ScalarKind) -> u64 {
    cast_to_kind!(value, kind)
}

/// Render `value` as `kind` would print it (signed kinds as negative
/// numbers where applicable).
pub fn format_value(value: u64, kind: ScalarKind) -> String {
    if kind == Bool {
        return if value != 0 { "true" } else { "false" }.to_string();
    }
    if kind.is_signed() {
        format!("{}", cast_value(value, kind) as i64)
    } else {
        format!("{}", cast_value(value, kind))
    }
}

/// Render `value` as a C++ literal of `kind`, with `u`/`ll` suffixes as
/// needed. `i64::MIN` has no literal form and is spelled as an expression.
pub fn format_cpp_literal(value: u64, kind: ScalarKind) -> String {
    match kind {
        Bool => format_value(value, kind),
        Int64 if value as i64 == i64::MIN => {
            // -9223372036854775808 does not parse as a single literal
            "static_cast<int64_t>(-9223372036854775807ll - 1)".to_string()
        }
        Int64 => format!("{}ll", value as i64),
        UInt64 => format!("{}ull", value),
        UInt8 | UInt16 | UInt32 => format!("{}u", cast_value(value, kind)),
        _ => format_value(value, kind),
    }
}

/// Parse an integer literal with optional C-style `u`/`l` suffixes,
/// choosing the kind the way a C compiler would: decimal literals without
/// a `u` suffix stay signed, hexadecimal literals may fall into unsigned
/// kinds if the value does not fit the signed one.
pub fn parse_literal(text: &str) -> Option<(u64, ScalarKind)> {
    let mut body = text;
    let mut unsigned = false;
    let mut long = false;
    loop {
        if let Some(rest) = body.strip_suffix(['u', 'U']) {
            if unsigned {
                return None;
            }
            unsigned = true;
            body = rest;
        } else if let Some(rest) = body.strip_suffix(['l', 'L']) {
            if long {
                return None;
            }
            long = true;
            body = rest;
        } else {
            break;
        }
    }

    let (digits, radix, hex) = if let Some(rest) =
        body.strip_prefix("0x").or_else(|| body.strip_prefix("0X"))
    {
        (rest, 16, true)
    } else if body.len() > 1 && body.starts_with('0') {
        (&body[1..], 8, false)
    } else {
        (body, 10, false)
    };
    if digits.is_empty() {
        return None;
    }
    let value = u64::from_str_radix(digits, radix).ok()?;

    let kind = match (unsigned, long) {
        (true, true) => UInt64,
        (false, true) => {
            if value > i64::MAX as u64 {
                return None;
            }
            Int64
        }
        (true, false) => {
            if value <= u32::MAX as u64 {
                UInt32
            } else {
                UInt64
            }
        }
        (false, false) => {
            if value <= i32::MAX as u64 {
                Int32
            } else if hex && value <= u32::MAX as u64 {
                UInt32
            } else if value <= i64::MAX as u64 {
                Int64
            } else if hex {
                UInt64
            } else {
                return None;
            }
        }
    };
    Some((value, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion() {
        assert_eq!(Bool.promoted(), Int32);
        assert_eq!(UInt8.promoted(), Int32);
        assert_eq!(Int32.promoted(), Int32);
        assert_eq!(UInt32.promoted(), UInt32);
        assert_eq!(Int64.promoted(), Int64);
    }

    #[test]
    fn test_usual_arithmetic_conversion() {
        let uac = ScalarKind::usual_arithmetic_conversion;
        assert_eq!(uac(Int32, Int32), Int32);
        assert_eq!(uac(Bool, Int16), Int16);
        assert_eq!(uac(Int32, Int64), Int64);
        assert_eq!(uac(Int32, UInt32), UInt32);
        assert_eq!(uac(UInt32, Int64), Int64);
        assert_eq!(uac(UInt64, Int32), UInt64);
    }

    #[test]
    fn test_cast_sign_extends() {
        assert_eq!(cast_value(0xff, Int8), u64::MAX);
        assert_eq!(cast_value(0xff, UInt8), 0xff);
        assert_eq!(cast_value(0x1_0000_0001, UInt32), 1);
        assert_eq!(cast_value(2, Bool), 1);
    }

    #[test]
    fn test_format() {
        assert_eq!(format_value(u64::MAX, Int32), "-1");
        assert_eq!(format_value(u64::MAX, UInt64), "18446744073709551615");
        assert_eq!(format_value(1, Bool), "true");
        assert_eq!(format_cpp_literal(7, UInt32), "7u");
        assert_eq!(format_cpp_literal(7, Int64), "7ll");
        assert_eq!(format_cpp_literal(i64::MIN as u64, UInt64), "9223372036854775808ull");
        assert!(format_cpp_literal(i64::MIN as u64, Int64).contains("static_cast"));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("0"), Some((0, Int32)));
        assert_eq!(parse_literal("42"), Some((42, Int32)));
        assert_eq!(parse_literal("42u"), Some((42, UInt32)));
        assert_eq!(parse_literal("42ul"), Some((42, UInt64)));
        assert_eq!(parse_literal("42l"), Some((42, Int64)));
        assert_eq!(parse_literal("0x10"), Some((16, Int32)));
        assert_eq!(parse_literal("010"), Some((8, Int32)));
        // hex literals may become unsigned, decimal ones stay signed
        assert_eq!(parse_literal("0x80000000"), Some((0x8000_0000, UInt32)));
        assert_eq!(parse_literal("2147483648"), Some((2147483648, Int64)));
        assert_eq!(
            parse_literal("0xffffffffffffffff"),
            Some((u64::MAX, UInt64))
        );
        assert_eq!(parse_literal("18446744073709551615"), None);
        assert_eq!(parse_literal("0x"), None);
        assert_eq!(parse_literal("1uu"), None);
    }
}
