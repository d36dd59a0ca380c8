//! # GUIDs
//!
//! 128-bit identifiers naming boxed types and the interfaces they implement.
//!
//! A [`Guid`] is two 64-bit halves compared lexicographically as
//! `(high, low)`. The canonical textual form is the dashed hexadecimal
//! `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally wrapped in braces.
//! [`Guid::parse`] is a `const fn` so identifiers can live in associated
//! consts of [`BoxedType`](crate::BoxedType) and
//! [`Interface`](crate::Interface) impls.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A 128-bit globally unique identifier.
///
/// Identifies boxed types and interfaces in the type and interface
/// registries. Ordering compares `(high, low)` lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid {
    /// The high 64 bits.
    pub high: u64,
    /// The low 64 bits.
    pub low: u64,
}

/// Error returned when parsing a GUID from its textual form fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuidParseError {
    /// The input did not contain exactly 32 hexadecimal digits.
    #[error("GUID must contain exactly 32 hex digits, found {0}")]
    DigitCount(usize),
    /// The input contained a character that is not a hex digit, dash or brace.
    #[error("invalid character {0:?} in GUID")]
    InvalidCharacter(char),
    /// An opening brace was not matched by a closing brace (or vice versa).
    #[error("unbalanced braces in GUID")]
    UnbalancedBraces,
}

impl Guid {
    /// The all-zero GUID.
    pub const ZERO: Guid = Guid { high: 0, low: 0 };

    /// Creates a GUID from its two 64-bit halves.
    pub const fn new(high: u64, low: u64) -> Guid {
        Guid { high, low }
    }

    /// Parses a GUID from its canonical dashed hexadecimal form at compile
    /// time.
    ///
    /// Accepts an optional surrounding brace pair. Dashes may appear at any
    /// position and are ignored; exactly 32 hex digits are required.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in const context) if the input is
    /// not a well-formed GUID literal.
    pub const fn parse(s: &str) -> Guid {
        let b = s.as_bytes();
        let mut i = 0;
        let braced = !b.is_empty() && b[0] == b'{';
        if braced {
            i = 1;
        }
        let mut digits = 0u32;
        let mut high = 0u64;
        let mut low = 0u64;
        let mut closed = false;
        while i < b.len() {
            let c = b[i];
            i += 1;
            if c == b'-' {
                continue;
            }
            if c == b'}' {
                if !braced || i != b.len() {
                    panic!("unbalanced braces in GUID literal");
                }
                closed = true;
                break;
            }
            let v = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                b'A'..=b'F' => c - b'A' + 10,
                _ => panic!("invalid character in GUID literal"),
            } as u64;
            if digits < 16 {
                high = (high << 4) | v;
            } else if digits < 32 {
                low = (low << 4) | v;
            } else {
                panic!("GUID literal has more than 32 hex digits");
            }
            digits += 1;
        }
        if braced && !closed {
            panic!("unbalanced braces in GUID literal");
        }
        if digits != 32 {
            panic!("GUID literal must contain exactly 32 hex digits");
        }
        Guid { high, low }
    }

    /// Returns the bitwise AND of two GUIDs.
    pub const fn and(self, rhs: Guid) -> Guid {
        Guid {
            high: self.high & rhs.high,
            low: self.low & rhs.low,
        }
    }

    /// Returns the bitwise OR of two GUIDs.
    pub const fn or(self, rhs: Guid) -> Guid {
        Guid {
            high: self.high | rhs.high,
            low: self.low | rhs.low,
        }
    }

    /// Checks whether this is the all-zero GUID.
    pub const fn is_zero(&self) -> bool {
        self.high == 0 && self.low == 0
    }
}

impl fmt::Display for Guid {
    /// Renders the canonical dashed hexadecimal form, lowercase, no braces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            self.high >> 32,
            (self.high >> 16) & 0xffff,
            self.high & 0xffff,
            self.low >> 48,
            self.low & 0xffff_ffff_ffff
        )
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Guid, GuidParseError> {
        let b = s.as_bytes();
        let braced = !b.is_empty() && b[0] == b'{';
        let inner = if braced {
            if b.len() < 2 || b[b.len() - 1] != b'}' {
                return Err(GuidParseError::UnbalancedBraces);
            }
            &s[1..s.len() - 1]
        } else {
            if !b.is_empty() && b[b.len() - 1] == b'}' {
                return Err(GuidParseError::UnbalancedBraces);
            }
            s
        };
        let mut digits = 0usize;
        let mut high = 0u64;
        let mut low = 0u64;
        for c in inner.chars() {
            if c == '-' {
                continue;
            }
            let v = c
                .to_digit(16)
                .ok_or(GuidParseError::InvalidCharacter(c))? as u64;
            match digits {
                0..=15 => high = (high << 4) | v,
                16..=31 => low = (low << 4) | v,
                _ => return Err(GuidParseError::DigitCount(digits + 1)),
            }
            digits += 1;
        }
        if digits != 32 {
            return Err(GuidParseError::DigitCount(digits));
        }
        Ok(Guid { high, low })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const() {
        const G: Guid = Guid::parse("3a156e81-35ee-4a4e-8291-b04f56a4cd3d");
        assert_eq!(G.high, 0x3a156e81_35ee_4a4e);
        assert_eq!(G.low, 0x8291_b04f_56a4_cd3d);
    }

    #[test]
    fn test_parse_braced() {
        let a = Guid::parse("{f401e788-0089-4532-9ab6-a00c03bfcd35}");
        let b = Guid::parse("f401e788-0089-4532-9ab6-a00c03bfcd35");
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "unbalanced braces")]
    fn test_parse_rejects_unclosed_brace() {
        Guid::parse("{f401e788-0089-4532-9ab6-a00c03bfcd35");
    }

    #[test]
    fn test_display_round_trip() {
        let g = Guid::new(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        let text = g.to_string();
        assert_eq!(text, "01234567-89ab-cdef-fedc-ba9876543210");
        assert_eq!(text.parse::<Guid>().unwrap(), g);
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert!(matches!(
            "not-a-guid".parse::<Guid>(),
            Err(GuidParseError::InvalidCharacter(_))
        ));
        assert!(matches!(
            "01234567-89ab-cdef-fedc".parse::<Guid>(),
            Err(GuidParseError::DigitCount(16))
        ));
        assert!(matches!(
            "{01234567-89ab-cdef-fedc-ba9876543210".parse::<Guid>(),
            Err(GuidParseError::UnbalancedBraces)
        ));
    }

    #[test]
    fn test_ordering_is_high_then_low() {
        let a = Guid::new(1, u64::MAX);
        let b = Guid::new(2, 0);
        assert!(a < b);
        let c = Guid::new(1, 5);
        assert!(c < a);
    }

    #[test]
    fn test_bitwise_combinators() {
        let a = Guid::new(0xff00, 0x00ff);
        let b = Guid::new(0x0ff0, 0x0ff0);
        assert_eq!(a.and(b), Guid::new(0x0f00, 0x00f0));
        assert_eq!(a.or(b), Guid::new(0xfff0, 0x0fff));
    }
}
