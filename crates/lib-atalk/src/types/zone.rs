use std::fmt::Display;
use std::hash::{Hash, Hasher};

use super::WireError;

pub const MAX_ZONE_NAME_LEN: usize = 32;

/// An AppleTalk zone name: 1-32 bytes of Mac OS Roman text. Comparison and
/// hashing are case-insensitive under the AppleTalk equivalence rule (see
/// [`ucase`]); the original spelling is preserved for the wire.
#[derive(Debug, Clone, Eq)]
pub struct ZoneName(Vec<u8>);

impl ZoneName {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, WireError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_ZONE_NAME_LEN {
            return Err(WireError::InvalidField("zone name length"));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Case-insensitive comparison against a raw byte string.
    pub fn matches(&self, other: &[u8]) -> bool {
        self.0.len() == other.len()
            && self
                .0
                .iter()
                .zip(other)
                .all(|(a, b)| ucase(*a) == ucase(*b))
    }
}

impl PartialEq for ZoneName {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Hash for ZoneName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in &self.0 {
            ucase(*b).hash(state);
        }
    }
}

impl Display for ZoneName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            if b.is_ascii_graphic() || *b == b' ' {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Fold a Mac OS Roman byte to its upper-case equivalent. ASCII letters fold
/// the usual way; the accented letters above 0x80 fold pairwise per the Mac
/// OS Roman character set. Everything else maps to itself.
pub fn ucase(b: u8) -> u8 {
    match b {
        b'a'..=b'z' => b - 0x20,
        0x87 => 0xE7, // a acute
        0x88 => 0xCB, // a grave
        0x89 => 0xE5, // a circumflex
        0x8A => 0x80, // a diaeresis
        0x8B => 0xCC, // a tilde
        0x8C => 0x81, // a ring
        0x8D => 0x82, // c cedilla
        0x8E => 0x83, // e acute
        0x8F => 0xE9, // e grave
        0x90 => 0xE6, // e circumflex
        0x91 => 0xE8, // e diaeresis
        0x92 => 0xEA, // i acute
        0x93 => 0xED, // i grave
        0x94 => 0xEB, // i circumflex
        0x95 => 0xEC, // i diaeresis
        0x96 => 0x84, // n tilde
        0x97 => 0xEE, // o acute
        0x98 => 0xF1, // o grave
        0x99 => 0xEF, // o circumflex
        0x9A => 0x85, // o diaeresis
        0x9B => 0xCD, // o tilde
        0x9C => 0xF2, // u acute
        0x9D => 0xF4, // u grave
        0x9E => 0xF3, // u circumflex
        0x9F => 0x86, // u diaeresis
        0xBE => 0xAE, // ae
        0xBF => 0xAF, // o slash
        0xCF => 0xCE, // oe
        0xD8 => 0xD9, // y diaeresis
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_case_folds() {
        let a = ZoneName::new(b"Finance".to_vec()).unwrap();
        let b = ZoneName::new(b"fINANCE".to_vec()).unwrap();
        assert_eq!(a, b);
        assert!(a.matches(b"finance"));
        assert!(!a.matches(b"financ"));
    }

    #[test]
    fn mac_roman_case_folds() {
        // "Büro" with u-diaeresis in both spellings
        let lower = ZoneName::new(vec![b'B', 0x9F, b'r', b'o']).unwrap();
        let upper = ZoneName::new(vec![b'b', 0x86, b'R', b'O']).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn length_limits() {
        assert!(ZoneName::new(Vec::new()).is_err());
        assert!(ZoneName::new(vec![b'z'; 32]).is_ok());
        assert!(ZoneName::new(vec![b'z'; 33]).is_err());
    }
}
