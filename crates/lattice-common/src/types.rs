//! Attribute type tags for indexed keys.

use serde::{Deserialize, Serialize};

/// Type of the attribute a B+ tree index is built over.
///
/// The tag is persisted in the index meta page and validated when an
/// existing index file is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    /// Signed 32-bit integer key.
    Int32 = 1,
}

impl AttrType {
    /// Returns the byte size of a key of this type.
    pub fn key_size(&self) -> usize {
        match self {
            AttrType::Int32 => 4,
        }
    }

    /// Returns the persisted tag byte.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Decodes a persisted tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(AttrType::Int32),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Int32 => "INT32",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_size() {
        assert_eq!(AttrType::Int32.key_size(), 4);
    }

    #[test]
    fn test_tag_roundtrip() {
        let ty = AttrType::Int32;
        assert_eq!(AttrType::from_tag(ty.tag()), Some(ty));
    }

    #[test]
    fn test_from_tag_unknown() {
        assert_eq!(AttrType::from_tag(0), None);
        assert_eq!(AttrType::from_tag(99), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(AttrType::Int32.to_string(), "INT32");
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = AttrType::Int32;
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: AttrType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
