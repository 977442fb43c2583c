//! Field definitions for record types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Problems found while validating a single field definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldSpecError {
    /// A bitfield label appears more than once.
    #[error("flag label {label:?} is defined more than once")]
    DuplicateLabel {
        /// The repeated label.
        label: String,
    },

    /// A bitfield label is empty.
    #[error("flag label at bit {position} is empty")]
    EmptyLabel {
        /// Bit position of the empty label.
        position: usize,
    },

    /// More flags than the widest backing integer can hold.
    #[error("{count} flags exceed the maximum of {max}")]
    TooManyFlags {
        /// Number of declared flags.
        count: usize,
        /// Maximum supported flags.
        max: usize,
    },

    /// The default bitmask sets bits with no defined flag.
    #[error("default bitmask {default:#x} sets bits beyond the {flags} defined flags")]
    DefaultOutOfRange {
        /// The declared default.
        default: u64,
        /// Number of defined flags.
        flags: usize,
    },

    /// A label is not part of the bitfield.
    #[error("unknown flag label {label:?}")]
    UnknownFlag {
        /// The unknown label.
        label: String,
    },

    /// Unsupported integer width.
    #[error("integer width {bits} is not one of 8, 16, 32, 64")]
    InvalidIntegerWidth {
        /// The declared width.
        bits: u8,
    },

    /// Text columns need a positive maximum length when one is given.
    #[error("text max_length must be positive")]
    InvalidMaxLength,
}

/// Width of the signed integer that backs a bitfield.
///
/// The sign bit is never used for a flag, so a 32-bit column holds 31 flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BitWidth {
    /// 32-bit signed integer.
    W32,
    /// 64-bit signed integer.
    W64,
}

impl BitWidth {
    /// Width in bits.
    pub fn bits(&self) -> u8 {
        match self {
            BitWidth::W32 => 32,
            BitWidth::W64 => 64,
        }
    }

    /// Number of flags this width can hold.
    pub fn capacity(&self) -> usize {
        usize::from(self.bits()) - 1
    }

    /// Every usable bit set.
    pub fn full_mask(&self) -> i64 {
        match self {
            BitWidth::W32 => i64::from(i32::MAX),
            BitWidth::W64 => i64::MAX,
        }
    }

    /// Smallest width holding `count` flags.
    pub fn for_flags(count: usize) -> Option<Self> {
        if count <= BitWidth::W32.capacity() {
            Some(BitWidth::W32)
        } else if count <= BitWidth::W64.capacity() {
            Some(BitWidth::W64)
        } else {
            None
        }
    }
}

/// Default value of a bitfield.
///
/// `AllEnabled` is the reserved sentinel for "every flag on, including flags
/// appended later". Declarations spell it `"all"` or as the full mask of a
/// backing width (`2147483647` or `9223372036854775807`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DefaultMaskRepr", into = "DefaultMaskRepr")]
pub enum DefaultMask {
    /// Explicit bitmask over the defined flags.
    Bits(u64),
    /// Every flag enabled.
    AllEnabled,
}

impl Default for DefaultMask {
    fn default() -> Self {
        DefaultMask::Bits(0)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DefaultMaskRepr {
    Bits(i64),
    Keyword(String),
}

impl TryFrom<DefaultMaskRepr> for DefaultMask {
    type Error = String;

    fn try_from(repr: DefaultMaskRepr) -> Result<Self, Self::Error> {
        match repr {
            DefaultMaskRepr::Bits(v) if v == i64::from(i32::MAX) || v == i64::MAX => {
                Ok(DefaultMask::AllEnabled)
            }
            DefaultMaskRepr::Bits(v) if v < 0 => {
                Err(format!("default bitmask must be non-negative, got {}", v))
            }
            DefaultMaskRepr::Bits(v) => Ok(DefaultMask::Bits(v as u64)),
            DefaultMaskRepr::Keyword(k) if k == "all" => Ok(DefaultMask::AllEnabled),
            DefaultMaskRepr::Keyword(k) => Err(format!("unknown default keyword {:?}", k)),
        }
    }
}

impl From<DefaultMask> for DefaultMaskRepr {
    fn from(mask: DefaultMask) -> Self {
        match mask {
            DefaultMask::Bits(v) => DefaultMaskRepr::Bits(v as i64),
            DefaultMask::AllEnabled => DefaultMaskRepr::Keyword("all".to_string()),
        }
    }
}

/// An ordered set of flag labels stored as bits of one integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitfieldSpec {
    /// Flag labels; the index of a label is its bit position.
    pub flags: Vec<String>,
    /// Default value for new records.
    #[serde(default)]
    pub default: DefaultMask,
}

impl BitfieldSpec {
    /// Create a bitfield with no flags enabled by default.
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
            default: DefaultMask::default(),
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultMask) -> Self {
        self.default = default;
        self
    }

    /// Bit position of a label.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.flags.iter().position(|f| f == label)
    }

    /// Backing width needed for the defined flags.
    pub fn width(&self) -> BitWidth {
        BitWidth::for_flags(self.flags.len()).unwrap_or(BitWidth::W64)
    }

    /// Mask with one bit per defined flag.
    pub fn flag_mask(&self) -> i64 {
        let count = self.flags.len().min(BitWidth::W64.capacity());
        ((1u64 << count) - 1) as i64
    }

    /// The value written for new records.
    pub fn storage_default(&self) -> i64 {
        match self.default {
            DefaultMask::Bits(bits) => bits as i64,
            DefaultMask::AllEnabled => self.width().full_mask(),
        }
    }

    /// Labels enabled in a stored value. Bits without a label are ignored.
    pub fn decode(&self, value: i64) -> Vec<&str> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(bit, _)| flag_bit(*bit).is_some_and(|mask| value & mask != 0))
            .map(|(_, label)| label.as_str())
            .collect()
    }

    /// Encode a set of labels into a stored value.
    pub fn encode<'a, I>(&self, labels: I) -> Result<i64, FieldSpecError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels.into_iter().try_fold(0i64, |acc, label| {
            let bit = self
                .position(label)
                .ok_or_else(|| FieldSpecError::UnknownFlag {
                    label: label.to_string(),
                })?;
            let mask = flag_bit(bit).ok_or(FieldSpecError::TooManyFlags {
                count: self.flags.len(),
                max: BitWidth::W64.capacity(),
            })?;
            Ok(acc | mask)
        })
    }

    /// Check label uniqueness, flag count and default range.
    pub fn validate(&self) -> Result<(), FieldSpecError> {
        let max = BitWidth::W64.capacity();
        if self.flags.len() > max {
            return Err(FieldSpecError::TooManyFlags {
                count: self.flags.len(),
                max,
            });
        }

        let mut seen = HashSet::new();
        for (position, label) in self.flags.iter().enumerate() {
            if label.is_empty() {
                return Err(FieldSpecError::EmptyLabel { position });
            }
            if !seen.insert(label.as_str()) {
                return Err(FieldSpecError::DuplicateLabel {
                    label: label.clone(),
                });
            }
        }

        if let DefaultMask::Bits(bits) = self.default {
            if bits & !(self.flag_mask() as u64) != 0 {
                return Err(FieldSpecError::DefaultOutOfRange {
                    default: bits,
                    flags: self.flags.len(),
                });
            }
        }

        Ok(())
    }
}

/// Kind of a field and its kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Flag set stored in an integer.
    Bitfield(BitfieldSpec),
    /// UTF-8 text.
    Text {
        /// Maximum length in characters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    /// Signed integer.
    Integer {
        /// Width in bits.
        bits: u8,
    },
    /// Boolean value.
    Boolean,
}

impl FieldKind {
    /// Short name used in messages and listings.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Bitfield(_) => "bitfield",
            FieldKind::Text { .. } => "text",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Boolean => "boolean",
        }
    }
}

/// A field definition within a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Field kind.
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Create a field of any kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a bitfield field.
    pub fn bitfield(name: impl Into<String>, spec: BitfieldSpec) -> Self {
        Self::new(name, FieldKind::Bitfield(spec))
    }

    /// Create an unbounded text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text { max_length: None })
    }

    /// Create an integer field.
    pub fn integer(name: impl Into<String>, bits: u8) -> Self {
        Self::new(name, FieldKind::Integer { bits })
    }

    /// Create a boolean field.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// The bitfield parameters, if this is a bitfield.
    pub fn as_bitfield(&self) -> Option<&BitfieldSpec> {
        match &self.kind {
            FieldKind::Bitfield(spec) => Some(spec),
            _ => None,
        }
    }

    /// Validate kind-specific parameters.
    pub fn validate(&self) -> Result<(), FieldSpecError> {
        match &self.kind {
            FieldKind::Bitfield(spec) => spec.validate(),
            FieldKind::Text {
                max_length: Some(0),
            } => Err(FieldSpecError::InvalidMaxLength),
            FieldKind::Text { .. } | FieldKind::Boolean => Ok(()),
            FieldKind::Integer { bits } => match bits {
                8 | 16 | 32 | 64 => Ok(()),
                _ => Err(FieldSpecError::InvalidIntegerWidth { bits: *bits }),
            },
        }
    }
}

/// Mask for one flag position. `None` past the widest backing integer.
fn flag_bit(position: usize) -> Option<i64> {
    if position < BitWidth::W64.capacity() {
        1i64.checked_shl(position as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_methods() -> BitfieldSpec {
        BitfieldSpec::new([
            "Google",
            "Email",
            "GitHub",
            "LDAP",
            "Dev",
            "RemoteUser",
            "AzureAD",
            "SAML",
            "GitLab",
            "Apple",
            "OpenID Connect",
        ])
    }

    #[test]
    fn test_decode_ignores_unlabelled_bits() {
        let spec = auth_methods();
        assert_eq!(spec.decode(0b101), vec!["Google", "GitHub"]);
        assert_eq!(spec.decode(spec.width().full_mask()).len(), 11);
    }

    #[test]
    fn test_unvalidated_oversized_bitfield_does_not_overflow() {
        let labels: Vec<String> = (0..70).map(|i| format!("flag_{}", i)).collect();
        let spec = BitfieldSpec::new(labels.iter().map(String::as_str));
        assert!(spec.validate().is_err());

        assert_eq!(spec.decode(-1).len(), 63);
        assert_eq!(spec.encode(["flag_0", "flag_62"]).unwrap(), 1 | (1 << 62));
        assert!(matches!(
            spec.encode(["flag_63"]),
            Err(FieldSpecError::TooManyFlags { count: 70, max: 63 })
        ));
    }

    #[test]
    fn test_encode_unknown_label() {
        let spec = auth_methods();
        assert_eq!(spec.encode(["Email", "SAML"]).unwrap(), 0b1000_0010);
        assert!(matches!(
            spec.encode(["Kerberos"]),
            Err(FieldSpecError::UnknownFlag { .. })
        ));
    }

    #[test]
    fn test_width_grows_past_31_flags() {
        let spec = BitfieldSpec::new((0..31).map(|i| format!("f{}", i)));
        assert_eq!(spec.width(), BitWidth::W32);

        let spec = BitfieldSpec::new((0..32).map(|i| format!("f{}", i)));
        assert_eq!(spec.width(), BitWidth::W64);
        assert_eq!(BitWidth::for_flags(64), None);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_out_of_range_default() {
        let dup = BitfieldSpec::new(["Email", "Email"]);
        assert!(matches!(
            dup.validate(),
            Err(FieldSpecError::DuplicateLabel { .. })
        ));

        let wide = auth_methods().with_default(DefaultMask::Bits(1 << 11));
        assert!(matches!(
            wide.validate(),
            Err(FieldSpecError::DefaultOutOfRange { .. })
        ));

        let sentinel = auth_methods().with_default(DefaultMask::AllEnabled);
        assert!(sentinel.validate().is_ok());
    }

    #[test]
    fn test_sentinel_default_parsing() {
        let spec: BitfieldSpec =
            serde_json::from_str(r#"{"flags": ["a", "b"], "default": 2147483647}"#).unwrap();
        assert_eq!(spec.default, DefaultMask::AllEnabled);
        assert_eq!(spec.storage_default(), i64::from(i32::MAX));

        let spec: BitfieldSpec =
            serde_json::from_str(r#"{"flags": ["a", "b"], "default": "all"}"#).unwrap();
        assert_eq!(spec.default, DefaultMask::AllEnabled);

        let spec: BitfieldSpec = serde_json::from_str(r#"{"flags": ["a", "b"]}"#).unwrap();
        assert_eq!(spec.default, DefaultMask::Bits(0));

        assert!(serde_json::from_str::<BitfieldSpec>(r#"{"flags": [], "default": -1}"#).is_err());
    }

    #[test]
    fn test_field_spec_json_shape() {
        let field: FieldSpec = serde_json::from_str(
            r#"{"name": "authentication_methods", "kind": "bitfield", "flags": ["Google"], "default": 1}"#,
        )
        .unwrap();
        assert_eq!(field.name, "authentication_methods");
        assert_eq!(field.as_bitfield().unwrap().default, DefaultMask::Bits(1));

        let field: FieldSpec =
            serde_json::from_str(r#"{"name": "string_id", "kind": "text", "max_length": 40}"#)
                .unwrap();
        assert_eq!(field.kind, FieldKind::Text { max_length: Some(40) });
    }

    #[test]
    fn test_integer_width_validation() {
        assert!(FieldSpec::integer("count", 32).validate().is_ok());
        assert!(matches!(
            FieldSpec::integer("count", 12).validate(),
            Err(FieldSpecError::InvalidIntegerWidth { bits: 12 })
        ));
    }
}
