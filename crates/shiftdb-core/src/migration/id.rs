//! Migration identifiers.

use super::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a migration node: `<sequence>_<slug>`, e.g.
/// `0395_mero_guru_realm`.
///
/// Ordering is by sequence number, then slug, then the raw text, which keeps
/// `Ord` consistent with `Eq` when two spellings share a sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    sequence: u64,
    slug: String,
    raw: String,
}

impl MigrationId {
    /// Parse an identifier.
    pub fn parse(raw: &str) -> Result<Self, MigrationError> {
        let invalid = |reason| MigrationError::InvalidMigrationId {
            id: raw.to_string(),
            reason,
        };

        let (digits, slug) = raw
            .split_once('_')
            .ok_or_else(|| invalid("expected <sequence>_<slug>"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("sequence must be decimal digits"));
        }
        if slug.is_empty() {
            return Err(invalid("slug must not be empty"));
        }
        let sequence = digits
            .parse()
            .map_err(|_| invalid("sequence number is too large"))?;

        Ok(Self {
            sequence,
            slug: slug.to_string(),
            raw: raw.to_string(),
        })
    }

    /// Sequence number component.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Slug component.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// The identifier as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for MigrationId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).map_err(|e| e.to_string())
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.raw
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_components() {
        let id: MigrationId = "0395_mero_guru_realm".parse().unwrap();
        assert_eq!(id.sequence(), 395);
        assert_eq!(id.slug(), "mero_guru_realm");
        assert_eq!(id.to_string(), "0395_mero_guru_realm");
    }

    #[test]
    fn test_rejects_malformed() {
        for raw in ["initial", "_initial", "12a_x", "0001_", ""] {
            assert!(
                matches!(
                    MigrationId::parse(raw),
                    Err(MigrationError::InvalidMigrationId { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_orders_by_sequence_then_slug() {
        let mut ids: Vec<MigrationId> = ["0010_b", "0002_z", "0010_a", "9999_last"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();

        let ordered: Vec<_> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ordered, vec!["0002_z", "0010_a", "0010_b", "9999_last"]);
    }

    #[test]
    fn test_serde_as_string() {
        let id: MigrationId = serde_json::from_str(r#""0001_initial""#).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""0001_initial""#);
        assert!(serde_json::from_str::<MigrationId>(r#""initial""#).is_err());
    }
}
