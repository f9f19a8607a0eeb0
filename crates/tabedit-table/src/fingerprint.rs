//! Content fingerprints for tables
//!
//! Provides [`TableFingerprint`], a 32-byte Blake3 hash of a table's
//! canonical wire encoding. Two tables with equal headers, row order and
//! cell values share a fingerprint.

use crate::error::FingerprintError;
use crate::table::Table;
use crate::wire::WireTable;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte table fingerprint (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TableFingerprint([u8; 32]);

impl TableFingerprint {
    /// Create from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FingerprintError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Fingerprint a table
    #[must_use]
    pub fn of(table: &Table) -> Self {
        // Wire tables contain only strings and JSON scalars
        let encoded = serde_json::to_vec(&WireTable::from(table)).unwrap_or_default();
        Self(*blake3::hash(&encoded).as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for TableFingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for TableFingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for TableFingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for TableFingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row;
    use crate::value::Value;

    fn sample() -> Table {
        Table::from_rows(["A"], [row([("A", Value::Number(1.0))])]).unwrap()
    }

    #[test]
    fn fingerprint_deterministic() {
        assert_eq!(TableFingerprint::of(&sample()), TableFingerprint::of(&sample()));
    }

    #[test]
    fn fingerprint_tracks_values() {
        let mut changed = sample();
        changed.set_cell(0, "A", Value::Number(2.0)).unwrap();
        assert_ne!(TableFingerprint::of(&sample()), TableFingerprint::of(&changed));
    }

    #[test]
    fn display_and_parse() {
        let fp = TableFingerprint::of(&sample());
        let parsed: TableFingerprint = fp.to_string().parse().unwrap();
        assert_eq!(fp, parsed);
        assert!(fp.to_string().starts_with(&fp.short()));
    }

    #[test]
    fn invalid_length_rejected() {
        let result = TableFingerprint::from_slice(&[0u8; 31]);
        assert!(matches!(
            result,
            Err(FingerprintError::InvalidLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn serde_as_hex() {
        let fp = TableFingerprint::of(&sample());
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json.len(), 66);
        let back: TableFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
