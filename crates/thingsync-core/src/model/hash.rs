// ── Catalog hash ──
//
// Digest over the set of known device names, used to decide whether the
// cached catalog still matches the server without fetching any metadata.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over the sorted, de-duplicated names, each followed by a
/// `0x00` separator. Rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogHash(String);

impl CatalogHash {
    pub fn of_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sorted: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();

        let mut hash = FNV_OFFSET_BASIS;
        for name in &sorted {
            for byte in name.bytes().chain(std::iter::once(0)) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        Self(format!("{hash:016x}"))
    }

    /// Record a hash the server reported, normalized for comparison.
    pub fn from_remote(remote: &str) -> Self {
        Self(remote.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a hash string reported by the server: surrounding
    /// whitespace and letter case are ignored.
    pub fn matches(&self, remote: &str) -> bool {
        self.0.eq_ignore_ascii_case(remote.trim())
    }
}

impl fmt::Display for CatalogHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_the_offset_basis() {
        assert_eq!(CatalogHash::of_names(Vec::<String>::new()).as_str(), "cbf29ce484222325");
    }

    #[test]
    fn order_and_duplicates_do_not_matter() {
        let a = CatalogHash::of_names(["Kitchen", "TVRoomLamp", "TVRoomFan"]);
        let b = CatalogHash::of_names(["TVRoomFan", "Kitchen", "TVRoomLamp", "Kitchen"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn changing_one_name_changes_the_hash() {
        let before = CatalogHash::of_names(["Lamp1", "Door"]);
        assert_ne!(before, CatalogHash::of_names(["Lamp2", "Door"]));
        assert_ne!(before, CatalogHash::of_names(["Lamp1", "door"]));
        assert_ne!(before, CatalogHash::of_names(["Lamp1"]));
    }

    #[test]
    fn separator_prevents_concatenation_collisions() {
        let joined = CatalogHash::of_names(["ab"]);
        let split = CatalogHash::of_names(["a", "b"]);
        assert_ne!(joined, split);
    }

    #[test]
    fn remote_comparison_is_trimmed_and_case_insensitive() {
        let hash = CatalogHash::of_names(["Lamp1"]);
        let shouted = format!("  {}\n", hash.as_str().to_ascii_uppercase());
        assert!(hash.matches(&shouted));
        assert!(!hash.matches("deadbeef"));
    }

    #[test]
    fn remote_hashes_are_normalized() {
        let stored = CatalogHash::from_remote(" ABC123 ");
        assert_eq!(stored.as_str(), "abc123");
        assert!(stored.matches("abc123"));
        assert!(stored.matches("ABC123"));
    }
}
