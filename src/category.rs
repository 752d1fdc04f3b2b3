//! Categories and keys.
//!
//! An [IconCategory] names one independently cached group of icons, and maps to exactly one archive at a time.  The
//! set of categories is fixed and known up front; [IconCategories] holds that set and knows how to turn whatever
//! casing a caller used into the canonical name.
use std::fmt;
use std::sync::Arc;

type LookupMap = std::collections::HashMap<String, IconCategory, ahash::RandomState>;

/// Extension of every icon entry inside a bundle archive.
pub const ICON_EXTENSION: &str = "jpg";

/// Extension of a bundle archive on disk and on the wire.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Prefix of the per-icon endpoint that is always servable without bundles.
pub const FALLBACK_PREFIX: &str = "/icons";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IconCategory(Arc<str>);

impl IconCategory {
    /// Wrap a name as-is.  No normalization happens here; see [IconCategories::normalize].
    pub fn new(name: impl AsRef<str>) -> IconCategory {
        IconCategory(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IconCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IconCategory {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The fixed set of bundled categories.
#[derive(Clone, Debug, Default)]
pub struct IconCategories {
    ordered: Vec<IconCategory>,
    by_folded_name: LookupMap,
}

fn fold(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl IconCategories {
    /// Build the set.  The casing given here is the canonical casing; duplicates differing only by case keep the first.
    pub fn new<I, S>(names: I) -> IconCategories
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ret = IconCategories::default();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let folded = fold(name);
            if ret.by_folded_name.contains_key(&folded) {
                continue;
            }
            let category = IconCategory::new(name);
            ret.by_folded_name.insert(folded, category.clone());
            ret.ordered.push(category);
        }
        ret
    }

    /// Map a caller-supplied name onto its canonical category, or `None` if it isn't bundled.
    pub fn normalize(&self, raw: &str) -> Option<IconCategory> {
        self.by_folded_name.get(&fold(raw)).cloned()
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.normalize(raw).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IconCategory> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Identifies one icon.  Stable across sessions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IconAssetKey {
    pub category: IconCategory,
    pub id: u64,
}

impl IconAssetKey {
    pub fn new(category: IconCategory, id: u64) -> IconAssetKey {
        IconAssetKey { category, id }
    }

    /// The name of this icon's entry inside its category archive.
    pub fn entry_name(&self) -> String {
        entry_name(self.id)
    }

    pub fn fallback_url(&self) -> String {
        fallback_url(self.category.as_str(), self.id)
    }
}

impl fmt::Display for IconAssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.id)
    }
}

/// `"{id}.jpg"`.
pub fn entry_name(id: u64) -> String {
    format!("{}.{}", id, ICON_EXTENSION)
}

/// Direct per-icon URL, servable independent of bundling.
///
/// Pure and synchronous: callers use it as a placeholder before resolution completes, and the cache uses it when a
/// bundle can't be loaded.
pub fn fallback_url(category: &str, id: u64) -> String {
    format!("{}/{}/{}.{}", FALLBACK_PREFIX, category, id, ICON_EXTENSION)
}

/// Parse an entry or file name of the form `"{id}.jpg"` back into its id.
pub fn parse_entry_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(ICON_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn categories() -> IconCategories {
        IconCategories::new(["Alchemy", "materials", "alchemy", "  ", "Tailoring"])
    }

    #[test]
    fn normalize_returns_canonical_casing() {
        let cats = categories();
        assert_eq!(cats.len(), 3);
        assert_eq!(cats.normalize("ALCHEMY").unwrap().as_str(), "Alchemy");
        assert_eq!(cats.normalize(" Materials ").unwrap().as_str(), "materials");
        assert!(cats.normalize("nonexistent").is_none());
        assert!(cats.normalize("").is_none());
    }

    #[test]
    fn iteration_keeps_declaration_order() {
        let names = categories()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Alchemy", "materials", "Tailoring"]);
    }

    #[test]
    fn entry_names() {
        let key = IconAssetKey::new(IconCategory::new("materials"), 42);
        assert_eq!(key.entry_name(), "42.jpg");
        assert_eq!(key.fallback_url(), "/icons/materials/42.jpg");
        assert_eq!(parse_entry_name("42.jpg"), Some(42));
        assert_eq!(parse_entry_name(".jpg"), None);
        assert_eq!(parse_entry_name("4a.jpg"), None);
        assert_eq!(parse_entry_name("42.png"), None);
        assert_eq!(parse_entry_name("+42.jpg"), None);
    }

    proptest! {
        #[test]
        fn fallback_url_is_pure(category in "[a-z]{1,16}", id in any::<u64>()) {
            let first = fallback_url(&category, id);
            prop_assert_eq!(&first, &fallback_url(&category, id));
            prop_assert_eq!(first, format!("/icons/{}/{}.jpg", category, id));
        }

        #[test]
        fn normalize_ignores_case(name in "[a-zA-Z]{1,16}") {
            let cats = IconCategories::new([name.as_str()]);
            let upper = name.to_ascii_uppercase();
            let lower = name.to_ascii_lowercase();
            let from_upper = cats.normalize(&upper).unwrap();
            let from_lower = cats.normalize(&lower).unwrap();
            prop_assert_eq!(from_upper.as_str(), name.as_str());
            prop_assert_eq!(from_lower.as_str(), name.as_str());
        }
    }
}
