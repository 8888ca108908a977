//! Resource-class-scoped cache keys.
//!
//! A `CacheKey` can only be built from a [`ResourceClass`] and an
//! identifying key, so entries of different classes never collide and all
//! entries of a class share the prefix returned by [`CacheKey::class_prefix`].

use maru_core::constants::KEY_SEPARATOR;
use maru_core::ResourceClass;
use std::fmt;

/// A cache key scoped to one resource class.
///
/// Rendered as `"{class}|{key}"`. Class names cannot contain the separator,
/// so the class part is always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: String,
    class_len: usize,
}

impl CacheKey {
    pub fn new(class: &ResourceClass, key: &str) -> Self {
        let mut inner = String::with_capacity(class.as_str().len() + 1 + key.len());
        inner.push_str(class.as_str());
        inner.push(KEY_SEPARATOR);
        inner.push_str(key);
        Self {
            inner,
            class_len: class.as_str().len(),
        }
    }

    /// Prefix shared by every key of `class`.
    pub fn class_prefix(class: &ResourceClass) -> String {
        format!("{}{}", class.as_str(), KEY_SEPARATOR)
    }

    /// Prefix shared by every key of `class` starting with `key_prefix`.
    pub fn prefix(class: &ResourceClass, key_prefix: &str) -> String {
        format!("{}{}{}", class.as_str(), KEY_SEPARATOR, key_prefix)
    }

    pub fn class(&self) -> &str {
        &self.inner[..self.class_len]
    }

    /// The identifying key without the class.
    pub fn key(&self) -> &str {
        &self.inner[self.class_len + KEY_SEPARATOR.len_utf8()..]
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn class(name: &str) -> ResourceClass {
        ResourceClass::new(name).unwrap()
    }

    #[test]
    fn test_key_parts() {
        let key = CacheKey::new(&class("accounts"), "accounts:list");
        assert_eq!(key.as_str(), "accounts|accounts:list");
        assert_eq!(key.class(), "accounts");
        assert_eq!(key.key(), "accounts:list");
    }

    #[test]
    fn test_identifying_key_may_contain_separator() {
        let key = CacheKey::new(&class("instruments"), "search|BTC");
        assert_eq!(key.class(), "instruments");
        assert_eq!(key.key(), "search|BTC");
    }

    #[test]
    fn test_class_prefix_does_not_match_similar_class() {
        let prefix = CacheKey::class_prefix(&class("account"));
        let other = CacheKey::new(&class("accounts"), "list");
        assert!(!other.as_str().starts_with(&prefix));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_keys_of_different_classes_never_collide(
            a in "[a-z][a-z-]{0,12}",
            b in "[a-z][a-z-]{0,12}",
            key_a in ".{0,24}",
            key_b in ".{0,24}",
        ) {
            prop_assume!(a != b);
            let ka = CacheKey::new(&class(&a), &key_a);
            let kb = CacheKey::new(&class(&b), &key_b);
            prop_assert_ne!(ka.as_str(), kb.as_str());
            prop_assert!(ka.as_str().starts_with(&CacheKey::class_prefix(&class(&a))));
            prop_assert!(!kb.as_str().starts_with(&CacheKey::class_prefix(&class(&a))));
        }

        #[test]
        fn prop_parts_round_trip(name in "[a-z][a-z-]{0,12}", key in ".{0,24}") {
            let k = CacheKey::new(&class(&name), &key);
            prop_assert_eq!(k.class(), name.as_str());
            prop_assert_eq!(k.key(), key.as_str());
        }
    }
}
