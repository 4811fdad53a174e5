//! Interned atom strings.
//!
//! Atom strings deduplicate frequently repeated identifiers (tag names,
//! event names, object keys created with `atom=true`). Interning is
//! process-global so atoms compare by pointer across instances; the table
//! only ever grows.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

static ATOM_TABLE: Lazy<Mutex<FxHashMap<Box<str>, Atom>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// An interned, immutable string.
///
/// Two atoms created from the same text share one allocation, so equality
/// is a pointer compare.
#[derive(Debug, Clone)]
pub struct Atom(Arc<str>);

impl Atom {
    /// Intern `s`, returning the shared atom.
    pub fn new(s: &str) -> Self {
        let mut table = ATOM_TABLE.lock();
        if let Some(atom) = table.get(s) {
            return atom.clone();
        }
        let atom = Atom(Arc::from(s));
        table.insert(Box::from(s), atom.clone());
        atom
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Atom {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Atom {}

impl std::hash::Hash for Atom {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash by content so Atom and &str keys collide as expected.
        self.0.hash(state);
    }
}

impl std::ops::Deref for Atom {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_storage() {
        let a = Atom::new("expired");
        let b = Atom::new("expired");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_distinct_atoms() {
        let a = Atom::new("grow");
        let b = Atom::new("shrink");
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "grow");
    }
}
