//! Per-namespace unique-name tables.

use std::collections::HashMap;

/// A registry enforcing uniqueness of human-readable names within one
/// namespace (settings, nets, physes, or the virts of a single net).
#[derive(Debug)]
pub(crate) struct NameTable<T> {
    map: HashMap<String, T>,
}

impl<T: Copy> NameTable<T> {
    pub fn new() -> Self {
        NameTable {
            map: HashMap::new(),
        }
    }

    /// Claims `name` for `id`. Fails when the name is taken, including
    /// by `id` itself.
    pub fn claim(&mut self, name: &str, id: T) -> Result<(), ()> {
        if self.map.contains_key(name) {
            return Err(());
        }
        self.map.insert(name.to_string(), id);
        Ok(())
    }

    /// Releases a name on object destruction or rename.
    pub fn release(&mut self, name: &str) {
        self.map.remove(name);
    }

    /// Looks a name up.
    pub fn get(&self, name: &str) -> Option<T> {
        self.map.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_release() {
        let mut names: NameTable<u32> = NameTable::new();
        names.claim("a", 1).unwrap();
        assert_eq!(names.get("a"), Some(1));
        assert!(names.claim("a", 2).is_err());

        names.release("a");
        assert_eq!(names.get("a"), None);
        names.claim("a", 2).unwrap();
    }
}
