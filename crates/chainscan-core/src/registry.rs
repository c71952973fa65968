//! Address ownership lookup: chain address → source key of the owning account.

use std::collections::HashMap;
use std::sync::RwLock;

/// Resolve an address to the source key that owns it.
///
/// The engine only reads through this trait; the mapping itself is owned
/// and mutated by the wallet layer. Implementations must tolerate
/// concurrent reads from multiple extraction workers. Plain closures
/// implement it directly:
///
/// ```rust
/// use chainscan_core::registry::AddressLookup;
///
/// let lookup = |address: &str| -> Option<String> {
///     (address == "addr1").then(|| "account-1".to_string())
/// };
/// assert_eq!(lookup.lookup("addr1").as_deref(), Some("account-1"));
/// assert!(lookup.lookup("other").is_none());
/// ```
pub trait AddressLookup: Send + Sync {
    /// Returns the source key owning `address`, or `None` if untracked.
    fn lookup(&self, address: &str) -> Option<String>;
}

impl<F> AddressLookup for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn lookup(&self, address: &str) -> Option<String> {
        self(address)
    }
}

/// Address → source-key map guarded by a reader/writer lock.
///
/// The wallet layer registers addresses as accounts derive them; extraction
/// workers read concurrently while scanning.
#[derive(Default)]
pub struct AddressRegistry {
    map: RwLock<HashMap<String, String>>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `address` as owned by `source_key` (overwrites a previous owner).
    pub fn register(&self, address: impl Into<String>, source_key: impl Into<String>) {
        self.map
            .write()
            .unwrap()
            .insert(address.into(), source_key.into());
    }

    /// Stop tracking `address`.
    pub fn unregister(&self, address: &str) {
        self.map.write().unwrap().remove(address);
    }

    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    /// Returns `true` if no addresses are tracked.
    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }
}

impl AddressLookup for AddressRegistry {
    fn lookup(&self, address: &str) -> Option<String> {
        self.map.read().unwrap().get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn register_and_lookup() {
        let registry = AddressRegistry::new();
        registry.register("addr1", "account-1");
        registry.register("addr2", "account-1");
        registry.register("addr3", "account-2");

        assert_eq!(registry.lookup("addr1").as_deref(), Some("account-1"));
        assert_eq!(registry.lookup("addr3").as_deref(), Some("account-2"));
        assert!(registry.lookup("unknown").is_none());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn unregister_removes() {
        let registry = AddressRegistry::new();
        registry.register("addr1", "account-1");
        registry.unregister("addr1");
        assert!(registry.lookup("addr1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_reads_while_registering() {
        let registry = Arc::new(AddressRegistry::new());
        for i in 0..100 {
            registry.register(format!("addr{i}"), "account-1");
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let _ = registry.lookup(&format!("addr{i}"));
                    }
                })
            })
            .collect();

        registry.register("addr100", "account-2");
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 101);
    }
}
