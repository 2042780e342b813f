//! In-memory cache of decrypted key material, scoped to one unlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aplane_core::types::Address;
use aplane_crypto::SecretBytes;
use aplane_store::{DecryptedKey, KeyStore, StoreError};

struct CachedKey {
    key_type: String,
    secret: Option<SecretBytes>,
    bytecode: Option<Vec<u8>>,
    public_key: Vec<u8>,
}

/// Address → decrypted material, lazily filled through the store. The lock
/// is held across the decryption, so concurrent requests for the same
/// address coalesce into a single master-key use. `destroy` wipes every
/// cached secret in place.
pub struct KeySession {
    store: Arc<KeyStore>,
    cache: Mutex<HashMap<Address, CachedKey>>,
}

impl KeySession {
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch material for `address`, decrypting on first use. Returns a
    /// per-use copy whose secret the caller (the dispatcher) consumes; the
    /// cached original stays resident until `destroy`.
    pub fn get(&self, address: &Address) -> Result<DecryptedKey, StoreError> {
        let mut cache = self.cache.lock().expect("session lock");

        if !cache.contains_key(address) {
            let key = self.store.get(address)?;
            cache.insert(
                *address,
                CachedKey {
                    key_type: key.key_type,
                    secret: key.secret,
                    bytecode: key.bytecode,
                    public_key: key.public_key,
                },
            );
        }

        let cached = cache.get(address).expect("just inserted");
        Ok(DecryptedKey {
            key_type: cached.key_type.clone(),
            secret: cached
                .secret
                .as_ref()
                .map(|s| s.with_bytes(|b| SecretBytes::from(b))),
            bytecode: cached.bytecode.clone(),
            public_key: cached.public_key.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("session lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipe all cached secrets and bytecode in place, then drop the
    /// entries.
    pub fn destroy(&self) {
        let mut cache = self.cache.lock().expect("session lock");
        for (_, mut entry) in cache.drain() {
            if let Some(secret) = entry.secret.as_mut() {
                secret.wipe();
            }
            if let Some(bytecode) = entry.bytecode.as_mut() {
                bytecode.iter_mut().for_each(|b| *b = 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aplane_crypto::{ParamMap, ProviderRegistry};

    async fn fixture() -> (tempfile::TempDir, Arc<KeyStore>, Address) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(ProviderRegistry::with_default_providers());
        let store = Arc::new(KeyStore::new(dir.path(), "default", registry, None));
        store.ensure_layout().expect("layout");
        let pass = SecretBytes::from(b"pass".as_slice());
        store.create_metadata(&pass).expect("meta");
        store.initialize(&pass).expect("unlock");
        let generated = store
            .generate("ed25519", &ParamMap::new())
            .await
            .expect("generate");
        (dir, store, generated.address)
    }

    #[tokio::test]
    async fn get_is_lazily_cached() {
        let (_dir, store, address) = fixture().await;
        let session = KeySession::new(Arc::clone(&store));
        assert!(session.is_empty());

        let first = session.get(&address).expect("get");
        assert_eq!(session.len(), 1);
        assert_eq!(first.key_type, "ed25519");

        // Second fetch works even after the store itself locks: the cache
        // answers without another decryption.
        store.lock();
        assert!(session.get(&address).is_ok());
    }

    #[tokio::test]
    async fn destroy_empties_the_cache() {
        let (_dir, store, address) = fixture().await;
        let session = KeySession::new(Arc::clone(&store));
        session.get(&address).expect("get");

        session.destroy();
        assert!(session.is_empty());

        // After destroy and store lock, a fresh get goes back to the store
        // and fails because the master key is gone.
        store.lock();
        assert!(matches!(
            session.get(&address),
            Err(StoreError::Locked)
        ));
    }
}
