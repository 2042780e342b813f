//! The encrypted key store: one record file per address under
//! `users/<identity>/keys/`, indexed in memory so that addresses, key types
//! and LogicSig sizes are available without touching any secret.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use aplane_core::transaction::program_address;
use aplane_core::types::Address;
use aplane_crypto::{KeyFamily, ParamMap, Provider, ProviderRegistry, SecretBytes};
use tracing::{debug, warn};

use crate::algod::AlgodClient;
use crate::error::StoreError;
use crate::meta::KeystoreMeta;
use crate::record::{open_secret, seal_secret, KeyRecord, RECORD_VERSION};

pub const KEY_SUFFIX: &str = "key";

#[derive(Default)]
struct KeyIndexes {
    paths: HashMap<Address, PathBuf>,
    key_types: HashMap<Address, String>,
    lsig_sizes: HashMap<Address, u64>,
    pubkeys: HashMap<Address, String>,
}

/// The planner's and dispatcher's view of the key set: immutable, taken
/// once per request under a shared lock.
#[derive(Clone, Default)]
pub struct KeyIndexSnapshot {
    pub key_types: HashMap<Address, String>,
    pub lsig_sizes: HashMap<Address, u64>,
}

impl KeyIndexSnapshot {
    pub fn contains(&self, address: &Address) -> bool {
        self.key_types.contains_key(address)
    }

    pub fn lsig_size(&self, address: &Address) -> u64 {
        self.lsig_sizes.get(address).copied().unwrap_or(0)
    }

    pub fn key_type(&self, address: &Address) -> Option<&str> {
        self.key_types.get(address).map(String::as_str)
    }
}

/// Decrypted material handed to the signature dispatcher.
pub struct DecryptedKey {
    pub key_type: String,
    pub secret: Option<SecretBytes>,
    pub bytecode: Option<Vec<u8>>,
    pub public_key: Vec<u8>,
}

/// Result of `generate` / `import`.
#[derive(Debug)]
pub struct GeneratedKey {
    pub address: Address,
    pub mnemonic: Option<String>,
}

/// Public listing row for the request API and control channel.
#[derive(Debug, Clone)]
pub struct KeySummary {
    pub address: Address,
    pub key_type: String,
    pub public_key_hex: String,
    pub lsig_size: u64,
}

pub struct KeyStore {
    store_dir: PathBuf,
    identity: String,
    registry: Arc<ProviderRegistry>,
    algod: Option<AlgodClient>,
    master_key: RwLock<Option<SecretBytes>>,
    indexes: RwLock<KeyIndexes>,
}

impl KeyStore {
    pub fn new(
        store_dir: impl Into<PathBuf>,
        identity: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        algod: Option<AlgodClient>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            identity: identity.into(),
            registry,
            algod,
            master_key: RwLock::new(None),
            indexes: RwLock::new(KeyIndexes::default()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.store_dir
            .join("users")
            .join(&self.identity)
            .join("keys")
    }

    fn trash_dir(&self) -> PathBuf {
        self.store_dir
            .join("users")
            .join(&self.identity)
            .join("trash")
    }

    pub fn token_path(&self) -> PathBuf {
        self.store_dir
            .join("users")
            .join(&self.identity)
            .join("aplane.token")
    }

    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.keys_dir())?;
        Ok(())
    }

    // ── Passphrase / master key ──────────────────────────────────────────────

    pub fn metadata_exists(&self) -> bool {
        crate::meta::meta_path(&self.store_dir).exists()
    }

    /// First-run setup: derive and persist the KDF salt + verifier.
    pub fn create_metadata(&self, passphrase: &SecretBytes) -> Result<(), StoreError> {
        KeystoreMeta::create(&self.store_dir, passphrase)?;
        Ok(())
    }

    /// Check a passphrase without caching anything.
    pub fn verify_passphrase(&self, passphrase: &SecretBytes) -> Result<(), StoreError> {
        let meta = KeystoreMeta::load(&self.store_dir)?;
        meta.verify_and_derive(passphrase).map(|_| ())
    }

    /// Verify the passphrase and cache the derived master key.
    pub fn initialize(&self, passphrase: &SecretBytes) -> Result<(), StoreError> {
        let meta = KeystoreMeta::load(&self.store_dir)?;
        let master = meta.verify_and_derive(passphrase)?;
        *self.master_key.write().expect("master key lock") = Some(master);
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.master_key.read().expect("master key lock").is_some()
    }

    /// Drop the master key and all cached metadata except the path index,
    /// so a later unlock only needs a rescan.
    pub fn lock(&self) {
        if let Some(mut key) = self.master_key.write().expect("master key lock").take() {
            key.wipe();
        }
        let mut indexes = self.indexes.write().expect("index lock");
        indexes.key_types.clear();
        indexes.lsig_sizes.clear();
        indexes.pubkeys.clear();
    }

    // ── Scanning and indexes ─────────────────────────────────────────────────

    /// Enumerate the key directory and rebuild every index from public
    /// record metadata. Never decrypts.
    pub fn scan(&self) -> Result<usize, StoreError> {
        let dir = self.keys_dir();
        let mut fresh = KeyIndexes::default();

        if dir.exists() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(KEY_SUFFIX) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let address = match Address::from_string(stem) {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "skipping non-address key file");
                        continue;
                    }
                };
                let record = match KeyRecord::load(&path) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "skipping unreadable key file");
                        continue;
                    }
                };
                fresh.key_types.insert(address, record.key_type.clone());
                fresh.lsig_sizes.insert(address, record.lsig_size);
                fresh.pubkeys.insert(address, hex::encode(&record.public_key));
                fresh.paths.insert(address, path);
            }
        }

        let count = fresh.paths.len();
        *self.indexes.write().expect("index lock") = fresh;
        debug!(identity = %self.identity, keys = count, "keystore scanned");
        Ok(count)
    }

    pub fn snapshot(&self) -> KeyIndexSnapshot {
        let indexes = self.indexes.read().expect("index lock");
        KeyIndexSnapshot {
            key_types: indexes.key_types.clone(),
            lsig_sizes: indexes.lsig_sizes.clone(),
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        let indexes = self.indexes.read().expect("index lock");
        let mut addrs: Vec<Address> = indexes.paths.keys().copied().collect();
        addrs.sort_by_key(|a| a.encode_string());
        addrs
    }

    pub fn key_count(&self) -> usize {
        self.indexes.read().expect("index lock").paths.len()
    }

    pub fn list(&self) -> Vec<KeySummary> {
        let indexes = self.indexes.read().expect("index lock");
        let mut rows: Vec<KeySummary> = indexes
            .paths
            .keys()
            .map(|addr| KeySummary {
                address: *addr,
                key_type: indexes.key_types.get(addr).cloned().unwrap_or_default(),
                public_key_hex: indexes.pubkeys.get(addr).cloned().unwrap_or_default(),
                lsig_size: indexes.lsig_sizes.get(addr).copied().unwrap_or(0),
            })
            .collect();
        rows.sort_by_key(|r| r.address.encode_string());
        rows
    }

    /// Cheap fingerprint of the sorted address set: 16 hex characters of a
    /// blake3 hash. Used for conditional key listings; involves no secrets.
    pub fn checksum(&self) -> String {
        let joined = self
            .addresses()
            .iter()
            .map(Address::encode_string)
            .collect::<Vec<_>>()
            .join("\n");
        blake3::hash(joined.as_bytes()).to_hex()[..16].to_string()
    }

    fn path_for(&self, address: &Address) -> PathBuf {
        self.indexes
            .read()
            .expect("index lock")
            .paths
            .get(address)
            .cloned()
            .unwrap_or_else(|| {
                self.keys_dir()
                    .join(format!("{}.{KEY_SUFFIX}", address.encode_string()))
            })
    }

    // ── Record access ────────────────────────────────────────────────────────

    /// Load a record's public metadata (no master key involved).
    pub fn load_record(&self, address: &Address) -> Result<KeyRecord, StoreError> {
        let path = self.path_for(address);
        if !path.exists() {
            return Err(StoreError::NotFound(address.encode_string()));
        }
        KeyRecord::load(&path)
    }

    /// Decrypt the secret material for `address` under the cached master
    /// key. Template records (no secret) load even while locked.
    pub fn get(&self, address: &Address) -> Result<DecryptedKey, StoreError> {
        let record = self.load_record(address)?;

        let secret = if record.has_secret() {
            let guard = self.master_key.read().expect("master key lock");
            let master = guard.as_ref().ok_or(StoreError::Locked)?;
            Some(open_secret(master, address, &record)?)
        } else {
            None
        };

        Ok(DecryptedKey {
            key_type: record.key_type,
            secret,
            bytecode: if record.bytecode.is_empty() { None } else { Some(record.bytecode) },
            public_key: record.public_key,
        })
    }

    // ── Generate / import / delete ───────────────────────────────────────────

    pub async fn generate(
        &self,
        key_type: &str,
        params: &ParamMap,
    ) -> Result<GeneratedKey, StoreError> {
        let provider = self.registry.get(key_type)?;
        provider.validate_params(params)?;
        let material = provider.generate(params)?;
        self.write_material(provider.as_ref(), params, material).await
    }

    pub async fn import(
        &self,
        key_type: &str,
        mnemonic: Option<&str>,
        params: &ParamMap,
    ) -> Result<GeneratedKey, StoreError> {
        let provider = self.registry.get(key_type)?;
        let material = match mnemonic {
            Some(phrase) => provider.from_mnemonic(phrase)?,
            None => {
                if provider.family() != KeyFamily::GenericTemplate {
                    return Err(StoreError::BadMnemonic("mnemonic required".into()));
                }
                provider.validate_params(params)?;
                provider.generate(params)?
            }
        };
        self.write_material(provider.as_ref(), params, material).await
    }

    async fn write_material(
        &self,
        provider: &dyn Provider,
        params: &ParamMap,
        material: aplane_crypto::KeyMaterial,
    ) -> Result<GeneratedKey, StoreError> {
        // Compile first: no locks held across the node round-trip.
        let (address, bytecode, lsig_size) = match &material.teal {
            Some(teal) => {
                let algod = self.algod.as_ref().ok_or(StoreError::NoCompiler)?;
                let compiled = algod.compile_teal(teal).await?;
                let address = program_address(&compiled.bytecode);
                let size = compiled.bytecode.len() as u64 + provider.signature_len() as u64;
                (address, compiled.bytecode, size)
            }
            None => {
                let pk: [u8; 32] =
                    material.public_key.as_slice().try_into().map_err(|_| {
                        StoreError::BadParams(format!(
                            "public key length {}",
                            material.public_key.len()
                        ))
                    })?;
                (Address::new(pk), Vec::new(), 0)
            }
        };

        let (nonce, encrypted_secret, mnemonic) = match &material.secret {
            Some(secret) => {
                let guard = self.master_key.read().expect("master key lock");
                let master = guard.as_ref().ok_or(StoreError::Locked)?;
                let (nonce, ciphertext) = seal_secret(master, &address, secret)?;
                let mnemonic = if provider.mnemonic_scheme().words > 0 && secret.len() == 32 {
                    Some(secret.with_bytes(|b| {
                        aplane_crypto::mnemonic::encode(b.try_into().expect("32-byte secret"))
                    }))
                } else {
                    None
                };
                (nonce, ciphertext, mnemonic)
            }
            None => (Vec::new(), Vec::new(), None),
        };

        let record = KeyRecord {
            version: RECORD_VERSION,
            key_type: provider.type_label().to_string(),
            params: params.clone(),
            public_key: material.public_key.clone(),
            bytecode,
            lsig_size,
            nonce,
            encrypted_secret,
            teal: material.teal.clone(),
        };

        self.ensure_layout()?;
        let path = self
            .keys_dir()
            .join(format!("{}.{KEY_SUFFIX}", address.encode_string()));
        record.write_atomic(&path)?;

        {
            let mut indexes = self.indexes.write().expect("index lock");
            indexes.key_types.insert(address, record.key_type.clone());
            indexes.lsig_sizes.insert(address, record.lsig_size);
            indexes.pubkeys.insert(address, hex::encode(&record.public_key));
            indexes.paths.insert(address, path);
        }

        Ok(GeneratedKey { address, mnemonic })
    }

    /// Soft-delete: move the record into the sibling trash directory, then
    /// rescan so every index agrees.
    pub fn delete(&self, address: &Address) -> Result<(), StoreError> {
        let path = self.path_for(address);
        if !path.exists() {
            return Err(StoreError::NotFound(address.encode_string()));
        }
        let trash = self.trash_dir();
        std::fs::create_dir_all(&trash)?;
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let target = trash.join(format!("{}.{KEY_SUFFIX}.{stamp}", address.encode_string()));
        std::fs::rename(&path, &target)?;
        self.scan()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(dir: &Path) -> KeyStore {
        let registry = Arc::new(ProviderRegistry::with_default_providers());
        let store = KeyStore::new(dir, "default", registry, None);
        store.ensure_layout().expect("layout");
        let pass = SecretBytes::from(b"test passphrase".as_slice());
        store.create_metadata(&pass).expect("metadata");
        store.initialize(&pass).expect("unlock");
        store
    }

    #[tokio::test]
    async fn generate_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());

        let generated = store
            .generate("ed25519", &ParamMap::new())
            .await
            .expect("generate");
        assert!(generated.mnemonic.is_some());

        let key = store.get(&generated.address).expect("get");
        assert_eq!(key.key_type, "ed25519");
        assert_eq!(key.public_key.len(), 32);
        assert!(key.secret.is_some());
        assert!(key.bytecode.is_none());
    }

    #[tokio::test]
    async fn get_fails_while_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let generated = store
            .generate("ed25519", &ParamMap::new())
            .await
            .expect("generate");

        store.lock();
        assert!(matches!(
            store.get(&generated.address),
            Err(StoreError::Locked)
        ));
    }

    #[tokio::test]
    async fn lock_preserves_paths_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let generated = store
            .generate("ed25519", &ParamMap::new())
            .await
            .expect("generate");

        store.lock();
        // Metadata indexes are gone, but the path survives so a rescan is
        // all an unlock needs.
        assert!(store.snapshot().key_type(&generated.address).is_none());
        assert_eq!(store.key_count(), 1);

        store.scan().expect("rescan");
        assert_eq!(
            store.snapshot().key_type(&generated.address),
            Some("ed25519")
        );
    }

    #[tokio::test]
    async fn scan_after_external_write_picks_up_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        store.generate("ed25519", &ParamMap::new()).await.expect("a");

        // A second store over the same directory sees the key via scan.
        let registry = Arc::new(ProviderRegistry::with_default_providers());
        let other = KeyStore::new(dir.path(), "default", registry, None);
        assert_eq!(other.scan().expect("scan"), 1);
    }

    #[tokio::test]
    async fn checksum_tracks_address_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());

        let empty = store.checksum();
        let a = store.generate("ed25519", &ParamMap::new()).await.expect("a");
        let with_a = store.checksum();
        assert_ne!(empty, with_a);
        assert_eq!(with_a.len(), 16);

        // Unchanged set, unchanged checksum.
        store.scan().expect("rescan");
        assert_eq!(with_a, store.checksum());

        store.delete(&a.address).expect("delete");
        assert_eq!(empty, store.checksum());
    }

    #[tokio::test]
    async fn delete_moves_to_trash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let generated = store
            .generate("ed25519", &ParamMap::new())
            .await
            .expect("generate");

        store.delete(&generated.address).expect("delete");
        assert!(matches!(
            store.get(&generated.address),
            Err(StoreError::NotFound(_))
        ));
        // The record still exists under trash/.
        let trash_entries = std::fs::read_dir(store.trash_dir())
            .expect("trash dir")
            .count();
        assert_eq!(trash_entries, 1);

        assert!(matches!(
            store.delete(&generated.address),
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn import_restores_same_address() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let generated = store
            .generate("ed25519", &ParamMap::new())
            .await
            .expect("generate");
        let mnemonic = generated.mnemonic.expect("mnemonic");

        store.delete(&generated.address).expect("delete");
        let imported = store
            .import("ed25519", Some(&mnemonic), &ParamMap::new())
            .await
            .expect("import");
        assert_eq!(imported.address, generated.address);
    }

    #[tokio::test]
    async fn template_generation_requires_compiler() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let mut params = ParamMap::new();
        params.insert("image".into(), "00".repeat(32));
        assert!(matches!(
            store.generate("hashlock-v1", &params).await,
            Err(StoreError::NoCompiler)
        ));
    }
}
