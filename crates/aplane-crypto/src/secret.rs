use zeroize::Zeroize;

/// A byte buffer holding secret material: passphrases, master keys,
/// decrypted signing keys.
///
/// The contents are wiped on drop, and are only reachable through the scoped
/// [`SecretBytes::with_bytes`] accessor so callers cannot accidentally hold
/// a borrowed reference past the secret's lifetime.
pub struct SecretBytes {
    bytes: Vec<u8>,
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Run `f` against the secret bytes. The slice must not escape the
    /// closure; anything the caller needs to keep has to be copied out as
    /// the return value (and is then the caller's problem to protect).
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes)
    }

    /// Wipe the contents now, ahead of drop. The container stays usable but
    /// holds only zeroes afterwards.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({}b)", self.bytes.len())
    }
}
