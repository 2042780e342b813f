//! Bearer-token authentication for the request API.
//!
//! Tokens arrive as `Authorization: aplane-token <TOKEN>` and are compared
//! against the per-identity token loaded at startup. The holder is swap-in
//! so control-channel token provisioning takes effect without a restart.

use std::sync::RwLock;

use aplane_core::Error;

pub const AUTH_SCHEME: &str = "aplane-token";

pub struct BearerAuth {
    token: RwLock<String>,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Generate a fresh random token, install it, and return it.
    pub fn rotate(&self) -> String {
        let fresh: [u8; 32] = rand::random();
        let token = hex::encode(fresh);
        *self.token.write().expect("token lock") = token.clone();
        token
    }

    pub fn current(&self) -> String {
        self.token.read().expect("token lock").clone()
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<(), Error> {
        let header = header.ok_or_else(|| Error::unauthorized("missing authorization"))?;
        let presented = header
            .strip_prefix(AUTH_SCHEME)
            .map(str::trim)
            .ok_or_else(|| Error::unauthorized("unsupported authorization scheme"))?;

        let expected = self.token.read().expect("token lock");
        if expected.is_empty() || presented != expected.as_str() {
            return Err(Error::unauthorized("invalid token"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_token() {
        let auth = BearerAuth::new("sekrit");
        assert!(auth.verify(Some("aplane-token sekrit")).is_ok());
    }

    #[test]
    fn rejects_bad_or_missing() {
        let auth = BearerAuth::new("sekrit");
        assert!(auth.verify(None).is_err());
        assert!(auth.verify(Some("aplane-token wrong")).is_err());
        assert!(auth.verify(Some("Bearer sekrit")).is_err());
    }

    #[test]
    fn rotation_invalidates_the_old_token() {
        let auth = BearerAuth::new("old");
        let fresh = auth.rotate();
        assert!(auth.verify(Some("aplane-token old")).is_err());
        assert!(auth.verify(Some(&format!("aplane-token {fresh}"))).is_ok());
        assert_eq!(auth.current(), fresh);
    }

    #[test]
    fn empty_token_never_authenticates() {
        let auth = BearerAuth::new("");
        assert!(auth.verify(Some("aplane-token ")).is_err());
    }
}
