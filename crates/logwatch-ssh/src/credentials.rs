//! Authentication secrets.

/// Environment variable holding the private key passphrase.
pub const KEY_PASSWORD_ENV: &str = "KEY_PASSWORD";
/// Environment variable holding the fallback login password.
pub const SSH_PASSWORD_ENV: &str = "SSH_PASSWORD";

/// Secrets used while authenticating. Never printed.
#[derive(Clone, Default)]
pub struct Credentials {
    key_passphrase: Option<String>,
    password: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(key_passphrase: Option<String>, password: Option<String>) -> Self {
        Self {
            key_passphrase: key_passphrase.filter(|s| !s.is_empty()),
            password: password.filter(|s| !s.is_empty()),
        }
    }

    /// Read `KEY_PASSWORD` and `SSH_PASSWORD`; empty values count as unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(KEY_PASSWORD_ENV).ok(),
            std::env::var(SSH_PASSWORD_ENV).ok(),
        )
    }

    #[must_use]
    pub fn key_passphrase(&self) -> Option<&str> {
        self.key_passphrase.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.key_passphrase.is_none() && self.password.is_none()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("key_passphrase", &mask(&self.key_passphrase))
            .field("password", &mask(&self.password))
            .finish()
    }
}
