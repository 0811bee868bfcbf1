//! Server passwords kept in the OS credential store instead of config.toml.
//!
//! Entries use the service name "mpdsync" and the server's `host:port` as the
//! account name.

use thiserror::Error;

const SERVICE_NAME: &str = "mpdsync";

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("no password stored for {address}")]
    NotFound { address: String },

    #[error("keyring access denied: {0}")]
    AccessDenied(String),

    #[error("keyring unavailable: {0}")]
    Unavailable(String),

    #[error("keyring error: {0}")]
    Other(String),
}

impl From<keyring::Error> for SecretsError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => SecretsError::NotFound {
                address: "unknown".into(),
            },
            keyring::Error::NoStorageAccess(e) => SecretsError::AccessDenied(e.to_string()),
            keyring::Error::PlatformFailure(e) => SecretsError::Unavailable(e.to_string()),
            other => SecretsError::Other(other.to_string()),
        }
    }
}

pub type SecretsResult<T> = Result<T, SecretsError>;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.into(),
        }
    }

    fn entry(&self, address: &str) -> SecretsResult<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, address)?)
    }

    pub fn store_password(&self, address: &str, password: &str) -> SecretsResult<()> {
        self.entry(address)?.set_password(password)?;
        tracing::debug!(address, "stored server password in keyring");
        Ok(())
    }

    /// Returns `SecretsError::NotFound` when nothing is stored for `address`.
    pub fn password(&self, address: &str) -> SecretsResult<String> {
        match self.entry(address)?.get_password() {
            Ok(password) => Ok(password),
            Err(keyring::Error::NoEntry) => Err(SecretsError::NotFound {
                address: address.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Succeeds when the entry is already absent.
    pub fn delete_password(&self, address: &str) -> SecretsResult<()> {
        match self.entry(address)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                tracing::debug!(address, "removed server password from keyring");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
