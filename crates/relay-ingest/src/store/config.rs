use std::fmt;

/// Connection settings for the DynamoDB store.
///
/// Anything left unset falls through to the standard AWS provider chain
/// (environment, profile, instance metadata).
#[derive(Clone, Default)]
pub struct StoreConfig {
    pub region: Option<String>,
    /// Override for DynamoDB Local or another compatible endpoint
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl StoreConfig {
    /// Both halves of a static key pair, if configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
