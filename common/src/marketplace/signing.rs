// Request signing for the marketplace open API

use crate::errors::ConfigurationError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs requests as `HMAC-SHA256(secret, app_id + timestamp + payload)`
#[derive(Clone)]
pub struct RequestSigner {
    app_id: String,
    secret: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("app_id", &self.app_id)
            .field("secret", &"***")
            .finish()
    }
}

impl RequestSigner {
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>) -> Result<Self, ConfigurationError> {
        let app_id = app_id.into();
        let secret = secret.into();

        if app_id.trim().is_empty() {
            return Err(ConfigurationError::MissingCredentials("app_id".to_string()));
        }
        if secret.trim().is_empty() {
            return Err(ConfigurationError::MissingCredentials("secret".to_string()));
        }

        Ok(Self { app_id, secret })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Hex-encoded signature over the canonical string
    pub fn signature(&self, timestamp: i64, payload: &str) -> Result<String, ConfigurationError> {
        let canonical = format!("{}{}{}", self.app_id, timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ConfigurationError::MissingCredentials(format!("secret: {}", e)))?;
        mac.update(canonical.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self, timestamp: i64, payload: &str) -> Result<String, ConfigurationError> {
        Ok(format!(
            "SHA256 Credential={}, Timestamp={}, Signature={}",
            self.app_id,
            timestamp,
            self.signature(timestamp, payload)?
        ))
    }
}
