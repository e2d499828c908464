use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use yup_oauth2::ServiceAccountKey;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read service account key: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Malformed service account key: {0}")]
    MalformedKey(String),
    #[error("Service account key is missing field `{0}`")]
    MissingField(&'static str),
    #[error("Service account private key is not a PEM encoded key")]
    InvalidPrivateKey,
    #[error("Service account private key cannot be used for signing: {0}")]
    UnusableKey(String),
    #[error("The calendar scope is required to manage calendar subscriptions")]
    MissingCalendarScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Calendar,
    GmailReadonly,
    Drive,
}

impl Scope {
    pub fn url(&self) -> &'static str {
        match self {
            Scope::Calendar => "https://www.googleapis.com/auth/calendar",
            Scope::GmailReadonly => "https://www.googleapis.com/auth/gmail.readonly",
            Scope::Drive => "https://www.googleapis.com/auth/drive",
        }
    }
}

/// Service account signing material plus the scopes every impersonated
/// session will request. Built once at startup and only ever read afterwards.
#[derive(Debug, Clone)]
pub struct CredentialTemplate {
    key: ServiceAccountKey,
    scopes: Vec<Scope>,
}

impl CredentialTemplate {
    pub async fn initialize(secret_material: &[u8], scopes: &[Scope]) -> Result<Self, ConfigurationError> {
        let key = yup_oauth2::parse_service_account_key(secret_material)
            .map_err(|e| ConfigurationError::MalformedKey(e.to_string()))?;

        if key.client_email.trim().is_empty() {
            return Err(ConfigurationError::MissingField("client_email"));
        }
        if key.private_key.trim().is_empty() {
            return Err(ConfigurationError::MissingField("private_key"));
        }
        if !key.private_key.contains("-----BEGIN") || !key.private_key.contains("PRIVATE KEY-----") {
            return Err(ConfigurationError::InvalidPrivateKey);
        }
        if !scopes.contains(&Scope::Calendar) {
            return Err(ConfigurationError::MissingCalendarScope);
        }

        // Building an authenticator loads the signer without requesting a token.
        yup_oauth2::ServiceAccountAuthenticator::builder(key.clone())
            .build()
            .await
            .map_err(|e| ConfigurationError::UnusableKey(e.to_string()))?;

        let mut unique = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if !unique.contains(scope) {
                unique.push(*scope);
            }
        }

        tracing::info!(
            "Service account {} initialized with {} scope(s)",
            key.client_email,
            unique.len()
        );

        Ok(Self { key, scopes: unique })
    }

    pub async fn from_key_file(path: &Path, scopes: &[Scope]) -> Result<Self, ConfigurationError> {
        let secret_material = tokio::fs::read(path).await?;
        Self::initialize(&secret_material, scopes).await
    }

    pub fn service_account_email(&self) -> &str {
        &self.key.client_email
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn scope_urls(&self) -> Vec<&'static str> {
        self.scopes.iter().map(Scope::url).collect()
    }

    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }
}
