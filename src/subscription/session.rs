use crate::subscription::credentials::CredentialTemplate;
use crate::subscription::google_api::{CalendarListApi, GoogleCalendarListClient, DEFAULT_BASE_URL};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid user identity: {0:?}")]
    InvalidIdentity(String),
    #[error("Failed to build authenticator: {0}")]
    Transport(#[from] std::io::Error),
    #[error("Failed to obtain impersonated token: {0}")]
    Token(String),
    #[error("Token response did not contain an access token")]
    MissingAccessToken,
}

/// Opens a calendar-list session acting as a single user.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self, user: &str) -> Result<Box<dyn CalendarListApi>, SessionError>;
}

pub struct ImpersonatedSessionFactory<'a> {
    template: &'a CredentialTemplate,
    base_url: String,
}

impl<'a> ImpersonatedSessionFactory<'a> {
    pub fn new(template: &'a CredentialTemplate) -> Self {
        Self {
            template,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

pub(crate) fn validate_identity(user: &str) -> Result<(), SessionError> {
    if user.is_empty() || user.chars().any(char::is_whitespace) {
        return Err(SessionError::InvalidIdentity(user.to_string()));
    }
    Ok(())
}

#[async_trait]
impl SessionFactory for ImpersonatedSessionFactory<'_> {
    async fn open_session(&self, user: &str) -> Result<Box<dyn CalendarListApi>, SessionError> {
        validate_identity(user)?;

        // Each session gets its own key copy with the subject set; the template stays untouched.
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(self.template.key().clone())
            .subject(user)
            .build()
            .await?;

        let token = auth
            .token(&self.template.scope_urls())
            .await
            .map_err(|e| SessionError::Token(e.to_string()))?;

        let access_token = token
            .token()
            .ok_or(SessionError::MissingAccessToken)?
            .to_string();

        tracing::debug!("Opened impersonated session for {}", user);

        let client = GoogleCalendarListClient::new(access_token).with_base_url(self.base_url.clone());
        Ok(Box::new(client))
    }
}
