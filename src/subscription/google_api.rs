use crate::calendar::CalendarListEntry;
use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Calendar not found on calendar list: {0}")]
    NotFound(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Access to calendar {0} is forbidden")]
    Forbidden(String),
    #[error("Calendar reference must not be empty")]
    InvalidCalendar,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Calendar-list operations on behalf of a single (impersonated) user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarListApi: Send + Sync {
    async fn get_entry(&self, calendar_id: &str) -> Result<CalendarListEntry, ApiError>;

    async fn insert_entry(&self, calendar_id: &str) -> Result<CalendarListEntry, ApiError>;

    async fn delete_entry(&self, calendar_id: &str) -> Result<(), ApiError>;
}

pub struct GoogleCalendarListClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl GoogleCalendarListClient {
    pub fn new(access_token: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn list_url(&self) -> String {
        format!("{}/users/me/calendarList", self.base_url)
    }

    fn entry_url(&self, calendar_id: &str) -> String {
        format!("{}/{}", self.list_url(), urlencoding::encode(calendar_id))
    }

    async fn check_status(
        response: reqwest::Response,
        calendar_id: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        tracing::debug!("Calendar list response status: {}", status);

        if status == 401 {
            return Err(ApiError::AuthenticationFailed);
        }

        if status == 403 {
            return Err(ApiError::Forbidden(calendar_id.to_string()));
        }

        if status == 404 {
            return Err(ApiError::NotFound(calendar_id.to_string()));
        }

        if status == 429 {
            tracing::warn!("Rate limit exceeded");
            return Err(ApiError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await?;
            return Err(ApiError::RequestError(format!("Status {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl CalendarListApi for GoogleCalendarListClient {
    async fn get_entry(&self, calendar_id: &str) -> Result<CalendarListEntry, ApiError> {
        let url = self.entry_url(calendar_id);
        tracing::debug!("GET {}", url);

        let response = self.client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let response = Self::check_status(response, calendar_id).await?;
        Ok(response.json().await?)
    }

    async fn insert_entry(&self, calendar_id: &str) -> Result<CalendarListEntry, ApiError> {
        let url = self.list_url();
        let entry = CalendarListEntry::for_calendar(calendar_id);
        tracing::debug!("POST {} with payload: {:?}", url, entry);

        let response = self.client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&entry)
            .send()
            .await?;

        let response = Self::check_status(response, calendar_id).await?;
        Ok(response.json().await?)
    }

    async fn delete_entry(&self, calendar_id: &str) -> Result<(), ApiError> {
        let url = self.entry_url(calendar_id);
        tracing::debug!("DELETE {}", url);

        let response = self.client
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::check_status(response, calendar_id).await?;
        Ok(())
    }
}
