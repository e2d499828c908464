use crate::subscription::google_api::{ApiError, CalendarListApi};
use crate::subscription::session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipFailure {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("operation error: {0}")]
    Operation(#[from] ApiError),
    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

#[derive(Debug)]
pub enum MembershipOutcome {
    Subscribed,
    Unsubscribed,
    /// The calendar was not on the user's list to begin with.
    AlreadyUnsubscribed,
    Failed(MembershipFailure),
}

impl MembershipOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, MembershipOutcome::Failed(_))
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            MembershipOutcome::Failed(failure) => Some(failure.to_string()),
            _ => None,
        }
    }
}

impl From<MembershipFailure> for MembershipOutcome {
    fn from(failure: MembershipFailure) -> Self {
        MembershipOutcome::Failed(failure)
    }
}

pub async fn subscribe(session: &dyn CalendarListApi, calendar_id: &str) -> MembershipOutcome {
    if calendar_id.is_empty() {
        return MembershipFailure::from(ApiError::InvalidCalendar).into();
    }

    match session.insert_entry(calendar_id).await {
        Ok(_) => MembershipOutcome::Subscribed,
        Err(e) => {
            tracing::warn!("Insert of calendar {} failed: {}", calendar_id, e);
            MembershipFailure::from(e).into()
        }
    }
}

pub async fn unsubscribe(session: &dyn CalendarListApi, calendar_id: &str) -> MembershipOutcome {
    if calendar_id.is_empty() {
        return MembershipFailure::from(ApiError::InvalidCalendar).into();
    }

    match session.get_entry(calendar_id).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            tracing::info!("Calendar {} not on list, nothing to remove", calendar_id);
            return MembershipOutcome::AlreadyUnsubscribed;
        }
        Err(e) => {
            tracing::warn!("Lookup of calendar {} failed: {}", calendar_id, e);
            return MembershipFailure::from(e).into();
        }
    }

    match session.delete_entry(calendar_id).await {
        Ok(()) => MembershipOutcome::Unsubscribed,
        Err(e) => {
            tracing::warn!("Delete of calendar {} failed: {}", calendar_id, e);
            MembershipFailure::from(e).into()
        }
    }
}
