use crate::subscription::membership::{self, MembershipFailure, MembershipOutcome};
use crate::subscription::session::SessionFactory;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Subscribe => write!(f, "subscribe"),
            BatchMode::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedUser {
    pub user: String,
    pub reason: String,
}

/// Which users ended up on which side of one batch. Every input user lands in
/// exactly one of the two sequences, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub calendar_id: String,
    pub mode: BatchMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    successes: Vec<String>,
    failures: Vec<FailedUser>,
}

impl BatchResult {
    fn new(calendar_id: &str, mode: BatchMode) -> Self {
        let now = Utc::now();
        Self {
            calendar_id: calendar_id.to_string(),
            mode,
            started_at: now,
            finished_at: now,
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Builds a result from users that were already classified elsewhere.
    pub fn from_parts(
        calendar_id: &str,
        mode: BatchMode,
        successes: Vec<String>,
        failures: Vec<(String, String)>,
    ) -> Self {
        let mut result = Self::new(calendar_id, mode);
        result.successes = successes;
        result.failures = failures
            .into_iter()
            .map(|(user, reason)| FailedUser { user, reason })
            .collect();
        result
    }

    fn record(&mut self, user: String, outcome: MembershipOutcome) {
        match outcome.reason() {
            None => self.successes.push(user),
            Some(reason) => self.failures.push(FailedUser { user, reason }),
        }
    }

    pub fn successes(&self) -> &[String] {
        &self.successes
    }

    pub fn failures(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.user.as_str()).collect()
    }

    pub fn failed_users(&self) -> &[FailedUser] {
        &self.failures
    }

    pub fn failure_reason(&self, user: &str) -> Option<&str> {
        self.failures
            .iter()
            .find(|f| f.user == user)
            .map(|f| f.reason.as_str())
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct BatchOrchestrator<F: SessionFactory> {
    factory: F,
    concurrency: usize,
    user_timeout: Option<Duration>,
}

impl<F: SessionFactory> BatchOrchestrator<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            concurrency: 1,
            user_timeout: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_user_timeout(mut self, timeout: Duration) -> Self {
        self.user_timeout = Some(timeout);
        self
    }

    pub async fn subscribe_group(&self, calendar_id: &str, users: &[String]) -> BatchResult {
        self.run_batch(calendar_id, users, BatchMode::Subscribe).await
    }

    pub async fn unsubscribe_group(&self, calendar_id: &str, users: &[String]) -> BatchResult {
        self.run_batch(calendar_id, users, BatchMode::Unsubscribe).await
    }

    pub async fn run_batch(&self, calendar_id: &str, users: &[String], mode: BatchMode) -> BatchResult {
        tracing::info!(
            "Starting {} batch for calendar {} with {} user(s)",
            mode,
            calendar_id,
            users.len()
        );

        let mut result = BatchResult::new(calendar_id, mode);

        // `buffered` yields in input order, so recording stays ordered at any concurrency.
        let mut outcomes = stream::iter(users)
            .map(|user| async move {
                let outcome = self.process_user(calendar_id, user, mode).await;
                (user.clone(), outcome)
            })
            .buffered(self.concurrency);

        while let Some((user, outcome)) = outcomes.next().await {
            if let Some(reason) = outcome.reason() {
                tracing::warn!("{} failed for {}: {}", mode, user, reason);
            }
            result.record(user, outcome);
        }

        result.finished_at = Utc::now();
        tracing::info!(
            "Finished {} batch for calendar {}: {} succeeded, {} failed in {} ms",
            mode,
            calendar_id,
            result.successes.len(),
            result.failures.len(),
            result.duration().num_milliseconds()
        );

        result
    }

    async fn process_user(&self, calendar_id: &str, user: &str, mode: BatchMode) -> MembershipOutcome {
        let operation = async {
            let session = match self.factory.open_session(user).await {
                Ok(session) => session,
                Err(e) => return MembershipOutcome::Failed(e.into()),
            };

            match mode {
                BatchMode::Subscribe => membership::subscribe(session.as_ref(), calendar_id).await,
                BatchMode::Unsubscribe => membership::unsubscribe(session.as_ref(), calendar_id).await,
            }
        };

        match self.user_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .unwrap_or_else(|_| MembershipFailure::TimedOut(limit).into()),
            None => operation.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarListEntry;
    use crate::subscription::google_api::{ApiError, CalendarListApi};
    use crate::subscription::session::SessionError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        InsertFails,
        NotSubscribed,
        LookupFails,
        SessionFails,
        Slow,
    }

    #[derive(Default)]
    struct Calls {
        inserts: AtomicUsize,
        gets: AtomicUsize,
        deletes: AtomicUsize,
        sessions: AtomicUsize,
    }

    struct FakeSession {
        behavior: Behavior,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl CalendarListApi for FakeSession {
        async fn get_entry(&self, calendar_id: &str) -> Result<CalendarListEntry, ApiError> {
            self.calls.gets.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::NotSubscribed => Err(ApiError::NotFound(calendar_id.to_string())),
                Behavior::LookupFails => Err(ApiError::RateLimited),
                _ => Ok(CalendarListEntry::for_calendar(calendar_id)),
            }
        }

        async fn insert_entry(&self, calendar_id: &str) -> Result<CalendarListEntry, ApiError> {
            self.calls.inserts.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::InsertFails => Err(ApiError::RequestError("Status 500: boom".to_string())),
                Behavior::Slow => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(CalendarListEntry::for_calendar(calendar_id))
                }
                _ => Ok(CalendarListEntry::for_calendar(calendar_id)),
            }
        }

        async fn delete_entry(&self, _calendar_id: &str) -> Result<(), ApiError> {
            self.calls.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory {
        behaviors: HashMap<String, Behavior>,
        calls: Arc<Calls>,
    }

    impl FakeFactory {
        fn new(behaviors: &[(&str, Behavior)]) -> Self {
            Self {
                behaviors: behaviors
                    .iter()
                    .map(|(user, b)| (user.to_string(), *b))
                    .collect(),
                calls: Arc::new(Calls::default()),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open_session(&self, user: &str) -> Result<Box<dyn CalendarListApi>, SessionError> {
            self.calls.sessions.fetch_add(1, Ordering::SeqCst);
            let behavior = self.behaviors.get(user).copied().unwrap_or(Behavior::Ok);
            if let Behavior::SessionFails = behavior {
                return Err(SessionError::InvalidIdentity(user.to_string()));
            }
            Ok(Box::new(FakeSession {
                behavior,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    fn users(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn partial_insert_failure_splits_users() {
        let factory = FakeFactory::new(&[("b@x.com", Behavior::InsertFails)]);
        let orchestrator = BatchOrchestrator::new(factory);

        let result = orchestrator
            .subscribe_group("cal1", &users(&["a@x.com", "b@x.com", "c@x.com"]))
            .await;

        assert_eq!(result.successes(), &["a@x.com".to_string(), "c@x.com".to_string()]);
        assert_eq!(result.failures(), vec!["b@x.com"]);
        assert!(result.failure_reason("b@x.com").unwrap().contains("boom"));
        assert_eq!(result.mode, BatchMode::Subscribe);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_spans_the_whole_batch() {
        let factory = FakeFactory::new(&[("slow@x.com", Behavior::Slow)]);
        let orchestrator = BatchOrchestrator::new(factory).with_user_timeout(Duration::from_secs(5));

        let result = orchestrator.subscribe_group("cal1", &users(&["slow@x.com"])).await;

        assert!(result.finished_at >= result.started_at);
        assert!(result.duration() >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn unsubscribe_of_absent_membership_succeeds_without_delete() {
        let factory = FakeFactory::new(&[("d@x.com", Behavior::NotSubscribed)]);
        let calls = Arc::clone(&factory.calls);
        let orchestrator = BatchOrchestrator::new(factory);

        let result = orchestrator.unsubscribe_group("cal1", &users(&["d@x.com"])).await;

        assert_eq!(result.successes(), &["d@x.com".to_string()]);
        assert!(result.failures().is_empty());
        assert_eq!(calls.gets.load(Ordering::SeqCst), 1);
        assert_eq!(calls.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_lookup_error_is_recorded_as_failure() {
        let factory = FakeFactory::new(&[("e@x.com", Behavior::LookupFails)]);
        let orchestrator = BatchOrchestrator::new(factory);

        let result = orchestrator
            .unsubscribe_group("cal1", &users(&["e@x.com", "f@x.com"]))
            .await;

        assert_eq!(result.successes(), &["f@x.com".to_string()]);
        assert_eq!(result.failures(), vec!["e@x.com"]);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_result() {
        let factory = FakeFactory::new(&[]);
        let calls = Arc::clone(&factory.calls);
        let orchestrator = BatchOrchestrator::new(factory);

        let result = orchestrator.subscribe_group("cal1", &[]).await;

        assert!(result.successes().is_empty());
        assert!(result.failures().is_empty());
        assert_eq!(result.total(), 0);
        assert_eq!(calls.sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_failure_does_not_stop_later_users() {
        let factory = FakeFactory::new(&[("bad user", Behavior::SessionFails)]);
        let calls = Arc::clone(&factory.calls);
        let orchestrator = BatchOrchestrator::new(factory);

        let result = orchestrator
            .subscribe_group("cal1", &users(&["bad user", "g@x.com", "h@x.com"]))
            .await;

        assert_eq!(result.failures(), vec!["bad user"]);
        assert_eq!(result.successes(), &["g@x.com".to_string(), "h@x.com".to_string()]);
        assert_eq!(calls.sessions.load(Ordering::SeqCst), 3);
        assert_eq!(calls.inserts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn each_user_gets_a_fresh_session() {
        let factory = FakeFactory::new(&[]);
        let calls = Arc::clone(&factory.calls);
        let orchestrator = BatchOrchestrator::new(factory).with_concurrency(4);

        orchestrator
            .subscribe_group("cal1", &users(&["a@x.com", "b@x.com", "c@x.com"]))
            .await;

        assert_eq!(calls.sessions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_batch_keeps_input_order() {
        let factory = FakeFactory::new(&[
            ("b@x.com", Behavior::InsertFails),
            ("d@x.com", Behavior::InsertFails),
        ]);
        let orchestrator = BatchOrchestrator::new(factory).with_concurrency(3);

        let result = orchestrator
            .subscribe_group("cal1", &users(&["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"]))
            .await;

        assert_eq!(
            result.successes(),
            &users(&["a@x.com", "c@x.com", "e@x.com"])[..]
        );
        assert_eq!(result.failures(), vec!["b@x.com", "d@x.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_user_times_out_and_is_recorded_as_failure() {
        let factory = FakeFactory::new(&[("slow@x.com", Behavior::Slow)]);
        let orchestrator = BatchOrchestrator::new(factory).with_user_timeout(Duration::from_secs(5));

        let result = orchestrator
            .subscribe_group("cal1", &users(&["slow@x.com", "fast@x.com"]))
            .await;

        assert_eq!(result.failures(), vec!["slow@x.com"]);
        assert!(result.failure_reason("slow@x.com").unwrap().contains("timed out"));
        assert_eq!(result.successes(), &["fast@x.com".to_string()]);
    }

    #[test]
    fn zero_concurrency_is_clamped_to_sequential() {
        let orchestrator = BatchOrchestrator::new(FakeFactory::new(&[])).with_concurrency(0);

        assert_eq!(orchestrator.concurrency, 1);
    }

    proptest! {
        #[test]
        fn every_user_lands_in_exactly_one_sequence(
            failing in proptest::collection::vec(any::<bool>(), 0..20),
            concurrency in 1usize..5,
        ) {
            let ids: Vec<String> = (0..failing.len()).map(|i| format!("user{i}@x.com")).collect();
            let behaviors: Vec<(&str, Behavior)> = ids
                .iter()
                .zip(&failing)
                .map(|(id, fails)| (id.as_str(), if *fails { Behavior::InsertFails } else { Behavior::Ok }))
                .collect();
            let orchestrator = BatchOrchestrator::new(FakeFactory::new(&behaviors))
                .with_concurrency(concurrency);

            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let result = runtime.block_on(orchestrator.subscribe_group("cal1", &ids));

            let successes: HashSet<&str> = result.successes().iter().map(String::as_str).collect();
            let failures: HashSet<&str> = result.failures().into_iter().collect();
            let input: HashSet<&str> = ids.iter().map(String::as_str).collect();

            prop_assert_eq!(result.total(), ids.len());
            prop_assert!(successes.is_disjoint(&failures));
            prop_assert_eq!(successes.union(&failures).copied().collect::<HashSet<_>>(), input);
            prop_assert_eq!(result.failures().len(), failing.iter().filter(|f| **f).count());
        }
    }
}
