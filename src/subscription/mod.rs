pub mod credentials;
pub mod session;
pub mod google_api;
pub mod membership;
pub mod batch;

pub use batch::{BatchMode, BatchOrchestrator, BatchResult, FailedUser};
pub use credentials::{ConfigurationError, CredentialTemplate, Scope};
pub use membership::{MembershipFailure, MembershipOutcome};
pub use session::{ImpersonatedSessionFactory, SessionError, SessionFactory};
