pub mod adapter;
pub mod adapters;
pub mod circuit;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod outcome;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod step;
pub mod stop;
pub mod validate;

pub use adapter::{AdapterRegistry, RegisteredSite, SiteAdapter};
pub use adapters::{JsonLdAdapter, ShopifyAdapter};
pub use circuit::{Admission, CircuitBreaker, CircuitSignal, CircuitSnapshot, CircuitState};
pub use detect::BlockDetector;
pub use error::{EngineError, SessionError};
pub use fingerprint::{Fingerprint, FingerprintProvider, Viewport};
pub use orchestrator::{BatchInput, BatchReport, BatchSummary, Orchestrator};
pub use outcome::{
    AttemptOutcome, BlockReason, Failure, FailureKind, LookupResult, Rejected, TerminalOutcome,
};
pub use rate_limit::{PaceSignal, RateLimiter};
pub use retry::{AttemptTally, RetryController, RetryDecision, RetryPolicy};
pub use session::{
    BrowserContext, HttpLauncher, LaunchError, LaunchSpec, NavigationError, PageSnapshot,
    ProxyPool, RotationReason, Session, SessionLauncher, SessionManager,
};
pub use step::{Checkpoint, NoopStepGate, StdinStepGate, StepGate};
pub use stop::StopHandle;
pub use validate::{validate, QualityProfile, Verdict};
