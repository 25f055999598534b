pub mod notify;
pub mod policy;
pub mod session;

pub use notify::{
    EventKind, Notifier, NotificationsConfig, NotifierRegistry, PolicyEvent, WebhookNotifier,
};
pub use policy::{
    ApprovalPolicy, BudgetPolicy, ChainOutcome, CircuitBreakerPolicy, PoliciesConfig,
    PolicyAction, PolicyChain, PolicyContext, PolicyHandles, PolicyLayer, ToolInvocation,
    Verdict,
};
pub use session::{ActionRecord, SessionState, SessionTracker, TrustLevel};

/// Initialize structured JSON logging.
/// Writes to stderr: stdout carries protocol traffic.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
