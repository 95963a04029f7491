//! Survey execution engine

pub mod dispatcher;
pub mod rate_limiter;
pub mod retry;

pub use dispatcher::{DispatchConfig, DispatchError, Dispatcher, EvaluationRun, MissingTrial};
pub use rate_limiter::RateLimiter;
pub use retry::{Backoff, FailureClass, RetryController};
