//! Resilient outbound dispatcher for remote agent invocations.
//!
//! A [`Dispatcher`] deduplicates identical prompts within a TTL window, paces
//! outbound calls, retries transient failures with exponential backoff and
//! sanitizes whatever comes back, so callers always receive a value.

pub mod cache;
pub mod config;
pub mod delegate;
pub mod dispatcher;
pub mod errors;
pub mod fault;
pub mod invoker;
pub mod rate_limit;
pub mod retry;
pub mod sanitize;
pub mod signing;
pub mod traffic;

pub use cache::{fingerprint, CacheEntry, FingerprintCache};
pub use config::Settings;
pub use delegate::{DelegateFallbacks, SpecialistDelegate};
pub use dispatcher::{DispatchRequest, DispatchResult, Dispatcher, DispatcherConfig};
pub use errors::{RelayError, Result};
pub use fault::{FaultInjector, NoFaults, RandomFaults};
pub use invoker::{HttpInvoker, Invocation, RemoteInvoker};
pub use rate_limit::RateLimiter;
pub use retry::{RetryController, RetryPolicy, RetryState, Sleeper, TokioSleeper};
pub use sanitize::{ResponseSanitizer, Sanitized, FALLBACK_MESSAGE};
pub use signing::{BearerSigner, Credentials, RequestSigner, SigV4Signer, SignableRequest, Unsigned};
pub use traffic::{BatchEntry, BatchReport, PromptCatalog, TrafficGenerator};
pub use tokio_util::sync::CancellationToken;
