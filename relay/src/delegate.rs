use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::dispatcher::{DispatchRequest, DispatchResult, Dispatcher, DispatcherConfig};
use crate::errors::RelayError;
use crate::invoker::RemoteInvoker;
use crate::sanitize::ResponseSanitizer;

#[derive(Debug, Clone)]
pub struct DelegateFallbacks {
    pub misconfigured: String,
    pub throttled: String,
    pub unreachable: String,
}

impl Default for DelegateFallbacks {
    fn default() -> Self {
        Self {
            misconfigured:
                "Nutrition specialist configuration error. Please call (555) 123-PETS ext. 201."
                    .to_string(),
            throttled: "Nutrition specialist is busy. Please try again later or call (555) 123-PETS ext. 201."
                .to_string(),
            unreachable:
                "Unable to reach our nutrition specialist. Please call (555) 123-PETS ext. 201."
                    .to_string(),
        }
    }
}

pub struct SpecialistDelegate {
    dispatcher: Dispatcher,
    target: Option<String>,
    fallbacks: DelegateFallbacks,
}

impl SpecialistDelegate {
    /// Cache keys are always namespaced by the delegate target, and the
    /// specialist's answer is taken as text.
    pub fn new(
        config: DispatcherConfig,
        invoker: Arc<dyn RemoteInvoker>,
        target: Option<String>,
    ) -> Self {
        let target = target.filter(|value| !value.trim().is_empty());
        Self {
            dispatcher: Dispatcher::new(config.with_target_in_key(true), invoker)
                .with_sanitizer(ResponseSanitizer::default().accept_plain_text(true)),
            target,
            fallbacks: DelegateFallbacks::default(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: DelegateFallbacks) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: ResponseSanitizer) -> Self {
        self.dispatcher = self.dispatcher.with_sanitizer(sanitizer);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub async fn consult(&self, query: &str, session_id: Option<String>) -> DispatchResult {
        self.consult_cancellable(query, session_id, &CancellationToken::new())
            .await
    }

    #[instrument(skip(self, query, cancellation))]
    pub async fn consult_cancellable(
        &self,
        query: &str,
        session_id: Option<String>,
        cancellation: &CancellationToken,
    ) -> DispatchResult {
        let Some(target) = &self.target else {
            warn!("specialist delegate has no target configured");
            return self.degraded(&self.fallbacks.misconfigured, "delegate target not configured");
        };
        let request = DispatchRequest::plain(query, target.clone()).with_session(session_id);
        match self.dispatcher.try_dispatch(request, cancellation).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "specialist delegation failed");
                let message = match &err {
                    RelayError::Throttled(_) => &self.fallbacks.throttled,
                    RelayError::Configuration(_) => &self.fallbacks.misconfigured,
                    _ => &self.fallbacks.unreachable,
                };
                self.degraded(message, &err.to_string())
            }
        }
    }

    /// The string handed back to the calling agent.
    pub async fn consult_text(&self, query: &str, session_id: Option<String>) -> String {
        match self.consult(query, session_id).await.into_outcome() {
            Ok(body) => body,
            Err(message) => message,
        }
    }

    fn degraded(&self, message: &str, note: &str) -> DispatchResult {
        DispatchResult::Degraded {
            body: message.to_string(),
            note: note.to_string(),
        }
    }
}
