//! Batch traffic generation against the primary agent.

use std::path::Path;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::dispatcher::{DispatchRequest, DispatchResult, Dispatcher};
use crate::errors::{RelayError, Result};

pub const PRIMARY_AGENT_LABEL: &str = "primary";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptCatalog {
    #[serde(rename = "nutrition-queries", default)]
    pub specialized: Vec<String>,
    #[serde(rename = "non-nutrition-queries", default)]
    pub general: Vec<String>,
}

impl PromptCatalog {
    pub fn new(specialized: Vec<String>, general: Vec<String>) -> Result<Self> {
        let catalog = Self {
            specialized,
            general,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(raw)
            .map_err(|err| RelayError::Configuration(format!("invalid prompt catalog: {err}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RelayError::Configuration(format!(
                "failed to read prompt catalog {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.specialized.is_empty() && self.general.is_empty() {
            return Err(RelayError::Configuration(
                "prompt catalog must contain at least one prompt".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchEntry {
    pub query: String,
    pub agent_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_note: Option<String>,
    pub cached: bool,
}

impl BatchEntry {
    fn from_result(query: String, result: DispatchResult) -> Self {
        let mut entry = Self {
            query,
            agent_used: PRIMARY_AGENT_LABEL.to_string(),
            response: None,
            error: None,
            degraded_note: None,
            cached: false,
        };
        match result {
            DispatchResult::Success { body, cached } => {
                entry.response = Some(body);
                entry.cached = cached;
            }
            DispatchResult::Degraded { body, note } => {
                entry.response = Some(body);
                entry.degraded_note = Some(note);
            }
            DispatchResult::Failure { error_message, .. } => {
                entry.error = Some(error_message);
            }
        }
        entry
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchReport {
    pub total_requests: usize,
    pub cached_responses: usize,
    pub results: Vec<BatchEntry>,
}

impl BatchReport {
    fn from_entries(results: Vec<BatchEntry>) -> Self {
        Self {
            total_requests: results.len(),
            cached_responses: results.iter().filter(|entry| entry.cached).count(),
            results,
        }
    }

    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|entry| entry.error.is_some())
            .count()
    }
}

pub struct TrafficGenerator {
    dispatcher: Dispatcher,
    primary_target: String,
    delegate_target: Option<String>,
    catalog: PromptCatalog,
    specialized_ratio: f64,
    rng: Mutex<StdRng>,
}

impl TrafficGenerator {
    pub fn new(
        dispatcher: Dispatcher,
        primary_target: impl Into<String>,
        catalog: PromptCatalog,
    ) -> Self {
        Self {
            dispatcher,
            primary_target: primary_target.into(),
            delegate_target: None,
            catalog,
            specialized_ratio: 0.6,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_delegate(mut self, delegate_target: Option<String>) -> Self {
        self.delegate_target = delegate_target.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_specialized_ratio(mut self, ratio: f64) -> Self {
        self.specialized_ratio = unit_fraction(ratio);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn augment(&self, query: &str) -> String {
        match &self.delegate_target {
            Some(delegate) => {
                format!("{query}\n\nNote: Our nutrition specialist agent ARN is {delegate}")
            }
            None => query.to_string(),
        }
    }

    fn next_request(&self) -> Option<DispatchRequest> {
        let mut rng = self.rng.lock();
        let wants_specialized = rng.gen_bool(self.specialized_ratio);
        let (pool, specialized) = match (wants_specialized, self.catalog.specialized.is_empty()) {
            (true, false) => (&self.catalog.specialized, true),
            (_, _) if self.catalog.general.is_empty() => (&self.catalog.specialized, true),
            _ => (&self.catalog.general, false),
        };
        let query = pool.choose(&mut *rng)?.clone();
        drop(rng);

        let request = if specialized {
            let augmented = self.augment(&query);
            DispatchRequest::augmented(query, augmented, self.primary_target.clone())
        } else {
            DispatchRequest::plain(query, self.primary_target.clone())
        };
        Some(request)
    }

    pub async fn run(&self, count: usize) -> BatchReport {
        self.run_cancellable(count, &CancellationToken::new())
            .await
    }

    /// Dispatches up to `count` prompts one after another. Stops early,
    /// keeping what was collected, once `cancellation` fires.
    #[instrument(skip(self, cancellation))]
    pub async fn run_cancellable(
        &self,
        count: usize,
        cancellation: &CancellationToken,
    ) -> BatchReport {
        let mut results = Vec::new();
        for _ in 0..count {
            if cancellation.is_cancelled() {
                warn!(completed = results.len(), "batch cancelled");
                break;
            }
            let Some(request) = self.next_request() else {
                break;
            };
            let query = request.raw_query.clone();
            let result = self
                .dispatcher
                .dispatch_cancellable(request, cancellation)
                .await;
            results.push(BatchEntry::from_result(query, result));
        }
        let report = BatchReport::from_entries(results);
        info!(
            total = report.total_requests,
            cached = report.cached_responses,
            failures = report.failures(),
            "batch finished"
        );
        report
    }
}

fn unit_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
