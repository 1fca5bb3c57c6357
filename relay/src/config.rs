use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::dispatcher::DispatcherConfig;
use crate::errors::{RelayError, Result};
use crate::fault::{FaultInjector, NoFaults, RandomFaults};
use crate::invoker::{regional_endpoint, HttpInvoker};
use crate::rate_limit::DEFAULT_MIN_INTERVAL;
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::signing::{BearerSigner, Credentials, RequestSigner, SigV4Signer, Unsigned};

pub const PRIMARY_TARGET_ENV: &str = "PRIMARY_AGENT_ARN";
pub const DELEGATE_TARGET_ENV: &str = "NUTRITION_AGENT_ARN";
pub const SIGNING_SERVICE: &str = "bedrock-agentcore";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_REQUESTS_PER_BATCH: usize = 10;
const DEFAULT_SPECIALIZED_RATIO: f64 = 0.6;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub primary_target: Option<String>,
    pub delegate_target: Option<String>,
    pub requests_per_batch: usize,
    pub region: String,
    pub endpoint: String,
    pub cache_ttl: Duration,
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub specialized_ratio: f64,
    pub prompts_path: PathBuf,
    pub fault_rate: f64,
    pub credentials: Option<Credentials>,
    pub api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let region = get("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = get("RELAY_ENDPOINT").unwrap_or_else(|| regional_endpoint(&region));

        let specialized_ratio = parse_or(&get, "RELAY_SPECIALIZED_RATIO", DEFAULT_SPECIALIZED_RATIO)?;
        ensure_fraction("RELAY_SPECIALIZED_RATIO", specialized_ratio)?;
        let fault_rate = parse_or(&get, "RELAY_FAULT_RATE", 0.0)?;
        ensure_fraction("RELAY_FAULT_RATE", fault_rate)?;

        let max_attempts = parse_or(&get, "RELAY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(RelayError::Configuration(
                "RELAY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let credentials = match (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token: get("AWS_SESSION_TOKEN"),
            }),
            (Some(_), None) | (None, Some(_)) => {
                return Err(RelayError::Configuration(
                    "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
                ))
            }
            (None, None) => None,
        };

        Ok(Self {
            primary_target: get(PRIMARY_TARGET_ENV),
            delegate_target: get(DELEGATE_TARGET_ENV),
            requests_per_batch: parse_or(&get, "REQUESTS_PER_INVOKE", DEFAULT_REQUESTS_PER_BATCH)?,
            region,
            endpoint,
            cache_ttl: Duration::from_secs(parse_or(
                &get,
                "RELAY_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL.as_secs(),
            )?),
            min_interval: Duration::from_millis(parse_or(
                &get,
                "RELAY_MIN_INTERVAL_MS",
                DEFAULT_MIN_INTERVAL.as_millis() as u64,
            )?),
            max_attempts,
            attempt_timeout: Duration::from_millis(parse_or(
                &get,
                "RELAY_ATTEMPT_TIMEOUT_MS",
                DEFAULT_ATTEMPT_TIMEOUT_MS,
            )?),
            specialized_ratio,
            prompts_path: get("RELAY_PROMPTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("prompts.json")),
            fault_rate,
            credentials,
            api_key: get("RELAY_API_KEY"),
        })
    }

    pub fn require_primary(&self) -> Result<&str> {
        self.primary_target.as_deref().ok_or_else(|| {
            RelayError::Configuration(format!("{PRIMARY_TARGET_ENV} environment variable not set"))
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::new()
            .with_cache_ttl(self.cache_ttl)
            .with_min_interval(self.min_interval)
            .with_attempt_timeout(self.attempt_timeout)
            .with_max_attempts(self.max_attempts)
    }

    /// SigV4 when AWS credentials are present, otherwise a bearer key, otherwise nothing.
    pub fn signer(&self) -> Arc<dyn RequestSigner> {
        if let Some(credentials) = &self.credentials {
            return Arc::new(SigV4Signer::new(
                credentials.clone(),
                self.region.clone(),
                SIGNING_SERVICE,
            ));
        }
        match &self.api_key {
            Some(key) => Arc::new(BearerSigner::new(key.clone())),
            None => Arc::new(Unsigned),
        }
    }

    pub fn http_invoker(&self) -> Result<HttpInvoker> {
        HttpInvoker::new(self.endpoint.clone(), self.attempt_timeout, self.signer())
    }

    pub fn fault_injector(&self) -> Arc<dyn FaultInjector> {
        if self.fault_rate > 0.0 {
            Arc::new(RandomFaults::new(self.fault_rate))
        } else {
            Arc::new(NoFaults)
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse::<T>().map_err(|err| {
            RelayError::Configuration(format!("invalid value '{raw}' for {key}: {err}"))
        }),
        None => Ok(default),
    }
}

fn ensure_fraction(key: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RelayError::Configuration(format!(
            "{key} must be between 0 and 1, got {value}"
        )))
    }
}
