use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::errors::{RelayError, Result};
use crate::signing::{RequestSigner, SignableRequest};

pub const SESSION_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-session-id";
pub const DEFAULT_QUALIFIER: &str = "DEFAULT";

/// One outbound call: which agent, what prompt, under which session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub target: String,
    pub prompt: String,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Performs exactly one call and returns the raw response body.
    async fn invoke(&self, invocation: &Invocation) -> Result<String>;
}

#[derive(Serialize)]
struct InvocationPayload<'a> {
    prompt: &'a str,
}

pub fn regional_endpoint(region: &str) -> String {
    format!("https://bedrock-agentcore.{region}.amazonaws.com")
}

pub struct HttpInvoker {
    http: reqwest::Client,
    endpoint: String,
    qualifier: String,
    timeout: Duration,
    signer: Arc<dyn RequestSigner>,
}

impl HttpInvoker {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RelayError::Configuration(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            qualifier: DEFAULT_QUALIFIER.to_string(),
            timeout,
            signer,
        })
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn invocation_url(&self, target: &str) -> Result<Url> {
        let raw = format!(
            "{}/runtimes/{}/invocations?qualifier={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(target),
            urlencoding::encode(&self.qualifier)
        );
        Url::parse(&raw).map_err(|err| {
            RelayError::Configuration(format!("invalid invocation url '{raw}': {err}"))
        })
    }

    fn build_request(&self, invocation: &Invocation) -> Result<SignableRequest> {
        if invocation.target.trim().is_empty() {
            return Err(RelayError::Configuration(
                "invocation target must not be empty".to_string(),
            ));
        }
        let url = self.invocation_url(&invocation.target)?;
        let body = serde_json::to_vec(&InvocationPayload {
            prompt: &invocation.prompt,
        })
        .map_err(|err| RelayError::InvalidRequest(err.to_string()))?;
        let mut request =
            SignableRequest::new("POST", url, body).with_header("content-type", "application/json");
        if let Some(session_id) = &invocation.session_id {
            request.set_header(SESSION_HEADER, session_id.clone());
        }
        self.signer.sign(&mut request, Utc::now())?;
        Ok(request)
    }
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<String> {
        let SignableRequest {
            url, headers, body, ..
        } = self.build_request(invocation)?;
        debug!(%url, "invoking remote agent");

        let mut req = self.http.post(url).body(body);
        for (name, value) in &headers {
            // reqwest derives Host from the URL.
            if name == "host" {
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }
        let response = req.send().await.map_err(|err| {
            if err.is_timeout() {
                RelayError::Timeout(self.timeout)
            } else {
                RelayError::Network(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable>".to_string());
            if status == StatusCode::TOO_MANY_REQUESTS || body.contains("ThrottlingException") {
                return Err(RelayError::Throttled(format!("status {status}: {body}")));
            }
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .text()
            .await
            .map_err(|err| RelayError::Network(format!("failed to read response body: {err}")))
    }
}
