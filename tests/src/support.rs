use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use relay::{Invocation, RelayError, RemoteInvoker};
use tempfile::NamedTempFile;
use tokio::time::Instant;

pub const PRIMARY: &str = "arn:aws:bedrock-agentcore:us-east-1:111122223333:runtime/pet-clinic";
pub const NUTRITION: &str = "arn:aws:bedrock-agentcore:us-east-1:111122223333:runtime/nutrition";

/// Remote agent double: plays back queued replies, then repeats `default`.
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<relay::Result<String>>>,
    default: fn(&Invocation) -> relay::Result<String>,
    calls: Mutex<Vec<(Instant, Invocation)>>,
}

impl ScriptedAgent {
    pub fn new(default: fn(&Invocation) -> relay::Result<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            default,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn echo() -> Arc<Self> {
        Self::new(|invocation| {
            Ok(serde_json::json!({ "output": format!("answer: {}", invocation.prompt) }).to_string())
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(RelayError::Network("connection refused".to_string())))
    }

    pub fn queue(&self, reply: relay::Result<String>) {
        self.replies.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(_, invocation)| invocation.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteInvoker for ScriptedAgent {
    async fn invoke(&self, invocation: &Invocation) -> relay::Result<String> {
        self.calls.lock().push((Instant::now(), invocation.clone()));
        let queued = self.replies.lock().pop_front();
        queued.unwrap_or_else(|| (self.default)(invocation))
    }
}

pub fn prompts_file(specialized: &[&str], general: &[&str]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    let body = serde_json::json!({
        "nutrition-queries": specialized,
        "non-nutrition-queries": general,
    });
    write!(file, "{body}")?;
    Ok(file)
}
