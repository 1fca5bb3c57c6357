use std::sync::Arc;

use relay::{Dispatcher, PromptCatalog, Settings, TrafficGenerator};
use serde_json::json;
use tracing::{dispatcher, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let settings = Settings::from_env()?;

    let primary = match settings.require_primary() {
        Ok(primary) => primary.to_string(),
        Err(err) => {
            println!(
                "{}",
                json!({ "statusCode": 500, "body": { "error": err.to_string() } })
            );
            return Err(err.into());
        }
    };
    let count = resolve_request_count(settings.requests_per_batch)?;
    let catalog = PromptCatalog::load(&settings.prompts_path)?;

    let invoker = Arc::new(settings.http_invoker()?);
    let dispatcher = Dispatcher::new(settings.dispatcher_config(), invoker)
        .with_faults(settings.fault_injector());
    let generator = TrafficGenerator::new(dispatcher, primary, catalog)
        .with_delegate(settings.delegate_target.clone())
        .with_specialized_ratio(settings.specialized_ratio);

    info!(
        count,
        region = %settings.region,
        delegate = settings.delegate_target.is_some(),
        "starting traffic batch"
    );
    let report = generator.run(count).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "statusCode": 200, "body": report }))?
    );
    Ok(())
}

/// A positional argument overrides `REQUESTS_PER_INVOKE`.
fn resolve_request_count(default: usize) -> anyhow::Result<usize> {
    match std::env::args().nth(1) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|err| anyhow::anyhow!("invalid request count '{raw}': {err}")),
        None => Ok(default),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,reqwest=warn".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
