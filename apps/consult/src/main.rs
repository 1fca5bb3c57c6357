use std::io::Read;
use std::sync::Arc;

use relay::{Settings, SpecialistDelegate};
use tracing::{dispatcher, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let settings = Settings::from_env()?;
    let query = read_query()?;
    let session_id = std::env::var("RELAY_SESSION_ID")
        .unwrap_or_else(|_| format!("clinic-session-{}", Uuid::new_v4()));

    let invoker = Arc::new(settings.http_invoker()?);
    let delegate = SpecialistDelegate::new(
        settings.dispatcher_config(),
        invoker,
        settings.delegate_target.clone(),
    );

    info!(%session_id, "consulting specialist");
    let answer = delegate.consult_text(&query, Some(session_id)).await;
    println!("{answer}");
    Ok(())
}

/// The question comes from the command line, or from stdin when none is given.
fn read_query() -> anyhow::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let query = if args.is_empty() {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        args.join(" ")
    };
    let query = query.trim().to_string();
    if query.is_empty() {
        anyhow::bail!("a question is required, pass it as arguments or on stdin");
    }
    Ok(query)
}

fn init_tracing() -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn,relay=info".into());
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
