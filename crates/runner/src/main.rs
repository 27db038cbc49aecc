//! `genq-runner` -- headless generation-queue daemon.
//!
//! Reloads the persisted task state, reconciles restart damage, re-attaches
//! polling loops for in-flight jobs, resubmits queued work, and then serves
//! until interrupted.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default              | Description                          |
//! |---------------------------|----------|----------------------|--------------------------------------|
//! | `GENQ_API_URL`            | yes      | --                   | Base URL of the generation backend   |
//! | `GENQ_API_TOKEN`          | yes      | --                   | Bearer token for the backend         |
//! | `GENQ_STATE_FILE`         | no       | `genq-tasks.json`    | Durable task-store file              |
//! | `GENQ_HISTORY_FILE`       | no       | `genq-history.jsonl` | Archived-results sink                |
//! | `GENQ_POLL_INTERVAL_SECS` | no       | `5`                  | Seconds between status polls         |
//! | `GENQ_POLL_BUDGET_SECS`   | no       | `7200`               | Per-task polling budget in seconds   |
//! | `GENQ_MAX_TEXT_TO_VIDEO`  | no       | `3`                  | Concurrency cap for text-to-video    |
//! | `GENQ_MAX_IMAGE_TO_VIDEO` | no       | `3`                  | Concurrency cap for image-to-video   |
//! | `GENQ_MAX_ENHANCE`        | no       | `1`                  | Concurrency cap for enhance          |

use std::sync::Arc;
use std::time::Duration;

use genq_core::Category;
use genq_engine::{AllowAll, ConcurrencyLimiter, PollConfig, PollingEngine, Scheduler};
use genq_events::EventBus;
use genq_remote::HttpBackend;
use genq_runner::history::JsonlHistory;
use genq_store::{JsonFilePersistence, TaskStore};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genq_runner=info,genq_engine=info,genq_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_url = std::env::var("GENQ_API_URL").unwrap_or_else(|_| {
        tracing::error!("GENQ_API_URL environment variable is required");
        std::process::exit(1);
    });
    let api_token = std::env::var("GENQ_API_TOKEN").unwrap_or_else(|_| {
        tracing::error!("GENQ_API_TOKEN environment variable is required");
        std::process::exit(1);
    });
    let state_file =
        std::env::var("GENQ_STATE_FILE").unwrap_or_else(|_| "genq-tasks.json".to_string());
    let history_file =
        std::env::var("GENQ_HISTORY_FILE").unwrap_or_else(|_| "genq-history.jsonl".to_string());
    let config = PollConfig {
        interval: Duration::from_secs(env_parsed("GENQ_POLL_INTERVAL_SECS", 5)),
        budget: Duration::from_secs(env_parsed("GENQ_POLL_BUDGET_SECS", 7200)),
    };

    tracing::info!(
        api_url = %api_url,
        state_file = %state_file,
        history_file = %history_file,
        "Starting genq-runner",
    );

    let store = Arc::new(TaskStore::new(Arc::new(JsonFilePersistence::new(
        state_file,
    ))));
    let backend = Arc::new(HttpBackend::new(api_url, api_token));
    let bus = Arc::new(EventBus::default());
    let limiter = ConcurrencyLimiter::new();
    let poller = PollingEngine::new(
        store.clone(),
        backend.clone(),
        Arc::new(JsonlHistory::new(history_file)),
        bus.clone(),
        limiter.clone(),
        config,
    );
    let scheduler = Scheduler::new(
        store.clone(),
        backend,
        Arc::new(AllowAll),
        poller.clone(),
        bus.clone(),
        limiter,
    );

    for (category, var) in [
        (Category::TextToVideo, "GENQ_MAX_TEXT_TO_VIDEO"),
        (Category::ImageToVideo, "GENQ_MAX_IMAGE_TO_VIDEO"),
        (Category::Enhance, "GENQ_MAX_ENHANCE"),
    ] {
        let cap = env_parsed(var, category.default_max_concurrent());
        if let Err(err) = scheduler.set_limit(category, cap) {
            tracing::error!(%category, cap, error = %err, "Invalid concurrency cap");
            std::process::exit(1);
        }
    }

    // Mirror the event stream into the log.
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "Task event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = match store.load().await {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = %err, "Could not load the persisted task state");
            std::process::exit(1);
        }
    };
    tracing::info!(
        loaded = report.loaded,
        failed = report.failed.len(),
        resumable = report.resumable,
        "Task state reloaded",
    );

    let reattached = poller.resume().await;
    let resubmitted = scheduler.resume_queued().await;
    tracing::info!(reattached, resubmitted, "Recovery complete; serving");

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Could not listen for the interrupt signal");
    }
    tracing::info!("Interrupt received; shutting down");
    scheduler.shutdown().await;
}
