use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use deal_finder::config::AppConfig;
use deal_finder::database::SearchHistory;
use deal_finder::orchestrator::SearchOrchestrator;
use deal_finder::rate_limiter::RateLimiter;
use deal_finder::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deal_finder=info,warn")),
        )
        .init();

    info!("Starting deal finder");

    let config = AppConfig::from_env()?;
    config.warn_unconfigured();

    // History is optional: searches still work if the store cannot be opened
    let history = match SearchHistory::connect(&config.database_url).await {
        Ok(history) => Some(history),
        Err(e) => {
            error!("Search history disabled: {:#}", e);
            None
        }
    };

    let mut orchestrator = SearchOrchestrator::from_config(&config)?;
    if let Some(history) = &history {
        orchestrator = orchestrator.with_history(history.clone());
    }

    let limiter = Arc::new(RateLimiter::new(config.max_tracked_identities));

    // Sweep expired rate-limit windows every minute
    let sched = JobScheduler::new().await?;

    let job_limiter = limiter.clone();
    sched
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let limiter = job_limiter.clone();
            Box::pin(async move {
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!("Swept {} expired rate limit windows", removed);
                }
            })
        })?)
        .await?;

    info!("Scheduler started - sweeping rate limits every minute");
    sched.start().await?;

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        limiter,
        policy: config.rate_limit,
        history,
        trust_forwarded_headers: config.trust_forwarded_headers,
    };

    server::run_http_server(config.bind_addr, state).await
}
