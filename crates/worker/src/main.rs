use videogen::api;
use videogen::config;
use videogen::db;
use videogen::videos::{PollSweeper, ServiceDeps, ServiceSettings, SweepConfig, VideoService};

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("videogen=info,videogen_worker=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::Config::from_env()?;
    let sweep_cfg = SweepConfig::from_config(&cfg);
    let api_addr = cfg.api_addr.clone();

    tracing::info!(
        api = api_addr.as_deref().unwrap_or("disabled"),
        public_url = %cfg.public_url,
        migrate_on_startup = cfg.migrate_on_startup,
        poll_interval_secs = sweep_cfg.interval.as_secs(),
        poll_grace_secs = sweep_cfg.grace.as_secs(),
        max_retries = cfg.retry.max_retries,
        max_poll_failures = cfg.max_poll_failures,
        fal = if cfg.providers.fal_key.is_some() { "configured" } else { "missing key" },
        runway = if cfg.providers.runway_api_key.is_some() { "configured" } else { "missing key" },
        "videogen starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let service = VideoService::new(
        ServiceDeps::from_config(&cfg, pool)?,
        ServiceSettings::from_config(&cfg),
    );
    tracing::info!(engines = service.engines().len(), "engine registry ready");

    let cancel = CancellationToken::new();

    // ---- API task ----
    let app = api::router(api::ApiState {
        videos: service.clone(),
    });
    let mut api_handle = tokio::spawn(serve_api(api_addr, app, cancel.clone()));

    // ---- Poll sweep task ----
    let sweeper = PollSweeper::new(service, sweep_cfg);
    let sweep_handle = tokio::spawn(sweeper.run(cancel.clone()));

    let mut api_done = false;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutdown requested");
        }
        res = &mut api_handle => {
            res??;
            tracing::warn!("api task exited");
            api_done = true;
        }
    }

    cancel.cancel();
    if !api_done {
        // let in-flight requests drain
        api_handle.await??;
    }
    sweep_handle.await?;
    tracing::info!("videogen stopped");

    Ok(())
}

/// Serve the API until `cancel` fires, then finish in-flight requests.
/// With no address the task just waits for shutdown.
async fn serve_api(
    addr: Option<String>,
    app: axum::Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let Some(addr) = addr else {
        cancel.cancelled().await;
        return Ok(());
    };
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("api listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
