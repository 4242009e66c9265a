use std::env;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;
use videogen::config::{Config, ProviderConfig};
use videogen::db;
use videogen::engines::EngineRegistry;
use videogen::videos::{
    ListFilter, PollSweeper, ServiceDeps, ServiceSettings, SweepConfig, VideoService, VideoStatus,
};

const USAGE: &str = "videogenctl <command>\n\
     Commands:\n\
     - engines\n\
     - migrate\n\
     - show <video_id>\n\
     - list <user_id> [status]\n\
     - cancel <video_id>\n\
     - resubmit <video_id>\n\
     - sweep\n\
     \n\
     Reads the same environment as the worker (DATABASE_URL, UFAAS_BASE_URL, ...).\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("videogen=warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    if command == "engines" {
        let registry =
            EngineRegistry::with_default_engines(&ProviderConfig::default(), reqwest::Client::new());
        for d in registry.descriptors() {
            let mode = match (d.text_to_video, d.image_to_video) {
                (true, true) => "text+image",
                (true, false) => "text",
                _ => "image",
            };
            println!("{:<24} {:<28} {:>4} coins  {mode}", d.key, d.name, d.price);
        }
        return Ok(());
    }

    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url).await?;

    if command == "migrate" {
        db::run_migrations(&pool).await?;
        println!("migrations applied");
        return Ok(());
    }

    let service = VideoService::new(
        ServiceDeps::from_config(&cfg, pool)?,
        ServiceSettings::from_config(&cfg),
    );

    match command.as_str() {
        "show" => {
            let id = parse_id(args.get(2), "usage: videogenctl show <video_id>")?;
            show(&service, id).await?;
        }
        "list" => {
            let user_id = parse_id(args.get(2), "usage: videogenctl list <user_id> [status]")?;
            let status = args
                .get(3)
                .map(|s| s.parse::<VideoStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let filter = ListFilter {
                status,
                limit: 100,
                cursor: None,
            };
            for v in service.list(user_id, &filter).await? {
                println!(
                    "{} {:<10} {:<24} retries={} created_at={}",
                    v.id,
                    v.status.as_str(),
                    v.engine,
                    v.retry_count,
                    v.created_at.to_rfc3339()
                );
            }
        }
        "cancel" => {
            let id = parse_id(args.get(2), "usage: videogenctl cancel <video_id>")?;
            let video = service.cancel_video(id, None).await?;
            println!("video {} is {}", video.id, video.status);
        }
        "resubmit" => {
            let id = parse_id(args.get(2), "usage: videogenctl resubmit <video_id>")?;
            let video = service.submit(id).await?;
            println!(
                "video {} is {} request_id={:?}",
                video.id, video.status, video.request_id
            );
        }
        "sweep" => {
            let sweeper = PollSweeper::new(service, SweepConfig::from_config(&cfg));
            let summary = sweeper.sweep_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_id(raw: Option<&String>, usage: &str) -> anyhow::Result<Uuid> {
    let raw = raw.ok_or_else(|| anyhow::anyhow!("{usage}"))?;
    Ok(raw.parse()?)
}

async fn show(service: &VideoService, id: Uuid) -> anyhow::Result<()> {
    let video = service.get(id, None).await?;

    println!(
        "VIDEO: id={} user={} engine={} status={} progress={} retries={} request_id={:?} usage_id={:?} retry_at={:?}",
        video.id,
        video.user_id,
        video.engine,
        video.status,
        video.task_progress,
        video.retry_count,
        video.request_id,
        video.usage_id,
        video.retry_at
    );
    if let Some(url) = video.result_url() {
        println!("RESULT: {url}");
    }

    for r in service.reports(id, None).await? {
        println!("{} | {:?} | {}", r.created_at.to_rfc3339(), r.kind, r.message);
    }

    Ok(())
}
