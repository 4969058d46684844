use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approvals::api::render::OutcomePages;
use approvals::cli;
use approvals::config::{self, Config};
use approvals::engine::{ApprovalEngine, EngineSettings};
use approvals::jobs;
use approvals::notification::slack::SlackNotifier;
use approvals::notification::webhook::WebhookNotifier;
use approvals::notification::{ActionLinks, ApprovalNotifier, NotificationDispatcher};
use approvals::store::memory::MemoryStore;
use approvals::store::postgres::PgStore;
use approvals::store::ApprovalStore;
use approvals::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Export spans over OTLP when a collector endpoint is configured.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "approvals"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "approvals=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, in_memory).await
        }
        Some(cli::Commands::Workflow { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_workflow_command(&db, command).await
        }
        Some(cli::Commands::Approval { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let engine = build_engine(&cfg, Arc::new(db.clone()))?;
            handle_approval_command(&db, &engine, command).await
        }
        Some(cli::Commands::Audit { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_audit_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Engine with every notification channel the configuration enables.
fn build_engine(cfg: &Config, store: Arc<dyn ApprovalStore>) -> anyhow::Result<Arc<ApprovalEngine>> {
    let mut notifiers: Vec<Arc<dyn ApprovalNotifier>> = Vec::new();
    if !cfg.notify_webhook_urls.is_empty() {
        notifiers.push(Arc::new(WebhookNotifier::new(
            cfg.notify_webhook_urls.clone(),
            cfg.webhook_secret.clone(),
        )?));
    }
    if let Some(url) = &cfg.slack_webhook_url {
        notifiers.push(Arc::new(SlackNotifier::new(url.clone())));
    }
    if notifiers.is_empty() {
        tracing::warn!("no notification channel configured; approvers will not be contacted");
    }

    let settings = EngineSettings {
        default_timeout_hours: cfg.default_timeout_hours,
        links: ActionLinks::new(&cfg.public_url)?,
    };
    Ok(Arc::new(ApprovalEngine::new(
        store,
        NotificationDispatcher::new(notifiers),
        settings,
    )))
}

async fn run_server(cfg: Config, port: u16, in_memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn ApprovalStore> = if in_memory {
        tracing::warn!("Using in-memory store; all data is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url).await?;
        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    let engine = build_engine(&cfg, store)?;
    let state = Arc::new(AppState {
        engine: engine.clone(),
        pages: OutcomePages::new()?,
        admin_key: cfg.admin_key.clone(),
    });
    let app = approvals::build_router(state);

    if cfg.sweep_interval_secs > 0 {
        jobs::expiry::spawn(engine, Duration::from_secs(cfg.sweep_interval_secs));
        tracing::info!(
            every_secs = cfg.sweep_interval_secs,
            "Background expiry sweep started"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("approvals service listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_workflow_command(db: &PgStore, cmd: cli::WorkflowCommands) -> anyhow::Result<()> {
    match cmd {
        cli::WorkflowCommands::List => {
            let workflows = db.list_workflows().await?;
            if workflows.is_empty() {
                println!("No workflows found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<24} {:<12} {:<10} {:<6} {:<6} {:<6}",
                "ID", "NAME", "CATEGORY", "PRIORITY", "REV", "STEPS", "ACTIVE"
            );
            for w in workflows {
                println!(
                    "{:<38} {:<24} {:<12} {:<10} {:<6} {:<6} {:<6}",
                    w.id,
                    truncate(&w.name, 24),
                    w.category.as_deref().unwrap_or("*"),
                    w.priority.as_deref().unwrap_or("*"),
                    w.revision,
                    w.steps.len(),
                    w.is_active
                );
            }
        }
    }
    Ok(())
}

async fn handle_approval_command(
    db: &PgStore,
    engine: &ApprovalEngine,
    cmd: cli::ApprovalCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::ApprovalCommands::List => {
            let approvals = db.list_pending_approvals().await?;
            if approvals.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }
            println!(
                "{:<38} {:<38} {:<5} {:<30} EXPIRES",
                "ID", "REQUEST", "STEP", "APPROVER"
            );
            for r in approvals {
                println!(
                    "{:<38} {:<38} {:<5} {:<30} {}",
                    r.id,
                    r.request_id,
                    r.step_order,
                    truncate(&r.approver_email, 30),
                    r.token_expires_at
                );
            }
        }
        cli::ApprovalCommands::Sweep => {
            let report = engine.sweep_expired(chrono::Utc::now()).await?;
            println!(
                "Expired {} approval(s); updated {} request(s).",
                report.records_expired, report.requests_updated
            );
        }
    }
    Ok(())
}

async fn handle_audit_command(db: &PgStore, cmd: cli::AuditCommands) -> anyhow::Result<()> {
    match cmd {
        cli::AuditCommands::List { request_id } => {
            let entries = db.list_audit(request_id).await?;
            if entries.is_empty() {
                println!("No audit entries for request {}.", request_id);
                return Ok(());
            }
            println!(
                "{:<26} {:<9} {:<5} {:<30} {:<16} NOTES",
                "AT", "ACTION", "STEP", "BY", "IP"
            );
            for e in entries {
                println!(
                    "{:<26} {:<9} {:<5} {:<30} {:<16} {}",
                    e.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    e.new_status,
                    e.metadata.step_order,
                    truncate(&e.performed_by_email, 30),
                    e.ip_address.as_deref().unwrap_or("-"),
                    e.notes.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
