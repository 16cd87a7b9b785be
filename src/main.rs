use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use workflow_sync::config;
use workflow_sync::history::{history_key, HistoryTimelineCache};
use workflow_sync::models::queue::StatusFilter;
use workflow_sync::models::transition::{ApprovalAction, EntityId, ItemId, TransitionInput};
use workflow_sync::queue::{ApprovalQueueController, BulkActionResult};
use workflow_sync::realtime::{ConnectionState, RealtimeSyncClient};
use workflow_sync::service::{PendingScope, TransitionRequestService};
use workflow_sync::transport::HttpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "workflow-sync"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    // LOG_FORMAT=json for machine-readable logs
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "workflow_sync=info".into()),
        ))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(telemetry_layer)
        .init();

    let args = cli::Cli::parse();
    let cfg = config::load_with(args.api_url)?;

    let transport = Arc::new(HttpTransport::new(&cfg)?);
    let service = TransitionRequestService::new(transport).with_default_role(cfg.default_role.clone());

    let result = run(args.command, &cfg, service).await;
    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run(
    command: cli::Commands,
    cfg: &config::Config,
    service: TransitionRequestService,
) -> anyhow::Result<()> {
    match command {
        cli::Commands::Pending { scope, query, filter } => {
            let filter = StatusFilter::parse(&filter)
                .with_context(|| format!("unknown filter '{}'", filter))?;
            let controller = build_controller(cfg, service, &scope);
            controller.refresh().await?;

            let items = controller.filtered(&query, filter).await;
            if items.is_empty() {
                println!("No matching approvals.");
                return Ok(());
            }
            println!(
                "{:<12} {:<10} {:<28} {:<24} {:<10}",
                "ID", "TYPE", "ENTITY", "REQUESTER", "STATUS"
            );
            for item in &items {
                println!(
                    "{:<12} {:<10} {:<28} {:<24} {:<10}",
                    item.id,
                    item.entity_type.as_deref().unwrap_or("-"),
                    truncate(&item.entity_name, 28),
                    truncate(&item.requester_name, 24),
                    format!("{:?}", item.status).to_lowercase()
                );
            }
            let counts = controller.counts().await;
            println!(
                "\n{} pending, {} approved, {} rejected ({} total)",
                counts.pending, counts.approved, counts.rejected, counts.total
            );
        }
        cli::Commands::Request {
            entity_type,
            entity_id,
            to_state,
            reason,
            project,
        } => {
            let mut input = TransitionInput::new(entity_type, parse_entity_id(&entity_id));
            if let Some(state) = to_state {
                input = input.to_state(state);
            }
            if let Some(reason) = reason {
                input = input.reason(reason);
            }
            if let Some(project) = project {
                input = input.project_id(parse_entity_id(&project));
            }
            let req = service.request_transition(input).await?;
            println!(
                "Transition requested:\n  ID:     {}\n  Status: {}",
                req.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                req.status.as_deref().unwrap_or("pending")
            );
        }
        cli::Commands::Approve { request_id } => {
            decide(&service, &request_id, ApprovalAction::Approve, None).await?;
        }
        cli::Commands::Reject { request_id, reason } => {
            decide(&service, &request_id, ApprovalAction::Reject, Some(&reason)).await?;
        }
        cli::Commands::Escalate { request_id, reason } => {
            decide(&service, &request_id, ApprovalAction::Escalate, reason.as_deref()).await?;
        }
        cli::Commands::ApproveAll { scope } => {
            let controller = build_controller(cfg, service, &scope);
            controller.refresh().await?;
            controller.select_all_pending().await;
            let result = controller.bulk_approve().await;
            for id in result.succeeded() {
                println!("approved {}", id);
            }
            for f in result.failed() {
                println!("FAILED   {}: {}", f.id, f.reason);
            }
            match result {
                BulkActionResult::Empty => println!("Nothing to approve."),
                BulkActionResult::AllSucceeded { .. } => {}
                BulkActionResult::PartialFailure { ref failed, .. } | BulkActionResult::AllFailed { ref failed } => {
                    anyhow::bail!("{} approval(s) failed", failed.len());
                }
            }
        }
        cli::Commands::History { entity_type, entity_id } => {
            let id = parse_entity_id(&entity_id);
            let cache = HistoryTimelineCache::new(service);
            cache.fetch(&entity_type, &id).await?;
            let key = history_key(&entity_type, &id);
            let events = cache.items(&key);
            if events.is_empty() {
                println!("No history for {}.", key);
            }
            for ev in events {
                println!(
                    "{:<26} {:<20} {:<16} {}",
                    ev.at.as_deref().unwrap_or("-"),
                    ev.actor.as_deref().unwrap_or("-"),
                    ev.action,
                    ev.note.as_deref().unwrap_or("")
                );
            }
        }
        cli::Commands::Watch { scope } => {
            let client = RealtimeSyncClient::from_config(cfg);
            if !client.is_enabled() {
                anyhow::bail!("WORKFLOW_REALTIME_URL is not set; nothing to watch");
            }
            let controller = Arc::new(build_controller(cfg, service, &scope));
            if let Err(e) = controller.refresh().await {
                tracing::warn!(error = %e, "initial queue load failed");
            }
            let listener = controller.attach(&client);
            client.connect();

            let mut states = client.watch_state();
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *states.borrow_and_update();
                        println!("realtime: {:?}", state);
                        if state == ConnectionState::Stopped {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let c = controller.counts().await;
                        println!("queue: {} pending / {} total", c.pending, c.total);
                    }
                }
            }

            client.disconnect();
            controller.shutdown();
            let _ = listener.await;
        }
    }
    Ok(())
}

fn build_controller(
    cfg: &config::Config,
    service: TransitionRequestService,
    scope: &cli::ScopeArgs,
) -> ApprovalQueueController {
    let pending_scope = match (scope.manager, scope.role.as_deref()) {
        (Some(id), _) => PendingScope::Manager(id),
        (None, Some(role)) if !role.trim().is_empty() => PendingScope::Role(role.trim().to_string()),
        _ => PendingScope::Role(service.default_role().to_string()),
    };
    ApprovalQueueController::from_config(service, pending_scope, cfg).with_status(scope.status.clone())
}

async fn decide(
    service: &TransitionRequestService,
    request_id: &str,
    action: ApprovalAction,
    reason: Option<&str>,
) -> anyhow::Result<()> {
    let id = ItemId::infer(request_id);
    let outcome = service.decide(&id, action, reason).await?;
    let message = outcome.message.unwrap_or_default();
    if !outcome.success {
        anyhow::bail!("{} {} rejected by server: {}", action, id, message);
    }
    println!("{} {}: {}", action, id, if message.is_empty() { "ok" } else { &message });
    Ok(())
}

fn parse_entity_id(raw: &str) -> EntityId {
    raw.trim()
        .parse::<i64>()
        .map(EntityId::Number)
        .unwrap_or_else(|_| EntityId::from(raw.trim()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
