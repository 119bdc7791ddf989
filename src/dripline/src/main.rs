//! Dripline, an event-driven marketing automation engine.
//!
//! Main entry point that wires the stores, trigger matcher, scheduler and
//! delivery adapters, then runs until interrupted.

use clap::Parser;
use dripline_campaigns::{CampaignStore, StatsRegistry};
use dripline_conditions::ConditionEvaluator;
use dripline_core::clock::system_clock;
use dripline_core::config::AppConfig;
use dripline_core::contacts::{Contact, InMemoryContactStore};
use dripline_core::event_bus::noop_sink;
use dripline_core::history::EventHistory;
use dripline_core::types::event_types;
use dripline_core::webhooks::LoggingWebhookCaller;
use dripline_core::TriggerEvent;
use dripline_delivery::{ActionExecutor, SchedulerLoop, SendGridMailer};
use dripline_journey::{BranchEvaluator, JourneyLifecycle, JourneyStore};
use dripline_triggers::{EventIntake, EventRouter, TriggerMatcher};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dripline")]
#[command(about = "Event-driven marketing automation engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DRIPLINE__NODE_ID")]
    node_id: Option<String>,

    /// Scheduler tick interval in milliseconds (overrides config)
    #[arg(long, env = "DRIPLINE__SCHEDULER__TICK_INTERVAL_MS")]
    tick_interval_ms: Option<u64>,

    /// Metrics port (overrides config)
    #[arg(long, env = "DRIPLINE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Seed demo campaigns and contacts, then queue signup events for them
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dripline=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Dripline starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(interval) = cli.tick_interval_ms {
        config.scheduler.tick_interval_ms = interval;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    info!(
        node_id = %config.node_id,
        tick_interval_ms = config.scheduler.tick_interval_ms,
        tick_batch_limit = config.scheduler.tick_batch_limit,
        metrics_port = config.metrics.port,
        sandbox = config.delivery.sandbox,
        "Configuration loaded"
    );

    // Start metrics exporter
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics.port)))
        .install()
    {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Shared engine state
    let clock = system_clock();
    let history = Arc::new(EventHistory::new(config.history.max_events_per_contact));
    let contacts = Arc::new(InMemoryContactStore::new());
    let campaigns = CampaignStore::new();
    let stats = Arc::new(StatsRegistry::new());
    let sink = noop_sink();

    let lifecycle = JourneyLifecycle::new(
        JourneyStore::new(),
        Arc::clone(&stats),
        Arc::clone(&sink),
        Arc::clone(&clock),
    );
    let evaluator = Arc::new(ConditionEvaluator::new(
        Arc::clone(&history),
        Arc::clone(&clock),
    ));

    // Event intake: webhooks and SDKs push trigger events into the router
    let matcher = Arc::new(TriggerMatcher::new(
        campaigns.clone(),
        contacts.clone(),
        Arc::clone(&evaluator),
        lifecycle.clone(),
        Arc::clone(&stats),
    ));
    let router = EventRouter::new(
        Arc::clone(&history),
        contacts.clone(),
        campaigns.clone(),
        Arc::clone(&evaluator),
        lifecycle.clone(),
        matcher,
        Arc::clone(&stats),
        Arc::clone(&sink),
    );
    let intake = EventIntake::start(router, config.intake.buffer_size, Arc::clone(&sink));

    // Delivery: scheduled actions run against the SendGrid adapter
    let mailer = Arc::new(SendGridMailer::new(config.delivery.clone()));
    let executor = Arc::new(ActionExecutor::new(
        campaigns.clone(),
        contacts.clone(),
        lifecycle.clone(),
        BranchEvaluator::new(Arc::clone(&history)),
        evaluator,
        mailer,
        Arc::new(LoggingWebhookCaller),
        Arc::clone(&stats),
        Arc::clone(&sink),
        config.scheduler.tick_batch_limit,
    ));
    let scheduler_handle = SchedulerLoop::new(
        executor,
        Arc::clone(&clock),
        std::time::Duration::from_millis(config.scheduler.tick_interval_ms),
    )
    .spawn();

    // Periodic sweep for duplicate active journeys
    let lifecycle_for_sweep = lifecycle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let reconciled = lifecycle_for_sweep.reconcile_active();
            if reconciled > 0 {
                warn!(reconciled, "duplicate active journeys reconciled");
            }
        }
    });

    if cli.seed_demo {
        let seeded = campaigns.seed_demo_campaigns("demo")?;
        info!(campaigns = seeded.len(), "Demo campaigns seeded");
        for n in 1..=3 {
            let contact_id = format!("demo-contact-{n}");
            contacts.insert(
                Contact::new(&contact_id, "demo", format!("{contact_id}@example.com"))
                    .with_name("Demo", format!("User {n}")),
            );
            intake.emit(TriggerEvent::new(
                event_types::CONTACT_CREATED,
                "demo",
                &contact_id,
            ));
        }
        info!("Demo signup events queued");
    }

    info!("Dripline is ready to process events");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler");
    scheduler_handle.abort();

    Ok(())
}
