//! Logsentry binary — watch a log file and alert on pattern matches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use logsentry::config::SentryConfig;
use logsentry::dispatch::{BindingRegistry, Dispatcher};
use logsentry::events::{CoreEvent, EventBus};
use logsentry::providers::chat::ChatProvider;
use logsentry::providers::sms::SmsProvider;
use logsentry::providers::{NotificationProvider, ProviderKind, StatusCheck};
use logsentry::tailer::{run_tail_loop, TailLoopDeps, Tailer};
use logsentry::tasks::LoopHandle;
use logsentry::tracker::{run_sweep_loop, DeliveryTracker};

/// How long `stop()` waits for each background loop on shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "logsentry", about = "Pattern-triggered log alerting", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the configured file and dispatch alerts until interrupted.
    Start,
    /// Send a one-shot alert to a recipient over the enabled providers.
    Send {
        /// Application user id of the recipient.
        recipient: String,
        /// Message text.
        body: String,
        /// Restrict to specific providers (default: all enabled).
        #[arg(long, value_delimiter = ',')]
        providers: Vec<ProviderKind>,
    },
    /// Query the SMS gateway for the delivery status of a message id.
    Status {
        /// Provider-assigned message id.
        text_id: String,
    },
    /// Dry-run request validating the SMS gateway key without sending.
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SentryConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Start => {
            let _guard = logsentry::logging::init_production(
                std::path::Path::new(&config.log.dir),
                &config.log.level,
            )?;
            run_start(config).await
        }
        Command::Send {
            recipient,
            body,
            providers,
        } => {
            logsentry::logging::init_cli();
            run_send(config, &recipient, &body, providers).await
        }
        Command::Status { text_id } => {
            logsentry::logging::init_cli();
            run_status(config, &text_id).await
        }
        Command::Test => {
            logsentry::logging::init_cli();
            run_test(config).await
        }
    }
}

/// Build the enabled provider set from config.
fn build_providers(
    config: &SentryConfig,
) -> Result<HashMap<ProviderKind, Arc<dyn NotificationProvider>>> {
    let mut providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>> = HashMap::new();
    if config.sms.enabled {
        let sms = SmsProvider::new(&config.sms).context("failed to build sms provider")?;
        if sms.is_free_tier() {
            info!("sms provider using free tier key");
        }
        providers.insert(ProviderKind::Sms, Arc::new(sms));
    }
    if config.chat.enabled {
        let chat = ChatProvider::new(&config.chat).context("failed to build chat provider")?;
        providers.insert(ProviderKind::Chat, Arc::new(chat));
    }
    Ok(providers)
}

/// Seed the binding registry from the per-provider recipient tables.
async fn seed_bindings(config: &SentryConfig, bindings: &BindingRegistry) {
    for (user, phone) in &config.sms.recipients {
        bindings.register(user, ProviderKind::Sms, phone).await;
    }
    for (user, account) in &config.chat.recipients {
        bindings.register(user, ProviderKind::Chat, account).await;
    }
}

/// Assemble tracker + dispatcher over the configured providers.
async fn build_pipeline(
    config: &SentryConfig,
    bus: EventBus,
) -> Result<(Arc<DeliveryTracker>, Arc<Dispatcher>)> {
    let providers = build_providers(config)?;
    if providers.is_empty() {
        anyhow::bail!("no providers enabled; enable [sms] or [chat] in the config");
    }

    let bindings = Arc::new(BindingRegistry::new());
    seed_bindings(config, &bindings).await;

    let tracker = Arc::new(DeliveryTracker::new(
        providers.clone(),
        bus.clone(),
        &config.tracker,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        providers,
        bindings,
        Arc::clone(&tracker),
        bus,
    ));
    Ok((tracker, dispatcher))
}

fn enabled_kinds(config: &SentryConfig) -> Vec<ProviderKind> {
    let mut kinds = Vec::new();
    if config.sms.enabled {
        kinds.push(ProviderKind::Sms);
    }
    if config.chat.enabled {
        kinds.push(ProviderKind::Chat);
    }
    kinds
}

/// Union of user ids across the enabled providers' recipient tables.
fn alert_recipients(config: &SentryConfig) -> Vec<String> {
    let mut users: Vec<String> = Vec::new();
    if config.sms.enabled {
        users.extend(config.sms.recipients.keys().cloned());
    }
    if config.chat.enabled {
        users.extend(config.chat.recipients.keys().cloned());
    }
    users.sort();
    users.dedup();
    users
}

async fn run_start(config: SentryConfig) -> Result<()> {
    let tailer = Tailer::configure(&config.watch.path, config.watch.patterns.clone())
        .context("invalid watch configuration")?;

    let bus = EventBus::new();
    let (tracker, dispatcher) = build_pipeline(&config, bus.clone()).await?;

    let recipients = alert_recipients(&config);
    if recipients.is_empty() {
        warn!("no recipients configured; matches will be detected but not delivered");
    }

    // Frontend stand-in: print core events to stdout.
    let mut events = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoreEvent::WatchStatus(text)) => println!("[watch] {text}"),
                Ok(CoreEvent::MatchFound { pattern, line }) => {
                    println!("[match] {pattern:?} in: {line}");
                }
                Ok(CoreEvent::MessageStateChanged { id, old, new }) => {
                    println!("[delivery] {id}: {old} -> {new}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let tail_deps = TailLoopDeps {
        tailer,
        dispatcher,
        bus: bus.clone(),
        interval: Duration::from_millis(config.watch.poll_interval_ms),
        alert_prefix: config.watch.alert_prefix.clone(),
        recipients,
        providers: enabled_kinds(&config),
    };
    let tail_handle = LoopHandle::spawn(|stop_rx| run_tail_loop(tail_deps, stop_rx));

    let sweep_interval = Duration::from_secs(config.tracker.sweep_interval_secs);
    let sweep_tracker = Arc::clone(&tracker);
    let sweep_handle =
        LoopHandle::spawn(move |stop_rx| run_sweep_loop(sweep_tracker, sweep_interval, stop_rx));

    info!(path = %config.watch.path, "logsentry started, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    if let Err(e) = tail_handle.stop(STOP_TIMEOUT).await {
        error!(error = %e, "tail loop did not stop cleanly");
    }
    if let Err(e) = sweep_handle.stop(STOP_TIMEOUT).await {
        error!(error = %e, "sweep loop did not stop cleanly");
    }
    printer.abort();

    for message in tracker.history().await {
        info!(
            id = %message.id,
            provider = %message.provider,
            state = %message.state,
            "final message state"
        );
    }
    Ok(())
}

async fn run_send(
    config: SentryConfig,
    recipient: &str,
    body: &str,
    providers: Vec<ProviderKind>,
) -> Result<()> {
    let bus = EventBus::new();
    let (tracker, dispatcher) = build_pipeline(&config, bus).await?;

    let kinds = if providers.is_empty() {
        enabled_kinds(&config)
    } else {
        providers
    };

    let outcomes = dispatcher.dispatch(body, recipient, &kinds).await;
    for (kind, outcome) in &outcomes {
        match &outcome.error {
            Some(cause) => println!("{kind}: {} ({cause})", outcome.state),
            None => println!("{kind}: {}", outcome.state),
        }
    }

    for message in tracker.history().await {
        if let Some(provider_id) = &message.provider_id {
            println!("{}: provider id {provider_id}", message.provider);
        }
    }
    Ok(())
}

async fn run_status(config: SentryConfig, text_id: &str) -> Result<()> {
    let sms = SmsProvider::new(&config.sms).context("failed to build sms provider")?;
    match logsentry::providers::StatusPoll::check_status(&sms, text_id).await {
        Ok(StatusCheck::Status(status)) => println!("{text_id}: {status}"),
        Ok(StatusCheck::NotFound) => {
            println!("{text_id}: unknown or expired at the gateway");
        }
        Err(e) => anyhow::bail!("status check failed: {e}"),
    }
    Ok(())
}

async fn run_test(config: SentryConfig) -> Result<()> {
    let sms = SmsProvider::new(&config.sms).context("failed to build sms provider")?;
    let outcome = sms.test_connection().await.context("gateway unreachable")?;
    if let Some(error) = &outcome.error {
        println!("gateway reachable, but reported: {error}");
    } else {
        println!("gateway connection ok");
    }
    if let Some(quota) = outcome.quota_remaining {
        println!("quota remaining: {quota}");
    }
    Ok(())
}
