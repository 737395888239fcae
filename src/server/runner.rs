//! Server runner
//!
//! Entry point for the binary: logging setup, then the HTTP server.

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::routes::{AppState, router};
use crate::cli::Cli;
use crate::session::{Executor, MemoryStore, SessionRegistry};
use crate::tracing::ResultTraceExt;

#[cfg(feature = "otel")]
use opentelemetry::global;
#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace::SdkTracerProvider;

#[cfg(feature = "otel")]
static OTEL_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

/// Flush and shut down the OpenTelemetry provider
///
/// Call before exit so pending spans reach the collector.
#[cfg(feature = "otel")]
pub fn shutdown_otel() {
    if let Some(provider) = OTEL_PROVIDER.get() {
        tracing::info!("Shutting down OpenTelemetry provider...");
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shutdown OpenTelemetry provider: {:?}", e);
        } else {
            tracing::info!("OpenTelemetry provider shutdown complete");
        }
    }
}

#[cfg(not(feature = "otel"))]
pub fn shutdown_otel() {}

#[cfg(feature = "otel")]
fn init_otel(endpoint: &str, service_name: &str) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}

/// Build an EnvFilter based on CLI args and RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }

    tracing_subscriber::EnvFilter::from_default_env().add_directive(cli.log_level().into())
}

/// Install the subscriber with a fmt layer writing to `writer`
fn install_subscriber<W>(cli: &Cli, writer: W) -> anyhow::Result<()>
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_env_filter(cli);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = cli.otel_endpoint.as_deref() {
            let service_name = &cli.otel_service_name;
            eprintln!(
                "OpenTelemetry enabled: endpoint={}, service={}",
                endpoint, service_name
            );

            let provider = init_otel(endpoint, service_name)?;
            let tracer = provider.tracer("claude-stream-bridge");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            drop(OTEL_PROVIDER.set(provider));

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
    Ok(())
}

/// Initialize logging with file output (diagnostic mode)
fn init_logging_to_file(cli: &Cli) -> anyhow::Result<()> {
    let log_path = cli.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(&log_path)?;

    eprintln!("Diagnostic mode: logging to {}", log_path.display());

    install_subscriber(cli, std::sync::Mutex::new(file))
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    if cli.is_diagnostic() {
        init_logging_to_file(cli)
    } else {
        install_subscriber(cli, std::io::stderr)
    }
}

/// Run the bridge server with CLI arguments
///
/// Initializes logging, builds the executor from the flags and serves the
/// router until the future is dropped.
pub async fn run_with_cli(cli: &Cli) -> anyhow::Result<()> {
    let startup_time = std::time::Instant::now();

    init_logging(cli)?;

    let config = Arc::new(cli.to_config()?);
    let registry = Arc::new(SessionRegistry::new());
    let executor = Executor::new(Arc::clone(&config), registry);
    let state = AppState::new(executor, Arc::new(MemoryStore::new()));

    {
        let startup_span = tracing::info_span!(
            "bridge_startup",
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
            diagnostic = %cli.is_diagnostic(),
            otel_enabled = %cli.is_otel_enabled(),
        );
        let _enter = startup_span.enter();

        tracing::info!(
            bind = %cli.bind,
            backend = config.backend.as_str(),
            claude_binary = %config.claude_binary,
            shell = %config.shell,
            silence_timeout_secs = config.silence_timeout.as_secs(),
            ceiling_timeout_secs = config.ceiling_timeout.as_secs(),
            heartbeat_secs = config.heartbeat_interval.as_secs(),
            resume_window_secs = config.resume_window.as_secs(),
            provider_overrides = config.provider.is_configured(),
            has_api_key = config.provider.api_key.is_some(),
            "Bridge configured"
        );

        if cli.is_diagnostic() {
            tracing::info!(log_path = %cli.log_path().display(), "Diagnostic mode enabled");
        }
    }

    let probe = state.executor.launcher().probe().await;
    if probe.available {
        tracing::info!(version = ?probe.version, "Claude CLI available");
    } else {
        tracing::warn!("Claude CLI not available, sessions will fail to launch");
    }

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .trace_context()?;
    tracing::info!(
        addr = %cli.bind,
        startup_ms = startup_time.elapsed().as_millis(),
        "Listening"
    );

    let result = axum::serve(listener, router(state)).await;

    let uptime = startup_time.elapsed();
    match result {
        Ok(()) => {
            tracing::info!(uptime_secs = uptime.as_secs(), "Server stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, uptime_secs = uptime.as_secs(), "Server error");
            Err(e.into())
        }
    }
}
