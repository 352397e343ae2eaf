//  ██████╗██╗██╗   ██╗██╗ ██████╗
// ██╔════╝██║██║   ██║██║██╔════╝
// ██║     ██║██║   ██║██║██║
// ██║     ██║╚██╗ ██╔╝██║██║
// ╚██████╗██║ ╚████╔╝ ██║╚██████╗
//  ╚═════╝╚═╝  ╚═══╝  ╚═╝ ╚═════╝
//
// I N T A K E   E N G I N E
//
// Citizens describe a problem. A model guesses what kind of problem it is.
// Geometry decides whether somebody already told us. Postgres remembers.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use civic_intake_engine::api::{self, AppState};
use civic_intake_engine::circuit_breaker::CircuitBreaker;
use civic_intake_engine::classifier::{ClassificationBoundary, HttpClassifier};
use civic_intake_engine::config::Config;
use civic_intake_engine::metrics::IntakeMetrics;
use civic_intake_engine::store::{MemoryStore, PgStore, Store};

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║        ██████╗██╗██╗   ██╗██╗ ██████╗                            ║
    ║       ██╔════╝██║██║   ██║██║██╔════╝                            ║
    ║       ██║     ██║██║   ██║██║██║                                 ║
    ║       ██║     ██║╚██╗ ██╔╝██║██║                                 ║
    ║       ╚██████╗██║ ╚████╔╝ ██║╚██████╗                            ║
    ║        ╚═════╝╚═╝  ╚═══╝  ╚═╝ ╚═════╝                            ║
    ║                                                                  ║
    ║              ⚡ CITIZEN ISSUE INTAKE ENGINE ⚡                    ║
    ║                                                                  ║
    ║   Intake:     spam screen → classify → route → merge or file     ║
    ║   Dedup:      haversine overlap, larger radius wins              ║
    ║   Locking:    geohash neighbourhood tokens per category          ║
    ║   Resilience: circuit breaker + timeout on every model call      ║
    ║                                                                  ║
    ║   "One pothole, one ticket."                                     ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    if let Some(url) = &config.database_url {
        let store = PgStore::connect(url, config.db_max_connections)
            .await
            .context("connecting to Postgres")?;
        info!("✅ Postgres store online");
        return Ok(Arc::new(store));
    }

    warn!("No CIVIC_INTAKE_DATABASE_URL set, using the in-memory store; reports will not survive a restart");
    let store = match &config.authority_seed {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading authority seed {}", path.display()))?;
            MemoryStore::from_seed_json(&json).with_context(|| format!("parsing authority seed {}", path.display()))?
        }
        None => {
            warn!("No CIVIC_INTAKE_AUTHORITY_SEED set, every submission will find no authority");
            MemoryStore::new()
        }
    };
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_logging(config.log_json);

    print_banner();

    info!("🏛️  CIVIC INTAKE ENGINE initializing...");
    info!(
        bind_addr = %config.bind_addr,
        classifier_url = %config.classifier_url,
        classifier_model = %config.classifier_model,
        default_category = %config.default_category,
        "✅ Configuration loaded"
    );

    let store = build_store(&config).await?;

    let classifier = HttpClassifier::new(
        config.classifier_url.clone(),
        config.classifier_api_key.clone(),
        config.classifier_model.clone(),
    )
    .context("building classifier client")?;
    if config.classifier_api_key.is_empty() {
        warn!("No CIVIC_INTAKE_CLASSIFIER_API_KEY set, expect every classification to fall back to defaults");
    }

    let breaker = CircuitBreaker::new(
        "classifier",
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_reset_timeout,
        config.circuit_breaker_success_threshold,
    );
    let boundary = Arc::new(ClassificationBoundary::new(
        Arc::new(classifier),
        breaker,
        config.classifier_timeout,
        config.default_category,
    ));
    info!(timeout_ms = config.classifier_timeout.as_millis() as u64, "✅ Classification boundary armed");

    let metrics = Arc::new(IntakeMetrics::new());
    let state = Arc::new(AppState::new(store, boundary, metrics, config.geo_cell_precision));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    info!("═══════════════════════════════════════════════════════");
    info!("  🟢 CIVIC INTAKE ENGINE ACTIVE on http://{}", config.bind_addr);
    info!("  📊 Metrics at /metrics");
    info!("  ⚡ Press Ctrl+C for graceful shutdown");
    info!("═══════════════════════════════════════════════════════");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("💤 CIVIC INTAKE ENGINE: OFFLINE");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => warn!("🛑 Shutdown signal received, draining in-flight requests"),
        Err(err) => error!("❌ Signal listener error: {}", err),
    }
}
