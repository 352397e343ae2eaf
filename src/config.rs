// =============================================================================
// config.rs — EVERY KNOB ON THE INTAKE DESK
// =============================================================================
//
// All values come from `CIVIC_INTAKE_*` environment variables, with a `.env`
// file honoured if present. Every knob has a default, and a value that does
// not parse quietly falls back to that default: a typo in the timeout should
// not keep the city from hearing about its potholes.
// =============================================================================

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::geo::DEFAULT_CELL_PRECISION;
use crate::models::Category;

const PREFIX: &str = "CIVIC_INTAKE_";

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // HTTP
    // =========================================================================
    /// Where the API listens. Default: 0.0.0.0:8000
    pub bind_addr: SocketAddr,

    // =========================================================================
    // STORAGE
    // =========================================================================
    /// Postgres URL. Unset means the in-memory store, which forgets
    /// everything on restart and is meant for local runs.
    pub database_url: Option<String>,

    pub db_max_connections: u32,

    /// JSON array of authorities to load into the in-memory store.
    pub authority_seed: Option<PathBuf>,

    // =========================================================================
    // CLASSIFIER
    // =========================================================================
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    pub classifier_url: String,

    pub classifier_api_key: String,

    pub classifier_model: String,

    /// Per-call budget. A call that runs over is treated exactly like a
    /// call that failed.
    pub classifier_timeout: Duration,

    /// What an unclassifiable report is filed under.
    pub default_category: Category,

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================
    /// Consecutive failures before the breaker trips. Default: 5
    pub circuit_breaker_failure_threshold: u32,

    /// How long the breaker stays open before probing. Default: 30s
    pub circuit_breaker_reset_timeout: Duration,

    /// Half-open successes needed to close again. Default: 2
    pub circuit_breaker_success_threshold: u32,

    // =========================================================================
    // DUPLICATE DETECTION
    // =========================================================================
    /// Geohash length for creation lock cells. Shorter means wider cells.
    /// The cell edge must stay above the maximum radius.
    pub geo_cell_precision: usize,

    // =========================================================================
    // LOGGING
    // =========================================================================
    /// `json` for one JSON object per line, anything else for human text.
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        // No .env file is fine.
        let _ = dotenvy::dotenv();

        Config {
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000))),

            database_url: env_opt("DATABASE_URL"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            authority_seed: env_opt("AUTHORITY_SEED").map(PathBuf::from),

            classifier_url: env_or_default("CLASSIFIER_URL", "https://api.openai.com/v1"),
            classifier_api_key: env_or_default("CLASSIFIER_API_KEY", ""),
            classifier_model: env_or_default("CLASSIFIER_MODEL", "gpt-4o-mini"),
            classifier_timeout: Duration::from_millis(env_parse("CLASSIFIER_TIMEOUT_MS", 8000)),
            default_category: env_parse("DEFAULT_CATEGORY", Category::Other),

            circuit_breaker_failure_threshold: env_parse("CB_FAILURE_THRESHOLD", 5),
            circuit_breaker_reset_timeout: Duration::from_secs(env_parse("CB_RESET_TIMEOUT_SECS", 30)),
            circuit_breaker_success_threshold: env_parse("CB_SUCCESS_THRESHOLD", 2),

            // Past length 4 a cell edge drops below the 5 km maximum radius
            // and the lock would stop covering every possible overlap.
            geo_cell_precision: env_parse("GEO_CELL_PRECISION", DEFAULT_CELL_PRECISION).clamp(1, DEFAULT_CELL_PRECISION),

            log_json: env_or_default("LOG_FORMAT", "text").trim().eq_ignore_ascii_case("json"),
        }
    }
}

/// `CIVIC_INTAKE_<key>` or `default`.
fn env_or_default(key: &str, default: &str) -> String {
    env::var(format!("{PREFIX}{key}")).unwrap_or_else(|_| default.to_string())
}

/// `CIVIC_INTAKE_<key>` if set and non-empty.
fn env_opt(key: &str) -> Option<String> {
    env::var(format!("{PREFIX}{key}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// `CIVIC_INTAKE_<key>` parsed, or `default` when unset or unparsable.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
