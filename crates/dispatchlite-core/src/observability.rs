//! Observability: tracing init and the dispatch audit log.
//!
//! Reads `config::ObservabilityConfig` for DISPATCHLITE_QUIET, LOG_LEVEL, LOG_JSON and
//! AUDIT_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Tracing initialization mode.
#[derive(Debug, Clone, Copy)]
pub enum TracingMode {
    /// Use DISPATCHLITE_LOG_LEVEL / DISPATCHLITE_QUIET from env.
    Default,
    /// Embedded in a host application: engine-internal warnings are demoted to errors only.
    Embedded,
}

/// Build the filter directive for the given mode and config values.
fn filter_directive(mode: TracingMode, quiet: bool, log_level: &str) -> String {
    let mut level = if quiet {
        "dispatchlite=warn".to_string()
    } else {
        log_level.to_string()
    };
    if matches!(mode, TracingMode::Embedded) {
        level = format!("{},dispatchlite_agent=error", level);
    }
    level
}

/// Initialize tracing. Call once at process startup; later calls are no-ops.
/// `RUST_LOG` takes precedence over DISPATCHLITE_LOG_LEVEL when set.
pub fn init_tracing(mode: TracingMode) {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = filter_directive(mode, cfg.quiet, &cfg.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = crate::config::ObservabilityConfig::from_env().audit_log.clone()?;
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

/// Redirect the audit log (tests, or hosts that configure it programmatically).
pub fn set_audit_log_path(path: Option<&Path>) {
    if let Ok(mut guard) = AUDIT_PATH.lock() {
        *guard = path.map(|p| p.to_string_lossy().to_string());
    }
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Audit: a capability was selected for a request.
pub fn audit_selection(capability: &str, strategy: &str, confidence: f64, cached: bool) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "event": "capability_selected",
            "capability": capability,
            "strategy": strategy,
            "confidence": confidence,
            "cached": cached,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: a capability execution finished (successfully or not).
///
/// `outcome` is `"ok"` or the error code (`ExecutionTimeout`, `ExecutionFailure`, ...).
pub fn audit_execution_completed(
    capability: &str,
    outcome: &str,
    duration_ms: u64,
    output_len: usize,
) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "event": "execution_completed",
            "capability": capability,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "output_len": output_len,
            "success": outcome == "ok",
        });
        append_jsonl(&path, &record);
    }
}
