use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "vaultkeep=info,vaultkeep_core=info,vaultkeep_storage=info,vaultkeep_infra=info,vaultkeep_services=info";

/// The audit log keeps every stage transition regardless of `RUST_LOG`.
const AUDIT_FILTER: &str = DEFAULT_FILTER;

/// Initialize tracing: human-readable (or JSON) output on stderr, plus a
/// plain-text copy appended to `audit_log` when given.
///
/// `RUST_LOG` only tunes stderr; the audit log has its own info-level filter.
pub fn init_telemetry(audit_log: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let stderr_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let file_layer = match audit_log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(audit_layer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer.with_filter(stderr_filter))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    if let Some(path) = audit_log {
        tracing::debug!(path = %path.display(), "Audit log attached");
    }
    Ok(())
}

fn audit_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new(AUDIT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_audit_log_ignores_stderr_filter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manager.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::sink)
                    .with_filter(EnvFilter::new("warn")),
            )
            .with(audit_layer(file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(stage = "stop_service", "Entering stage");
            tracing::debug!("Polling supervisor");
        });

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Entering stage"));
        assert!(written.contains("stop_service"));
        assert!(!written.contains("Polling supervisor"));
    }
}
