use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs console and file logging. `RUST_LOG` overrides `log_level`.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the lifetime of the process.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("server_qbox_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()?;

    Ok(guard)
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    // Keep the most recent one (index 0), delete the rest
    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cleanup_keeps_newest_log_only() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("server_qbox_old.log");
        let new = dir.path().join("server_qbox_new.log");
        let other = dir.path().join("notes.txt");

        fs::write(&old, "old").unwrap();
        fs::File::create(&new)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        fs::write(&other, "keep").unwrap();

        cleanup_old_logs(dir.path()).unwrap();

        assert!(!old.exists());
        assert!(new.exists());
        assert!(other.exists());
    }
}
