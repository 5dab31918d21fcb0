use clap::Parser;
use lib_qbox::realtime::DEFAULT_BUFFER_CAPACITY;
use lib_qbox::StreamSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_qbox.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Question box realtime reaction server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "QBOX_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "QBOX_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "QBOX_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "QBOX_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "QBOX_DATABASE_URL", help = "PostgreSQL URL. Without it reactions live in memory.")]
    pub database_url: Option<String>,

    #[clap(long, env = "QBOX_DB_POOL_SIZE", help = "Maximum PostgreSQL connections in the pool.")]
    pub db_pool_size: Option<usize>,

    #[clap(long, env = "QBOX_SEED_QUESTIONS", help = "Questions 1..=N created at startup by the in-memory store.")]
    pub seed_questions: Option<u64>,

    #[clap(long, env = "QBOX_HEARTBEAT_INTERVAL_SECS", help = "Seconds between heartbeat frames.")]
    pub heartbeat_interval_secs: Option<u64>,

    #[clap(long, env = "QBOX_IDLE_TIMEOUT_SECS", help = "Seconds without a frame before a retry hint is written.")]
    pub idle_timeout_secs: Option<u64>,

    #[clap(long, env = "QBOX_RETRY_AFTER_MS", help = "Reconnect delay advertised to clients, in milliseconds.")]
    pub retry_after_ms: Option<u64>,

    #[clap(long, env = "QBOX_SUBSCRIBER_BUFFER", help = "Events buffered per subscriber before it is evicted.")]
    pub subscriber_buffer: Option<usize>,

    #[clap(long, env = "QBOX_REACTIONS", value_delimiter = ',', help = "Comma separated list of allowed reactions.")]
    pub reactions: Option<Vec<String>>,

    #[clap(long, env = "QBOX_TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "QBOX_TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    /// Fields set in `other` win over `self`.
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            database_url: other.database_url.or(self.database_url),
            db_pool_size: other.db_pool_size.or(self.db_pool_size),
            seed_questions: other.seed_questions.or(self.seed_questions),
            heartbeat_interval_secs: other.heartbeat_interval_secs.or(self.heartbeat_interval_secs),
            idle_timeout_secs: other.idle_timeout_secs.or(self.idle_timeout_secs),
            retry_after_ms: other.retry_after_ms.or(self.retry_after_ms),
            subscriber_buffer: other.subscriber_buffer.or(self.subscriber_buffer),
            reactions: other.reactions.or(self.reactions),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        let stream = StreamSettings::default();
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            db_pool_size: Some(16),
            seed_questions: Some(100),
            heartbeat_interval_secs: Some(stream.heartbeat_interval.as_secs()),
            idle_timeout_secs: Some(stream.idle_timeout.as_secs()),
            retry_after_ms: Some(stream.retry_after.as_millis() as u64),
            subscriber_buffer: Some(DEFAULT_BUFFER_CAPACITY),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn db_pool_size(&self) -> usize {
        self.db_pool_size.unwrap_or(16).max(1)
    }

    pub fn seed_questions(&self) -> u64 {
        self.seed_questions.unwrap_or(0)
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer.unwrap_or(DEFAULT_BUFFER_CAPACITY)
    }

    /// Stream timers, falling back to the library defaults for unset or zero
    /// values.
    pub fn stream_settings(&self) -> StreamSettings {
        let defaults = StreamSettings::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.filter(|v| *v > 0).map(Duration::from_secs).unwrap_or(fallback)
        };
        StreamSettings {
            heartbeat_interval: secs(self.heartbeat_interval_secs, defaults.heartbeat_interval),
            idle_timeout: secs(self.idle_timeout_secs, defaults.idle_timeout),
            retry_after: self
                .retry_after_ms
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_after),
        }
    }

    /// Both TLS paths, when both are configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

/// Builds the effective configuration: defaults, then the JSON config file,
/// then environment and command line.
pub fn load_config() -> Config {
    resolve(Config::parse(), dirs::home_dir().as_deref())
}

fn resolve(cli: Config, home: Option<&Path>) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current = current.merge(file_config);
    }
    current = current.merge(cli);

    // Fall back to a letsencrypt layout in the home directory, but only when
    // both files are actually there.
    if current.tls_paths().is_none() {
        if let Some(home) = home {
            let letsencrypt_dir = home.join(".letsencrypt");
            let cert = letsencrypt_dir.join("fullchain.pem");
            let key = letsencrypt_dir.join("privkey.pem");
            if cert.exists() && key.exists() {
                current.tls_cert_path = Some(cert);
                current.tls_key_path = Some(key);
            }
        }
    }

    current
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return None;
    }
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_qbox"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn file_values_sit_between_defaults_and_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_qbox.conf");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"port": 9100, "logLevel": "debug", "heartbeatIntervalSecs": 5, "reactions": ["👍", "👎"]}}"#
        )
        .unwrap();

        let config = resolve(
            cli(&["--config-path", path.to_str().unwrap(), "--port", "9200"]),
            None,
        );

        assert_eq!(config.port(), 9200);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.stream_settings().heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.stream_settings().idle_timeout, Duration::from_secs(30));
        assert_eq!(config.reactions, Some(vec!["👍".to_string(), "👎".to_string()]));
        assert_eq!(config.subscriber_buffer(), DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "not json").unwrap();

        let config = resolve(cli(&["--config-path", path.to_str().unwrap()]), None);
        assert_eq!(config.port(), 8080);
        assert_eq!(config.seed_questions(), 100);
        assert_eq!(config.stream_settings(), StreamSettings::default());
    }

    #[test]
    fn reactions_flag_is_comma_separated() {
        let config = cli(&["--reactions", "👍,🥳,🌹"]);
        assert_eq!(
            config.reactions,
            Some(vec!["👍".to_string(), "🥳".to_string(), "🌹".to_string()])
        );
    }

    #[test]
    fn tls_defaults_only_when_both_files_exist() {
        let home = tempfile::tempdir().unwrap();
        let missing = tempfile::tempdir().unwrap();
        let nowhere = missing.path().join("none.conf");
        let args = ["--config-path", nowhere.to_str().unwrap()];

        assert!(resolve(cli(&args), Some(home.path())).tls_paths().is_none());

        let le = home.path().join(".letsencrypt");
        fs::create_dir_all(&le).unwrap();
        fs::write(le.join("fullchain.pem"), "cert").unwrap();
        assert!(resolve(cli(&args), Some(home.path())).tls_paths().is_none());

        fs::write(le.join("privkey.pem"), "key").unwrap();
        let (cert, key) = resolve(cli(&args), Some(home.path())).tls_paths().unwrap();
        assert_eq!(cert, le.join("fullchain.pem"));
        assert_eq!(key, le.join("privkey.pem"));
    }
}
