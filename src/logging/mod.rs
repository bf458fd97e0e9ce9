use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::{error, info};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};
use uuid::Uuid;

use crate::config::LoggingConfig;
use crate::types::{EntryKey, WriteOp};

/// Инициализирует систему логирования
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG имеет приоритет над уровнем из конфига
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let result = if config.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(false)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .try_init()
    };

    result.map_err(|e| e as Box<dyn std::error::Error>)?;
    info!("Logging initialized with level: {}, format: {}", config.level, config.format);
    Ok(())
}

/// Журнал записей в хранилища хоста: одна строка на запись и на коммит
#[derive(Debug, Clone)]
pub struct AuditLogger {
    config: LoggingConfig,
}

impl AuditLogger {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Журнал, который ничего не пишет
    pub fn disabled() -> Self {
        let mut config = crate::config::Config::default().logging;
        config.audit_log.enabled = false;
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.audit_log.enabled
    }

    /// Логирует одну запись в proxy store
    pub async fn log_write(&self, save_id: Uuid, position: usize, total: usize, op: &WriteOp) {
        if !self.is_enabled() {
            return;
        }

        let timestamp = now();
        let line = if self.config.audit_log.format == "json" {
            json!({
                "timestamp": timestamp,
                "event": "proxy_write",
                "save_id": save_id.to_string(),
                "position": position,
                "total": total,
                "kind": op.kind(),
                "method": op.key.method.as_str(),
                "url": op.key.url,
            })
            .to_string()
        } else {
            format!(
                "[{}] save={} write {}/{} {} {} {}",
                timestamp,
                save_id,
                position,
                total,
                op.kind(),
                op.key.method,
                op.key.url
            )
        };

        self.append(&line);
    }

    /// Логирует сохранение списка ключей
    pub async fn log_commit(&self, save_id: Uuid, plugin_id: &str, keys: &[EntryKey]) {
        if !self.is_enabled() {
            return;
        }

        let timestamp = now();
        let line = if self.config.audit_log.format == "json" {
            json!({
                "timestamp": timestamp,
                "event": "config_commit",
                "save_id": save_id.to_string(),
                "plugin_id": plugin_id,
                "keys": keys,
            })
            .to_string()
        } else {
            let keys = keys
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "[{}] save={} commit plugin={} keys=[{}]",
                timestamp, save_id, plugin_id, keys
            )
        };

        self.append(&line);
    }

    fn append(&self, line: &str) {
        if let Err(e) = self.write_to_file(line) {
            error!("Failed to write audit log: {}", e);
        }
    }

    /// Записывает строку в файл журнала
    fn write_to_file(&self, line: &str) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.audit_log.path)?;

        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
