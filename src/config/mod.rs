use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub version: u32,
    pub plugin: PluginConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginConfig {
    /// Идентификатор плагина, под которым хранится список ключей
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Пауза между записями в proxy store (хост блокирует хранилище на запись)
    pub write_interval_ms: u64,
    /// JSON-документ, который играет роль хранилища хоста для CLI
    pub store_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub format: String, // json или text
    pub level: String,  // error, warn, info, debug, trace
    pub audit_log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    pub enabled: bool,
    pub path: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl SyncConfig {
    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }
}

impl Config {
    /// Загружает конфигурацию из YAML файла
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    /// Сохраняет конфигурацию в YAML файл
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Проверяет значения, которые serde пропускает
    pub fn check(&self) -> Result<()> {
        if self.plugin.id.trim().is_empty() {
            return Err(SyncError::Config("plugin.id must not be empty".to_string()));
        }
        if self.sync.store_path.trim().is_empty() {
            return Err(SyncError::Config("sync.store_path must not be empty".to_string()));
        }
        for (name, format) in [
            ("logging.format", &self.logging.format),
            ("logging.audit_log.format", &self.logging.audit_log.format),
        ] {
            if format != "json" && format != "text" {
                return Err(SyncError::Config(format!(
                    "{} must be 'json' or 'text', got '{}'",
                    name, format
                )));
            }
        }
        Ok(())
    }

    /// Создает конфигурацию по умолчанию
    pub fn default() -> Self {
        Self {
            version: 1,
            plugin: PluginConfig {
                id: "default".to_string(),
            },
            sync: SyncConfig {
                write_interval_ms: 100,
                store_path: "proxy-store.json".to_string(),
            },
            logging: LoggingConfig {
                format: "text".to_string(),
                level: "info".to_string(),
                audit_log: LogConfig {
                    enabled: false,
                    path: "proxy-config-audit.log".to_string(),
                    format: "json".to_string(),
                },
            },
            metrics: MetricsConfig { enabled: false },
        }
    }
}
