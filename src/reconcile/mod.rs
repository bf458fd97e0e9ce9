use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::host::HostStorage;
use crate::logging::AuditLogger;
use crate::metrics::{CONFIG_COMMITS_TOTAL, SAVE_DURATION};
use crate::types::{
    ConfigList, EntryKey, HttpMethod, ProxyEntry, SavedPluginConfig, WriteOp,
};
use crate::validate::{validate_for_save, ValidationError, ValidationErrorKind, ValidationErrors};

pub mod sequencer;

pub use sequencer::{Sequencer, DEFAULT_WRITE_INTERVAL};

const EMPTY_PAYLOAD: &str = "{}";

/// Строки из `previous`, ключа которых больше нет в `current`.
///
/// Заголовки и тело у результата заменены на `{}`: это команда очистки,
/// а не значение для записи.
pub fn compute_delete_targets(previous: &[ProxyEntry], current: &[ProxyEntry]) -> ConfigList {
    let kept: HashSet<(&str, Option<HttpMethod>)> = current
        .iter()
        .map(|entry| (entry.url.as_str(), entry.method))
        .collect();

    previous
        .iter()
        .filter(|prev| !kept.contains(&(prev.url.as_str(), prev.method)))
        .map(|prev| ProxyEntry {
            url: prev.url.clone(),
            method: prev.method,
            header: EMPTY_PAYLOAD.to_string(),
            data: EMPTY_PAYLOAD.to_string(),
        })
        .collect()
}

/// Записи для сохранения: upsert каждой строки `current`, затем очистка
/// каждой строки из `deletes`.
pub fn plan_operations(current: &[ProxyEntry], deletes: &[ProxyEntry]) -> Result<Vec<WriteOp>> {
    let mut operations = Vec::with_capacity(current.len() + deletes.len());
    let mut errors = Vec::new();

    for (i, entry) in current.iter().enumerate() {
        match to_write_op(i + 1, entry) {
            Ok(op) => operations.push(op),
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        return Err(ValidationErrors(errors).into());
    }

    operations.extend(deletes.iter().filter_map(ProxyEntry::key).map(WriteOp::clear));
    Ok(operations)
}

fn to_write_op(row: usize, entry: &ProxyEntry) -> std::result::Result<WriteOp, ValidationError> {
    let key = entry
        .key()
        .ok_or_else(|| ValidationError::new(row, ValidationErrorKind::MissingMethod))?;
    let headers = serde_json::from_str(&entry.header)
        .map_err(|_| ValidationError::new(row, ValidationErrorKind::MalformedHeader))?;
    let data = serde_json::from_str(&entry.data)
        .map_err(|_| ValidationError::new(row, ValidationErrorKind::MalformedData))?;
    Ok(WriteOp::upsert(key, headers, data))
}

/// Собирает таблицу из двух хранилищ: список ключей из настроек плагина
/// и заголовки/тело из proxy store. Ключи без записи в proxy store
/// пропускаются.
pub async fn load(host: &dyn HostStorage, plugin_id: &str) -> ConfigList {
    let Some(raw) = host.read_config(plugin_id).await else {
        return ConfigList::new();
    };
    let Some(saved) = SavedPluginConfig::from_host_value(&raw) else {
        warn!(plugin_id, "Plugin config has no string 'config' field, starting empty");
        return ConfigList::new();
    };
    let keys = match saved.keys() {
        Ok(keys) => keys,
        Err(e) => {
            warn!(plugin_id, "Plugin config key list is malformed, starting empty: {}", e);
            return ConfigList::new();
        }
    };

    let mut entries = ConfigList::with_capacity(keys.len());
    for key in keys {
        match host.read_proxy_entry(&key.url, key.method).await {
            Some(payload) => entries.push(ProxyEntry {
                header: pretty(&payload.headers),
                data: pretty(&payload.data),
                url: key.url,
                method: Some(key.method),
            }),
            None => warn!(plugin_id, "No proxy entry stored for {}, skipping", key),
        }
    }
    entries
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| EMPTY_PAYLOAD.to_string())
}

/// Итог одного сохранения
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub save_id: Uuid,
    pub upserts: usize,
    pub clears: usize,
    pub committed: Vec<EntryKey>,
}

/// Сеанс редактирования: снимок при загрузке и текущее состояние таблицы
pub struct ConfigSession {
    host: Arc<dyn HostStorage>,
    plugin_id: String,
    write_interval: Duration,
    audit: AuditLogger,
    previous: ConfigList,
    current: ConfigList,
}

impl ConfigSession {
    /// Загружает таблицу из хранилищ хоста
    pub async fn load(host: Arc<dyn HostStorage>, plugin_id: impl Into<String>) -> Self {
        let plugin_id = plugin_id.into();
        let previous = load(host.as_ref(), &plugin_id).await;
        info!(plugin_id = %plugin_id, "Loaded {} proxy entries", previous.len());

        Self {
            host,
            plugin_id,
            write_interval: DEFAULT_WRITE_INTERVAL,
            audit: AuditLogger::disabled(),
            current: previous.clone(),
            previous,
        }
    }

    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Снимок, с которым сравнивается таблица при сохранении
    pub fn previous(&self) -> &[ProxyEntry] {
        &self.previous
    }

    pub fn current(&self) -> &[ProxyEntry] {
        &self.current
    }

    /// Заменяет таблицу целиком, как при каждом изменении в UI
    pub fn replace(&mut self, rows: ConfigList) {
        self.current = rows;
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        validate_for_save(&self.current)
    }

    /// Сохраняет таблицу: проверка, записи в proxy store по одной, затем
    /// список ключей в настройки плагина. При ошибках валидации ничего не
    /// пишется.
    pub async fn save(&mut self) -> Result<SaveReport> {
        let started = Instant::now();
        if let Err(errors) = self.validate() {
            errors.record_metrics();
            return Err(errors.into());
        }

        let deletes = compute_delete_targets(&self.previous, &self.current);
        let operations = plan_operations(&self.current, &deletes)?;
        let committed: Vec<EntryKey> = self.current.iter().filter_map(ProxyEntry::key).collect();
        let config = SavedPluginConfig::from_keys(&committed)?;

        let sequencer = Sequencer::new(self.host.clone(), self.write_interval)
            .with_audit(self.audit.clone());
        let save_id = sequencer.save_id();
        info!(
            plugin_id = %self.plugin_id,
            save_id = %save_id,
            "Saving {} entries, clearing {}",
            self.current.len(),
            deletes.len()
        );

        // apply_sequential возвращается только после on_complete, поэтому
        // коммит идёт сразу за ним; сам callback только трассирует
        sequencer
            .apply_sequential(operations, || {
                debug!(save_id = %save_id, "Committing {} keys", committed.len());
            })
            .await;

        self.host.commit_config(&self.plugin_id, config).await;
        CONFIG_COMMITS_TOTAL.inc();
        self.audit.log_commit(save_id, &self.plugin_id, &committed).await;
        SAVE_DURATION.observe(started.elapsed().as_secs_f64());

        self.previous = self.current.clone();
        info!(plugin_id = %self.plugin_id, save_id = %save_id, "Save committed");

        Ok(SaveReport {
            save_id,
            upserts: self.current.len(),
            clears: deletes.len(),
            committed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostCall, MemoryHost};
    use crate::metrics::VALIDATION_ERRORS_TOTAL;
    use crate::SyncError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(url: &str, method: HttpMethod, header: &str, data: &str) -> ProxyEntry {
        ProxyEntry::new(url, method, header, data)
    }

    #[test]
    fn test_delete_targets_are_missing_keys() {
        let previous = vec![
            entry("https://a", HttpMethod::Get, r#"{"A": "1"}"#, "{}"),
            entry("https://b", HttpMethod::Post, r#"{"B": "1"}"#, r#"{"x": 1}"#),
            entry("https://a", HttpMethod::Put, "{}", "{}"),
        ];
        let current = vec![
            entry("https://a", HttpMethod::Get, r#"{"A": "2"}"#, "{}"),
            entry("https://c", HttpMethod::Get, "{}", "{}"),
        ];

        let targets = compute_delete_targets(&previous, &current);
        assert_eq!(
            targets,
            vec![
                entry("https://b", HttpMethod::Post, "{}", "{}"),
                entry("https://a", HttpMethod::Put, "{}", "{}"),
            ]
        );
    }

    #[test]
    fn test_no_delete_targets_when_all_kept() {
        let previous = vec![entry("https://a", HttpMethod::Get, "{}", "{}")];
        let current = vec![
            entry("https://z", HttpMethod::Delete, "{}", "{}"),
            entry("https://a", HttpMethod::Get, r#"{"changed": true}"#, "{}"),
        ];
        assert!(compute_delete_targets(&previous, &current).is_empty());
    }

    #[test]
    fn test_empty_current_deletes_everything() {
        let previous = vec![
            entry("https://a", HttpMethod::Get, r#"{"A": "1"}"#, "{}"),
            entry("https://b", HttpMethod::Post, "{}", r#"{"y": 2}"#),
        ];
        let targets = compute_delete_targets(&previous, &[]);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.header == "{}" && t.data == "{}"));
    }

    #[test]
    fn test_plan_upserts_then_clears() {
        let current = vec![entry("https://a", HttpMethod::Get, r#"{"A": "1"}"#, r#"{"q": "v"}"#)];
        let deletes = vec![entry("https://b", HttpMethod::Post, "{}", "{}")];

        let ops = plan_operations(&current, &deletes).unwrap();
        assert_eq!(
            ops,
            vec![
                WriteOp::upsert(
                    EntryKey::new("https://a", HttpMethod::Get),
                    json!({"A": "1"}),
                    json!({"q": "v"})
                ),
                WriteOp::clear(EntryKey::new("https://b", HttpMethod::Post)),
            ]
        );
    }

    #[test]
    fn test_plan_rejects_unparsable_rows() {
        let current = vec![entry("https://a", HttpMethod::Get, "nope", "{}")];
        let err = plan_operations(&current, &[]).unwrap_err();
        assert!(matches!(err, SyncError::Validation(errors) if errors.0[0].row == 1));
    }

    #[tokio::test]
    async fn test_load_merges_stores() {
        let host = MemoryHost::new()
            .with_keys(
                "p1",
                &[
                    EntryKey::new("https://a", HttpMethod::Get),
                    EntryKey::new("https://gone", HttpMethod::Post),
                ],
            )
            .with_proxy(
                EntryKey::new("https://a", HttpMethod::Get),
                json!({"Authorization": "Bearer t"}),
                json!({}),
            );

        let entries = load(&host, "p1").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://a");
        assert_eq!(entries[0].method, Some(HttpMethod::Get));
        assert_eq!(entries[0].header, "{\n  \"Authorization\": \"Bearer t\"\n}");
        assert_eq!(entries[0].data, "{}");
    }

    #[tokio::test]
    async fn test_load_treats_malformed_config_as_empty() {
        assert!(load(&MemoryHost::new(), "p1").await.is_empty());

        let host = MemoryHost::new().with_raw_config("p1", json!({"config": 42}));
        assert!(load(&host, "p1").await.is_empty());

        let host = MemoryHost::new().with_raw_config("p1", json!({"config": "{oops"}));
        assert!(load(&host, "p1").await.is_empty());

        let host = MemoryHost::new().with_raw_config("p1", json!("just a string"));
        assert!(load(&host, "p1").await.is_empty());
    }

    #[tokio::test]
    async fn test_save_with_validation_errors_writes_nothing() {
        let host = Arc::new(MemoryHost::new());
        let mut session = ConfigSession::load(host.clone(), "p1")
            .await
            .with_write_interval(Duration::ZERO);

        session.replace(vec![
            entry("https://a", HttpMethod::Get, "{}", "{}"),
            entry("https://a", HttpMethod::Get, "{}", "{}"),
        ]);

        let err = session.save().await.unwrap_err();
        match err {
            SyncError::Validation(errors) => {
                assert_eq!(errors.notification(), "row 2: same URL and Method as row 1.");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(host.calls().is_empty());
    }

    /// Хост, у которого запись никогда не завершается
    struct StalledHost {
        inner: MemoryHost,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl HostStorage for StalledHost {
        async fn read_config(&self, plugin_id: &str) -> Option<serde_json::Value> {
            self.inner.read_config(plugin_id).await
        }

        async fn read_proxy_entry(&self, url: &str, method: HttpMethod) -> Option<crate::types::SavedProxyPayload> {
            self.inner.read_proxy_entry(url, method).await
        }

        async fn write_proxy_entry(&self, _url: &str, _method: HttpMethod, _headers: &serde_json::Value, _data: &serde_json::Value) {
            std::future::pending::<()>().await;
        }

        async fn commit_config(&self, plugin_id: &str, config: SavedPluginConfig) {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.inner.commit_config(plugin_id, config).await;
        }
    }

    #[tokio::test]
    async fn test_stalled_write_never_commits() {
        let host = Arc::new(StalledHost {
            inner: MemoryHost::new().with_keys("p1", &[EntryKey::new("https://old", HttpMethod::Get)]),
            commits: AtomicUsize::new(0),
        });
        let mut session = ConfigSession::load(host.clone(), "p1")
            .await
            .with_write_interval(Duration::ZERO);
        session.replace(vec![entry("https://a", HttpMethod::Get, r#"{"A": "1"}"#, "{}")]);

        let result = tokio::time::timeout(Duration::from_millis(100), session.save()).await;

        assert!(result.is_err());
        assert_eq!(host.commits.load(Ordering::SeqCst), 0);
        assert_eq!(
            host.inner.raw_config("p1"),
            Some(json!({"config": r#"[{"url":"https://old","method":"GET"}]"#}))
        );
    }

    #[tokio::test]
    async fn test_failed_save_counts_validation_errors() {
        let counter = VALIDATION_ERRORS_TOTAL.with_label_values(&["missing_url"]);
        let before = counter.get();

        let host = Arc::new(MemoryHost::new());
        let mut session = ConfigSession::load(host.clone(), "p1")
            .await
            .with_write_interval(Duration::ZERO);
        session.replace(vec![entry("", HttpMethod::Get, "{}", "{}")]);

        assert!(session.save().await.is_err());
        assert!(counter.get() > before);
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_with_empty_table_still_commits() {
        let host = Arc::new(MemoryHost::new());
        let mut session = ConfigSession::load(host.clone(), "p1")
            .await
            .with_write_interval(Duration::ZERO);

        let report = session.save().await.unwrap();
        assert_eq!(report.upserts, 0);
        assert_eq!(report.clears, 0);
        assert_eq!(
            host.calls(),
            vec![HostCall::Commit {
                plugin_id: "p1".to_string(),
                config: SavedPluginConfig {
                    config: "[]".to_string()
                },
            }]
        );
    }
}
