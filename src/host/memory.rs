use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::HostStorage;
use crate::types::{EntryKey, HttpMethod, SavedPluginConfig, SavedProxyPayload};

/// Вызов, который получил `MemoryHost`
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Write {
        key: EntryKey,
        headers: Value,
        data: Value,
    },
    Commit {
        plugin_id: String,
        config: SavedPluginConfig,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    configs: HashMap<String, Value>,
    proxies: HashMap<EntryKey, SavedProxyPayload>,
    calls: Vec<HostCall>,
}

/// Хранилище в памяти, которое запоминает все записи по порядку
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Кладет сырые настройки плагина, в том числе заведомо битые
    pub fn with_raw_config(self, plugin_id: &str, value: Value) -> Self {
        self.lock().configs.insert(plugin_id.to_string(), value);
        self
    }

    /// Кладет список ключей так, как его сохранил бы плагин
    pub fn with_keys(self, plugin_id: &str, keys: &[EntryKey]) -> Self {
        let config = serde_json::to_string(keys).unwrap_or_else(|_| "[]".to_string());
        self.with_raw_config(plugin_id, serde_json::json!({ "config": config }))
    }

    pub fn with_proxy(self, key: EntryKey, headers: Value, data: Value) -> Self {
        self.lock()
            .proxies
            .insert(key, SavedProxyPayload { headers, data });
        self
    }

    /// Все вызовы записи и коммита в порядке поступления
    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().calls.clone()
    }

    pub fn proxy(&self, key: &EntryKey) -> Option<SavedProxyPayload> {
        self.lock().proxies.get(key).cloned()
    }

    pub fn raw_config(&self, plugin_id: &str) -> Option<Value> {
        self.lock().configs.get(plugin_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // Отравленный mutex тут означает упавший тест, состояние остается валидным
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HostStorage for MemoryHost {
    async fn read_config(&self, plugin_id: &str) -> Option<Value> {
        self.lock().configs.get(plugin_id).cloned()
    }

    async fn read_proxy_entry(&self, url: &str, method: HttpMethod) -> Option<SavedProxyPayload> {
        self.lock().proxies.get(&EntryKey::new(url, method)).cloned()
    }

    async fn write_proxy_entry(&self, url: &str, method: HttpMethod, headers: &Value, data: &Value) {
        let key = EntryKey::new(url, method);
        let mut state = self.lock();
        state.calls.push(HostCall::Write {
            key: key.clone(),
            headers: headers.clone(),
            data: data.clone(),
        });
        let payload = SavedProxyPayload {
            headers: headers.clone(),
            data: data.clone(),
        };
        if crate::types::is_empty_object(headers) && crate::types::is_empty_object(data) {
            state.proxies.remove(&key);
        } else {
            state.proxies.insert(key, payload);
        }
    }

    async fn commit_config(&self, plugin_id: &str, config: SavedPluginConfig) {
        let mut state = self.lock();
        state.calls.push(HostCall::Commit {
            plugin_id: plugin_id.to_string(),
            config: config.clone(),
        });
        state
            .configs
            .insert(plugin_id.to_string(), serde_json::json!({ "config": config.config }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_and_clear() {
        let host = MemoryHost::new();
        let key = EntryKey::new("https://a.example", HttpMethod::Get);

        host.write_proxy_entry(&key.url, key.method, &json!({"A": "1"}), &json!({}))
            .await;
        assert!(host.read_proxy_entry(&key.url, key.method).await.is_some());

        host.write_proxy_entry(&key.url, key.method, &json!({}), &json!({}))
            .await;
        assert!(host.read_proxy_entry(&key.url, key.method).await.is_none());
        assert_eq!(host.calls().len(), 2);
    }

    #[test]
    fn test_seeded_keys_are_wrapped_like_the_host() {
        let host = MemoryHost::new().with_keys("p1", &[EntryKey::new("https://a", HttpMethod::Delete)]);
        let raw = tokio_test::block_on(host.read_config("p1")).unwrap();
        assert_eq!(raw, json!({"config": r#"[{"url":"https://a","method":"DELETE"}]"#}));
    }

    #[tokio::test]
    async fn test_commit_is_readable() {
        let host = MemoryHost::new();
        host.commit_config(
            "p1",
            SavedPluginConfig {
                config: "[]".to_string(),
            },
        )
        .await;
        assert_eq!(host.read_config("p1").await, Some(json!({"config": "[]"})));
        assert_eq!(host.read_config("p2").await, None);
    }
}
