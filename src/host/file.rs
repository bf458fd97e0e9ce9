use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

use super::HostStorage;
use crate::error::Result;
use crate::types::{is_empty_object, HttpMethod, SavedPluginConfig, SavedProxyPayload};

/// Содержимое файла хранилища
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub plugins: BTreeMap<String, Value>,
    #[serde(default)]
    pub proxies: Vec<StoredProxy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProxy {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Value,
    pub data: Value,
}

/// Хранилище хоста поверх одного JSON файла.
///
/// Каждая операция перечитывает и перезаписывает файл целиком. Ошибки
/// записи только логируются: у хоста нет канала для них.
pub struct FileHost {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileHost {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Читает документ. Отсутствующий файл считается пустым хранилищем.
    pub fn load_document(&self) -> Result<StoreDocument> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Проверяет, что файл можно разобрать. Записи в битый файл только
    /// логируются, поэтому сохранение должно начинаться с этой проверки.
    pub fn ensure_readable(&self) -> Result<()> {
        self.load_document().map(|_| ())
    }

    fn store_document(&self, document: &StoreDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Читает документ для операции чтения; битый файл логируется и
    /// считается пустым
    fn read_or_empty(&self) -> StoreDocument {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.load_document().unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "Failed to read store document: {}", e);
            StoreDocument::default()
        })
    }

    fn update<F>(&self, operation: &str, apply: F)
    where
        F: FnOnce(&mut StoreDocument),
    {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = self.load_document().and_then(|mut document| {
            apply(&mut document);
            self.store_document(&document)
        });
        match result {
            Ok(()) => debug!(path = %self.path.display(), "{} stored", operation),
            Err(e) => error!(path = %self.path.display(), "{} failed: {}", operation, e),
        }
    }
}

#[async_trait]
impl HostStorage for FileHost {
    async fn read_config(&self, plugin_id: &str) -> Option<Value> {
        self.read_or_empty().plugins.remove(plugin_id)
    }

    async fn read_proxy_entry(&self, url: &str, method: HttpMethod) -> Option<SavedProxyPayload> {
        self.read_or_empty()
            .proxies
            .into_iter()
            .find(|p| p.url == url && p.method == method)
            .map(|p| SavedProxyPayload {
                headers: p.headers,
                data: p.data,
            })
    }

    async fn write_proxy_entry(&self, url: &str, method: HttpMethod, headers: &Value, data: &Value) {
        let clear = is_empty_object(headers) && is_empty_object(data);
        self.update("proxy write", |document| {
            let existing = document
                .proxies
                .iter()
                .position(|p| p.url == url && p.method == method);
            match (existing, clear) {
                (Some(index), true) => {
                    document.proxies.remove(index);
                }
                (None, true) => {}
                (Some(index), false) => {
                    document.proxies[index].headers = headers.clone();
                    document.proxies[index].data = data.clone();
                }
                (None, false) => document.proxies.push(StoredProxy {
                    url: url.to_string(),
                    method,
                    headers: headers.clone(),
                    data: data.clone(),
                }),
            }
        });
    }

    async fn commit_config(&self, plugin_id: &str, config: SavedPluginConfig) {
        self.update("config commit", |document| {
            document
                .plugins
                .insert(plugin_id.to_string(), serde_json::json!({ "config": config.config }));
        });
    }
}
