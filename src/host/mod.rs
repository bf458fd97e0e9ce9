use async_trait::async_trait;
use serde_json::Value;

use crate::types::{HttpMethod, SavedPluginConfig, SavedProxyPayload};

pub mod file;
pub mod memory;

pub use file::FileHost;
pub use memory::{HostCall, MemoryHost};

/// Хранилища, которые предоставляет хост-платформа плагину.
///
/// Запись в proxy store не сообщает об ошибках: завершение future
/// означает, что хост вызвал свой callback. Future, который никогда не
/// завершается, останавливает всю цепочку сохранения.
#[async_trait]
pub trait HostStorage: Send + Sync {
    /// Сырые настройки плагина. `None`, если плагин ещё не настраивали.
    async fn read_config(&self, plugin_id: &str) -> Option<Value>;

    /// Заголовки и тело для одного ключа, `None` если записи нет
    async fn read_proxy_entry(&self, url: &str, method: HttpMethod) -> Option<SavedProxyPayload>;

    /// Upsert одного ключа. Пустые объекты в `headers` и `data` очищают запись.
    async fn write_proxy_entry(&self, url: &str, method: HttpMethod, headers: &Value, data: &Value);

    /// Сохраняет список ключей в настройки плагина
    async fn commit_config(&self, plugin_id: &str, config: SavedPluginConfig);
}
