use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// HTTP методы, которые поддерживает proxy store хоста
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

/// Ключ записи в proxy store: пара (url, method)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub url: String,
    pub method: HttpMethod,
}

impl EntryKey {
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
        }
    }
}

impl Display for EntryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Строка таблицы настроек.
///
/// `header` и `data` хранятся как JSON-текст, в том виде, в котором их
/// редактирует администратор. Пустая ячейка метода десериализуется в `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEntry {
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "empty_method_as_none")]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub data: String,
}

impl ProxyEntry {
    pub fn new(
        url: impl Into<String>,
        method: HttpMethod,
        header: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            method: Some(method),
            header: header.into(),
            data: data.into(),
        }
    }

    /// Ключ записи, если метод выбран
    pub fn key(&self) -> Option<EntryKey> {
        self.method.map(|method| EntryKey::new(self.url.clone(), method))
    }
}

/// Таблица настроек. Порядок строк важен только для отображения.
pub type ConfigList = Vec<ProxyEntry>;

fn empty_method_as_none<'de, D>(deserializer: D) -> Result<Option<HttpMethod>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Одна запись в proxy store
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub key: EntryKey,
    pub headers: Value,
    pub data: Value,
}

impl WriteOp {
    pub fn upsert(key: EntryKey, headers: Value, data: Value) -> Self {
        Self { key, headers, data }
    }

    /// Запись с пустыми объектами, которую хост трактует как удаление
    pub fn clear(key: EntryKey) -> Self {
        Self {
            key,
            headers: empty_object(),
            data: empty_object(),
        }
    }

    pub fn is_clear(&self) -> bool {
        is_empty_object(&self.headers) && is_empty_object(&self.data)
    }

    pub fn kind(&self) -> &'static str {
        if self.is_clear() {
            "clear"
        } else {
            "upsert"
        }
    }
}

pub fn empty_object() -> Value {
    Value::Object(Map::new())
}

pub fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Сохраненные настройки плагина: JSON-строка со списком ключей
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPluginConfig {
    pub config: String,
}

impl SavedPluginConfig {
    /// Разбирает объект, который вернул хост. Всё, что не похоже на
    /// `{"config": "<string>"}`, считается отсутствием настроек.
    pub fn from_host_value(value: &Value) -> Option<Self> {
        let config = value.as_object()?.get("config")?.as_str()?;
        Some(Self {
            config: config.to_string(),
        })
    }

    pub fn from_keys(keys: &[EntryKey]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            config: serde_json::to_string(keys)?,
        })
    }

    pub fn keys(&self) -> Result<Vec<EntryKey>, serde_json::Error> {
        serde_json::from_str(&self.config)
    }
}

/// Сохраненные заголовки и тело для одного ключа
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedProxyPayload {
    pub headers: Value,
    pub data: Value,
}
