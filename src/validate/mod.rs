use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::metrics::VALIDATION_ERRORS_TOTAL;
use crate::types::{EntryKey, ProxyEntry};

/// Причина ошибки в строке таблицы
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    MissingUrl,
    MissingMethod,
    MalformedHeader,
    MalformedData,
    /// Ключ (url, method) уже встречался в строке `first_row`
    DuplicateKey { first_row: usize },
}

impl ValidationErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ValidationErrorKind::MissingUrl => "missing_url",
            ValidationErrorKind::MissingMethod => "missing_method",
            ValidationErrorKind::MalformedHeader => "malformed_header",
            ValidationErrorKind::MalformedData => "malformed_data",
            ValidationErrorKind::DuplicateKey { .. } => "duplicate_key",
        }
    }
}

/// Ошибка валидации одной строки. `row` считается с единицы.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row}: {}", describe(.kind))]
pub struct ValidationError {
    pub row: usize,
    pub kind: ValidationErrorKind,
}

fn describe(kind: &ValidationErrorKind) -> String {
    match kind {
        ValidationErrorKind::MissingUrl => "URL is required.".to_string(),
        ValidationErrorKind::MissingMethod => "Method is required.".to_string(),
        ValidationErrorKind::MalformedHeader => "Header is not valid JSON.".to_string(),
        ValidationErrorKind::MalformedData => "data is not valid JSON.".to_string(),
        ValidationErrorKind::DuplicateKey { first_row } => {
            format!("same URL and Method as row {}.", first_row)
        }
    }
}

impl ValidationError {
    pub fn new(row: usize, kind: ValidationErrorKind) -> Self {
        Self { row, kind }
    }
}

/// Все ошибки, накопленные за один проход
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Одно сообщение для уведомления пользователя, по ошибке на строку
    pub fn notification(&self) -> String {
        self.0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Учитывает ошибки в метриках. Вызывается только при попытке сохранения.
    pub fn record_metrics(&self) {
        for error in &self.0 {
            VALIDATION_ERRORS_TOTAL
                .with_label_values(&[error.kind.label()])
                .inc();
        }
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            return Ok(());
        }
        Err(self)
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.notification())
    }
}

/// Проверяет каждую строку: url, method, JSON в header и data.
/// Проверки не прерываются на первой ошибке.
pub fn validate(config: &[ProxyEntry]) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    for (i, entry) in config.iter().enumerate() {
        row_errors(i + 1, entry, &mut errors);
    }

    ValidationErrors(errors).into_result()
}

fn row_errors(row: usize, entry: &ProxyEntry, errors: &mut Vec<ValidationError>) {
    if entry.url.is_empty() {
        errors.push(ValidationError::new(row, ValidationErrorKind::MissingUrl));
    }
    if entry.method.is_none() {
        errors.push(ValidationError::new(row, ValidationErrorKind::MissingMethod));
    }
    if serde_json::from_str::<serde_json::Value>(&entry.header).is_err() {
        errors.push(ValidationError::new(row, ValidationErrorKind::MalformedHeader));
    }
    if serde_json::from_str::<serde_json::Value>(&entry.data).is_err() {
        errors.push(ValidationError::new(row, ValidationErrorKind::MalformedData));
    }
}

/// Ищет повторяющиеся ключи (url, method). Ошибка ставится на более
/// позднюю строку; строки без метода не участвуют.
pub fn check_duplicates(config: &[ProxyEntry]) -> Result<(), ValidationErrors> {
    let mut seen: HashMap<EntryKey, usize> = HashMap::new();
    let mut errors = Vec::new();

    for (i, entry) in config.iter().enumerate() {
        let Some(key) = entry.key() else { continue };
        match seen.get(&key) {
            Some(&first_row) => errors.push(ValidationError::new(
                i + 1,
                ValidationErrorKind::DuplicateKey { first_row },
            )),
            None => {
                seen.insert(key, i + 1);
            }
        }
    }

    ValidationErrors(errors).into_result()
}

/// Полная проверка перед сохранением: строки и дубликаты, ошибки
/// отсортированы по номеру строки.
pub fn validate_for_save(config: &[ProxyEntry]) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();
    if let Err(ValidationErrors(row)) = validate(config) {
        errors.extend(row);
    }
    if let Err(ValidationErrors(dups)) = check_duplicates(config) {
        errors.extend(dups);
    }

    if errors.is_empty() {
        return Ok(());
    }
    errors.sort_by_key(|e| e.row);
    Err(ValidationErrors(errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpMethod;

    fn row(url: &str, method: Option<HttpMethod>, header: &str, data: &str) -> ProxyEntry {
        ProxyEntry {
            url: url.to_string(),
            method,
            header: header.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_valid_rows() {
        let config = vec![
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
            row("https://b.example", Some(HttpMethod::Post), r#"{"X-Key": "1"}"#, r#"{"q": "v"}"#),
        ];
        assert!(validate(&config).is_ok());
        assert!(validate(&[]).is_ok());
    }

    #[test]
    fn test_bad_header_on_middle_row() {
        let config = vec![
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
            row("https://b.example", Some(HttpMethod::Get), "{bad json", "{}"),
            row("https://c.example", Some(HttpMethod::Get), "{}", "{}"),
        ];
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.0[0],
            ValidationError::new(2, ValidationErrorKind::MalformedHeader)
        );
        assert_eq!(errors.notification(), "row 2: Header is not valid JSON.");
    }

    #[test]
    fn test_collects_every_failure() {
        let config = vec![
            row("", None, "", "not json"),
            row("https://a.example", Some(HttpMethod::Put), "{}", "{}"),
            row("https://b.example", None, "{}", "{}"),
            row("", Some(HttpMethod::Delete), "{}", "["),
        ];
        let errors = validate(&config).unwrap_err();
        let tagged: Vec<(usize, ValidationErrorKind)> =
            errors.iter().map(|e| (e.row, e.kind.clone())).collect();
        assert_eq!(
            tagged,
            vec![
                (1, ValidationErrorKind::MissingUrl),
                (1, ValidationErrorKind::MissingMethod),
                (1, ValidationErrorKind::MalformedHeader),
                (1, ValidationErrorKind::MalformedData),
                (3, ValidationErrorKind::MissingMethod),
                (4, ValidationErrorKind::MissingUrl),
                (4, ValidationErrorKind::MalformedData),
            ]
        );
    }

    #[test]
    fn test_validate_leaves_metrics_untouched() {
        let counter = VALIDATION_ERRORS_TOTAL.with_label_values(&["malformed_header"]);
        let before = counter.get();

        let config = vec![row("https://a.example", Some(HttpMethod::Get), "{oops", "{}")];
        assert!(validate(&config).is_err());
        assert!(validate_for_save(&config).is_err());

        assert_eq!(counter.get(), before);
    }

    #[test]
    fn test_duplicates_are_not_a_row_check() {
        let config = vec![
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
        ];
        assert!(validate(&config).is_ok());

        let errors = check_duplicates(&config).unwrap_err();
        assert_eq!(
            errors.0,
            vec![ValidationError::new(2, ValidationErrorKind::DuplicateKey { first_row: 1 })]
        );
        assert_eq!(errors.to_string(), "row 2: same URL and Method as row 1.");
    }

    #[test]
    fn test_same_url_different_method_is_fine() {
        let config = vec![
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
            row("https://a.example", Some(HttpMethod::Post), "{}", "{}"),
        ];
        assert!(check_duplicates(&config).is_ok());
    }

    #[test]
    fn test_validate_for_save_orders_by_row() {
        let config = vec![
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
            row("https://a.example", Some(HttpMethod::Get), "{}", "{}"),
            row("https://c.example", Some(HttpMethod::Get), "{}", "oops"),
        ];
        let errors = validate_for_save(&config).unwrap_err();
        let rows: Vec<usize> = errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![2, 3]);
    }
}
