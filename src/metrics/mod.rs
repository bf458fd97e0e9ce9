use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use log::info;

/// Записи в proxy store по видам (upsert / clear)
pub static PROXY_WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "proxy_writes_total",
        "Total writes issued to the proxy store",
        &["kind"]
    )
    .expect("Failed to register proxy_writes_total metric")
});

/// Сохранения списка ключей в настройки плагина
pub static CONFIG_COMMITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "config_commits_total",
        "Total key list commits to the plugin config store"
    )
    .expect("Failed to register config_commits_total metric")
});

/// Ошибки валидации по причинам
pub static VALIDATION_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "validation_errors_total",
        "Total validation errors reported to the user",
        &["kind"]
    )
    .expect("Failed to register validation_errors_total metric")
});

/// Длительность сохранения, включая паузы между записями
pub static SAVE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "save_duration_seconds",
        "Duration of a full save sequence in seconds"
    )
    .expect("Failed to register save_duration_seconds metric")
});

/// Инициализация метрик
pub fn init_metrics() {
    Lazy::force(&PROXY_WRITES_TOTAL);
    Lazy::force(&CONFIG_COMMITS_TOTAL);
    Lazy::force(&VALIDATION_ERRORS_TOTAL);
    Lazy::force(&SAVE_DURATION);
    info!("Prometheus metrics initialized");
}

/// Текущие значения всех метрик в текстовом формате prometheus
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
