use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::host::HostStorage;
use crate::logging::AuditLogger;
use crate::metrics::PROXY_WRITES_TOTAL;
use crate::types::WriteOp;

/// Пауза между записями по умолчанию
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Применяет записи к proxy store строго по одной.
///
/// Хост принимает только одну запись за раз и блокирует хранилище на время
/// записи, поэтому следующая запись отправляется только после завершения
/// предыдущей и паузы `interval`.
pub struct Sequencer {
    host: Arc<dyn HostStorage>,
    interval: Duration,
    audit: AuditLogger,
    save_id: Uuid,
}

impl Sequencer {
    pub fn new(host: Arc<dyn HostStorage>, interval: Duration) -> Self {
        Self {
            host,
            interval,
            audit: AuditLogger::disabled(),
            save_id: Uuid::new_v4(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Идентификатор этой серии записей в журнале
    pub fn save_id(&self) -> Uuid {
        self.save_id
    }

    /// Отправляет записи по порядку и вызывает `on_complete` ровно один раз
    /// после завершения последней. Пустой список вызывает `on_complete` сразу.
    ///
    /// Ни повторов, ни таймаутов нет: если хост не завершит запись, цепочка
    /// остановится и `on_complete` не будет вызван.
    pub async fn apply_sequential<F>(&self, operations: Vec<WriteOp>, on_complete: F) -> usize
    where
        F: FnOnce(),
    {
        let total = operations.len();
        let mut pending: VecDeque<WriteOp> = operations.into();
        let mut written = 0;

        while let Some(op) = pending.pop_front() {
            written += 1;
            debug!(
                save_id = %self.save_id,
                kind = op.kind(),
                "Writing proxy entry {}/{}: {}",
                written,
                total,
                op.key
            );

            self.host
                .write_proxy_entry(&op.key.url, op.key.method, &op.headers, &op.data)
                .await;

            PROXY_WRITES_TOTAL.with_label_values(&[op.kind()]).inc();
            self.audit.log_write(self.save_id, written, total, &op).await;

            if !pending.is_empty() && !self.interval.is_zero() {
                sleep(self.interval).await;
            }
        }

        info!(save_id = %self.save_id, "All {} proxy writes settled", written);
        on_complete();
        written
    }
}
