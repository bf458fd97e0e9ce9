pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod reconcile;
pub mod types;
pub mod validate;

pub use error::SyncError;
pub use host::{FileHost, HostStorage, MemoryHost};
pub use reconcile::{compute_delete_targets, ConfigSession, SaveReport, Sequencer};
pub use types::{ConfigList, EntryKey, HttpMethod, ProxyEntry, WriteOp};
pub use validate::{validate, ValidationError, ValidationErrors};
