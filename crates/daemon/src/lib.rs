pub mod config;
pub mod error;
pub mod manager;
pub mod scheduler;

pub use error::BackupError;
pub use manager::{load_config, BackupManager, BackupManagerBuilder, ManagerStatus, RunReport};
pub use scheduler::{ScheduleTrigger, TickFuture, TickHandler, TokioTrigger};
