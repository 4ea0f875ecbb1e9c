pub mod alarm;
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod error;
pub mod inbox_router;
pub mod maintenance;
pub mod merge;
pub mod model;
pub mod outbox_pump;
pub mod store;
pub mod transport;
pub mod wire;

pub use alarm::{AlarmScheduler, NullAlarmScheduler};
pub use bootstrap::{bootstrap, init_tracing, Handles};
pub use config::Config;
pub use core::SyncCore;
pub use error::SyncError;
pub use inbox_router::InboxRouter;
pub use maintenance::MaintenanceScheduler;
pub use model::{Settings, SyncState, Task};
pub use outbox_pump::OutboxPump;
pub use store::Store;
pub use transport::{BusEventType, BusPath, Transport};
