//! Process-wide wiring. In a language without lazy statics the singletons
//! are injected as explicit handles from this one entry point; there is no
//! mutable global state outside them.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;

use crate::alarm::AlarmScheduler;
use crate::config::Config;
use crate::core::SyncCore;
use crate::error::SyncError;
use crate::inbox_router::InboxRouter;
use crate::maintenance::MaintenanceScheduler;
use crate::model::{SyncState, Task};
use crate::outbox_pump::OutboxPump;
use crate::store::Store;
use crate::transport::{BusPath, Transport};
use crate::wire;

/// The process-wide singleton set: Store, SyncCore, Transport, Outbox pump,
/// Inbox router, Maintenance scheduler and alarm collaborator.
pub struct Handles {
    pub store: Store,
    pub core: SyncCore,
    pub pump: OutboxPump,
    pub router: Arc<InboxRouter>,
    pub maintenance: Arc<MaintenanceScheduler>,
    pub transport: Arc<dyn Transport>,
    pub config: Config,
}

impl Handles {
    pub fn watch_tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.store.watch_tasks()
    }

    pub fn watch_sync_state(&self) -> watch::Receiver<SyncState> {
        self.pump.watch_state()
    }

    /// Emit `/sync/request` with a fresh nonce: used on reconnect to ask the
    /// peer for a full snapshot.
    pub async fn request_snapshot(&self) -> Result<(), SyncError> {
        let now = Utc::now().timestamp_millis();
        let nonce = format!("{:x}", rand::thread_rng().gen::<u64>());
        let payload = wire::encode_sync_request(now, &nonce);
        self.transport.put(&BusPath::sync_request(), &payload, false).await
    }

    /// Spawn the outbox pump's nothing-owned background loop and the
    /// maintenance scheduler's periodic loop onto the current tokio runtime.
    /// Returns their `JoinHandle`s so the caller can manage shutdown.
    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        let maintenance = self.maintenance.clone();
        let maintenance_handle = tokio::spawn(async move {
            maintenance.run_forever().await;
        });
        BackgroundTasks {
            maintenance: maintenance_handle,
        }
    }
}

pub struct BackgroundTasks {
    pub maintenance: tokio::task::JoinHandle<()>,
}

/// Initialize `tracing` with an env-filter defaulting to `info`, matching
/// the daemon-style bootstraps in the broader corpus.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

/// Build the full singleton set for `db_path` ("`:memory:`" for tests).
pub fn bootstrap(
    db_path: &str,
    transport: Arc<dyn Transport>,
    alarms: Arc<dyn AlarmScheduler>,
    config: Config,
) -> Result<Handles, SyncError> {
    let store = Store::open(db_path)?;
    let core = SyncCore::new(store.clone(), alarms.clone(), config.clone());
    let pump = OutboxPump::new(store.clone(), core.clone(), transport.clone(), config.clone());
    let router = Arc::new(InboxRouter::new(
        core.clone(),
        pump.clone(),
        transport.clone(),
        config.clone(),
    ));
    let maintenance = Arc::new(MaintenanceScheduler::new(
        store.clone(),
        pump.clone(),
        alarms.clone(),
        config.clone(),
    ));

    Ok(Handles {
        store,
        core,
        pump,
        router,
        maintenance,
        transport,
        config,
    })
}
