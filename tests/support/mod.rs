use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use task_sync::{SyncError, Transport};

/// In-process fake bus: records every `put`/`delete` instead of talking to a
/// real transport. Used to drive the outbox pump and inbox router without a
/// live KV bus.
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub puts: Arc<Mutex<Vec<(String, Vec<u8>, bool)>>>,
    pub deletes: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn put(&self, path: &str, payload: &[u8], urgent: bool) -> Result<(), SyncError> {
        self.puts
            .lock()
            .unwrap()
            .push((path.to_string(), payload.to_vec(), urgent));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        self.deletes.lock().unwrap().push(path.to_string());
        Ok(())
    }
}
