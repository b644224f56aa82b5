use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::KeyValueStore;
use crate::{Result, SessionError};

pub const USED_CODES_KEY: &str = "processedAuthCodes";

pub struct UsedCodeLedger {
    store: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write of the ledger document.
    write_lock: Mutex<()>,
}

impl UsedCodeLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn is_used(&self, code: &str) -> Result<bool> {
        Ok(self.load().await?.iter().any(|used| used == code))
    }

    /// Records `code`. Returns `Ok(true)` only if it was not already present.
    ///
    /// Any storage failure, including an unreadable ledger document, is
    /// returned as an error; callers must treat that as "already used".
    pub async fn mark_used(&self, code: &str) -> Result<bool> {
        let _write = self.write_lock.lock().await;
        let mut codes = self.load().await?;
        if codes.iter().any(|used| used == code) {
            debug!(entries = codes.len(), "authorization code already in ledger");
            return Ok(false);
        }

        codes.push(code.to_string());
        let json = serde_json::to_string(&codes)
            .map_err(|err| SessionError::storage(format!("failed to encode ledger: {err}")))?;
        self.store.set(USED_CODES_KEY, &json).await?;
        debug!(entries = codes.len(), "authorization code recorded");
        Ok(true)
    }

    pub async fn clear(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        self.store.remove(USED_CODES_KEY).await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn load(&self) -> Result<Vec<String>> {
        match self.store.get(USED_CODES_KEY).await? {
            None => Ok(Vec::new()),
            Some(json) => serde_json::from_str(&json).map_err(|err| {
                warn!(error = %err, "used-code ledger is unreadable");
                SessionError::storage(format!("failed to decode ledger: {err}"))
            }),
        }
    }
}

impl std::fmt::Debug for UsedCodeLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsedCodeLedger").finish_non_exhaustive()
    }
}
