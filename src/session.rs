use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AssistantError, Result};

pub const SESSION_STORAGE_KEY: &str = "chatbot_session_id";

/// Tab-scoped key/value storage backing the session id.
pub trait SessionStorage: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    values: Mutex<HashMap<String, String>>,
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self, key: &str) -> Option<String> {
        let values = self.values.lock().ok()?;
        values.get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| AssistantError::storage("session storage lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub fn generate_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// Owns the one active conversation id for this client.
///
/// Storage failures are logged and swallowed: the in-memory id is always
/// returned so callers never have to handle a missing session.
pub struct SessionIdentity {
    storage: Arc<dyn SessionStorage>,
    current: RwLock<Option<String>>,
}

impl SessionIdentity {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            current: RwLock::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::default()))
    }

    pub fn current(&self) -> Option<String> {
        self.current.read().ok().and_then(|id| id.clone())
    }

    pub fn get_or_create(&self) -> String {
        if let Some(id) = self.current() {
            return id;
        }

        let id = match self
            .storage
            .load(SESSION_STORAGE_KEY)
            .filter(|stored| !stored.trim().is_empty())
        {
            Some(stored) => stored,
            None => {
                let fresh = generate_session_id();
                self.persist(&fresh);
                fresh
            }
        };
        self.set_current(&id);
        id
    }

    pub fn rotate(&self) -> String {
        let fresh = generate_session_id();
        self.persist(&fresh);
        self.set_current(&fresh);
        info!(session_id = %fresh, "session rotated");
        fresh
    }

    /// Switches to a session id chosen by the backend. Returns false when it
    /// already was the active id.
    pub fn adopt(&self, server_id: &str) -> bool {
        let server_id = server_id.trim();
        if server_id.is_empty() || self.current().as_deref() == Some(server_id) {
            return false;
        }
        self.persist(server_id);
        self.set_current(server_id);
        info!(session_id = %server_id, "adopted server session id");
        true
    }

    fn persist(&self, id: &str) {
        if let Err(err) = self.storage.store(SESSION_STORAGE_KEY, id) {
            warn!(error = %err, "failed to persist session id");
        }
    }

    fn set_current(&self, id: &str) {
        match self.current.write() {
            Ok(mut current) => *current = Some(id.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(id.to_string()),
        }
    }
}
