//! Server-side sessions shared across calls and connections.
//!
//! A session is created once by an explicit initialize call and is then
//! addressed by its opaque id from any endpoint. Sessions live until the
//! process exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::codec;

/// Attempts at minting an unused id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Credentials for an external token endpoint, scoped to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAuth {
    pub endpoint: String,
    pub key: String,
}

/// What a session is created with.
#[derive(Debug, Clone)]
pub struct SessionInit {
    pub root: PathBuf,
    pub external_auth: Option<ExternalAuth>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not mint a unique session id after {0} attempts")]
    IdExhausted(usize),
}

/// Handle to a live session. Clones share the same state.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    id: String,
    root: PathBuf,
    external_auth: Option<ExternalAuth>,
    values: Mutex<HashMap<String, Value>>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Working root the session was initialized with.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn external_auth(&self) -> Option<&ExternalAuth> {
        self.inner.external_auth.as_ref()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read a session-scoped cached value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Store a session-scoped value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values().remove(key)
    }

    /// Whether both handles refer to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Wire form of a session reference.
#[derive(Serialize, Deserialize)]
struct SessionWire {
    id: String,
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SessionWire {
            id: self.inner.id.clone(),
        }
        .serialize(serializer)
    }
}

/// Decoding a session resolves it against the registry of the current call.
impl<'de> Deserialize<'de> for Session {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = SessionWire::deserialize(deserializer)?;
        if wire.id.is_empty() {
            return Err(D::Error::custom("session id must not be empty"));
        }

        let scope = codec::current_scope()
            .ok_or_else(|| D::Error::custom("sessions can only be decoded as call arguments"))?;

        scope
            .sessions
            .lookup(&wire.id)
            .ok_or_else(|| D::Error::custom(format!("unknown session id {:?}", wire.id)))
    }
}

/// Process-wide map of session ids to sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a session under a fresh random id.
    pub fn create(&self, init: SessionInit) -> Result<Session, SessionError> {
        self.create_with(init, || Uuid::new_v4().simple().to_string())
    }

    fn create_with(
        &self,
        init: SessionInit,
        mut mint: impl FnMut() -> String,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.lock();

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = mint();
            if id.is_empty() || sessions.contains_key(&id) {
                continue;
            }

            let session = Session {
                inner: Arc::new(SessionState {
                    id: id.clone(),
                    root: init.root,
                    external_auth: init.external_auth,
                    values: Mutex::new(HashMap::new()),
                }),
            };
            sessions.insert(id, session.clone());
            tracing::debug!(session = %session.id(), root = %session.root().display(), "Session created");
            return Ok(session);
        }

        Err(SessionError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    pub fn lookup(&self, id: &str) -> Option<Session> {
        if id.is_empty() {
            return None;
        }
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
