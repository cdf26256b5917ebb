// ABOUTME: In-memory conversation registry mapping caller session ids to engine continuation tokens.
// ABOUTME: Map access goes through one lock; each session also owns an exclusive invocation slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Conversation state for one caller-supplied session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub session_id: String,
    /// Opaque engine identifier replayed with `--resume` on the next message
    pub continuation_token: Option<String>,
}

struct SessionEntry {
    session: ConversationSession,
    slot: Arc<AsyncMutex<()>>,
}

/// Handle returned by [`ConversationRegistry::get_or_create`].
///
/// Holds the session id and its invocation slot, never the session state
/// itself; the registry stays the only owner of the continuation token.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    slot: Arc<AsyncMutex<()>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Held for the duration of one engine invocation
pub struct InvocationSlot {
    _guard: OwnedMutexGuard<()>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait until no other invocation is running against this session
    pub async fn acquire(&self) -> InvocationSlot {
        InvocationSlot {
            _guard: Arc::clone(&self.slot).lock_owned().await,
        }
    }

    /// True when both handles refer to the same registered session
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Registry of live conversations, cheap to clone and share between tasks
#[derive(Clone, Default)]
pub struct ConversationRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic midway, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.lock();
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session = %session_id, "Creating conversation session");
            SessionEntry {
                session: ConversationSession {
                    session_id: session_id.to_string(),
                    continuation_token: None,
                },
                slot: Arc::new(AsyncMutex::new(())),
            }
        });
        SessionHandle {
            session_id: session_id.to_string(),
            slot: Arc::clone(&entry.slot),
        }
    }

    /// Snapshot of a session's state
    pub fn get(&self, session_id: &str) -> Option<ConversationSession> {
        self.lock().get(session_id).map(|e| e.session.clone())
    }

    pub fn continuation_token(&self, session_id: &str) -> Option<String> {
        self.lock()
            .get(session_id)
            .and_then(|e| e.session.continuation_token.clone())
    }

    /// Overwrite the continuation token. Does nothing if the session was
    /// cleared in the meantime.
    pub fn update_token(&self, session_id: &str, token: impl Into<String>) {
        let mut sessions = self.lock();
        match sessions.get_mut(session_id) {
            Some(entry) => entry.session.continuation_token = Some(token.into()),
            None => {
                tracing::debug!(session = %session_id, "Token update for unknown session ignored")
            }
        }
    }

    /// Overwrite the token only if `handle` still refers to the registered
    /// session. A session cleared and recreated while an invocation was in
    /// flight keeps its fresh state. Returns whether the token was written.
    pub fn update_token_for(&self, handle: &SessionHandle, token: impl Into<String>) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(&handle.session_id) {
            Some(entry) if Arc::ptr_eq(&entry.slot, &handle.slot) => {
                entry.session.continuation_token = Some(token.into());
                true
            }
            _ => {
                tracing::debug!(
                    session = %handle.session_id,
                    "Token from a cleared session discarded"
                );
                false
            }
        }
    }

    /// Remove a session entirely. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            tracing::debug!(session = %session_id, "Conversation session cleared");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = ConversationRegistry::new();
        let a = registry.get_or_create("default");
        let b = registry.get_or_create("default");
        assert!(a.same_session(&b));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.continuation_token("default"), None);
    }

    #[test]
    fn test_update_token_on_missing_session_is_noop() {
        let registry = ConversationRegistry::new();
        registry.update_token("ghost", "abc");
        assert!(registry.get("ghost").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_then_recreate_starts_fresh() {
        let registry = ConversationRegistry::new();
        let first = registry.get_or_create("discord-42");
        registry.update_token("discord-42", "tok-1");
        assert!(registry.clear("discord-42"));
        assert!(!registry.clear("discord-42"));

        let second = registry.get_or_create("discord-42");
        assert!(!first.same_session(&second));
        assert_eq!(registry.continuation_token("discord-42"), None);
    }

    #[test]
    fn test_update_token_for_ignores_stale_handle() {
        let registry = ConversationRegistry::new();
        let stale = registry.get_or_create("default");
        registry.clear("default");
        let fresh = registry.get_or_create("default");

        assert!(!registry.update_token_for(&stale, "tok-old"));
        assert_eq!(registry.continuation_token("default"), None);

        assert!(registry.update_token_for(&fresh, "tok-new"));
        assert_eq!(registry.continuation_token("default").as_deref(), Some("tok-new"));
    }

    #[tokio::test]
    async fn test_slot_is_exclusive_per_session() {
        let registry = ConversationRegistry::new();
        let handle = registry.get_or_create("default");
        let held = handle.acquire().await;

        let contender = registry.get_or_create("default");
        let attempt = tokio::time::timeout(Duration::from_millis(50), contender.acquire()).await;
        assert!(attempt.is_err(), "second invocation must wait for the first");

        // Other sessions are unaffected
        let other = registry.get_or_create("other");
        let _other_slot = other.acquire().await;

        drop(held);
        let _slot = contender.acquire().await;
    }
}
