// ABOUTME: Registry of live web UI connections grouped by session id
// ABOUTME: Each connection owns an outbound queue drained by its socket writer task

use anyhow::Result;
use async_trait::async_trait;
use jarvis_core::notify::LiveHub;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub type ConnectionId = u64;

type Groups = HashMap<String, HashMap<ConnectionId, mpsc::UnboundedSender<String>>>;

/// A registered connection. Dropping it does not unregister; call [`WebHub::disconnect`].
pub struct Connection {
    pub id: ConnectionId,
    pub session_id: String,
    /// Queue for replies addressed to this connection only
    pub sender: mpsc::UnboundedSender<String>,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

#[derive(Clone, Default)]
pub struct WebHub {
    groups: Arc<Mutex<Groups>>,
    next_id: Arc<AtomicU64>,
}

impl WebHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Groups> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, session_id: &str) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .insert(id, sender.clone());
        tracing::info!(session = %session_id, connection = id, "WebSocket connected");
        Connection {
            id,
            session_id: session_id.to_string(),
            sender,
            receiver,
        }
    }

    pub fn disconnect(&self, session_id: &str, id: ConnectionId) {
        let mut groups = self.lock();
        if let Some(conns) = groups.get_mut(session_id) {
            conns.remove(&id);
            if conns.is_empty() {
                groups.remove(session_id);
            }
        }
        tracing::info!(session = %session_id, connection = id, "WebSocket disconnected");
    }

    pub fn connection_count(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}

#[async_trait]
impl LiveHub for WebHub {
    fn groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    async fn broadcast(&self, group: &str, message: &str) -> Result<()> {
        let mut groups = self.lock();
        let Some(conns) = groups.get_mut(group) else {
            return Ok(());
        };
        // A closed queue means the socket task already ended
        let before = conns.len();
        conns.retain(|_, tx| tx.send(message.to_string()).is_ok());
        let dropped = before - conns.len();
        if conns.is_empty() {
            groups.remove(group);
        }
        if dropped > 0 {
            anyhow::bail!("{} stale connection(s) in session {}", dropped, group);
        }
        Ok(())
    }
}
