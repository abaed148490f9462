//! Best-effort audit trail.
//!
//! Callers hand entries to an [`AuditRecorder`], which enqueues them on a
//! bounded channel without waiting. A background [`AuditWorker`] drains the
//! queue into the store. A full queue or a failed insert is logged at `warn`
//! and dropped; neither ever reaches the caller.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::ClientMeta;
use crate::store::{AuthStore, NewAuditLog};

/// Default bound on queued, unwritten entries.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

impl NewAuditLog {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn session(mut self, session_id: Option<Uuid>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn device(mut self, device_id: Option<Uuid>) -> Self {
        self.device_id = device_id;
        self
    }

    /// Copy IP and user agent from the request.
    pub fn client(mut self, client: &ClientMeta) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }
}

enum Message {
    Entry(NewAuditLog),
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable handle for enqueuing audit entries.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<Message>,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("queued", &(self.tx.max_capacity() - self.tx.capacity()))
            .finish()
    }
}

impl AuditRecorder {
    /// Start the background writer. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn AuthStore>, capacity: usize) -> (Self, AuditWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(store, rx, cancel.clone()));
        (Self { tx }, AuditWorker { cancel, handle })
    }

    /// Enqueue an entry. Never blocks and never fails the caller.
    pub fn record(&self, entry: NewAuditLog) {
        let action = entry.action.clone();
        if let Err(e) = self.tx.try_send(Message::Entry(entry)) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(%action, reason, "audit entry dropped");
        }
    }

    /// Wait until every entry recorded before this call has been written
    /// (or dropped). Returns immediately if the writer has stopped.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

/// Owns the background writer task.
pub struct AuditWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AuditWorker {
    /// Stop accepting entries, write whatever is already queued, and wait for
    /// the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("audit writer task failed: {e}");
        }
    }
}

async fn run(store: Arc<dyn AuthStore>, mut rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => handle(&*store, msg).await,
                None => break,
            },
            _ = cancel.cancelled() => {
                rx.close();
                while let Some(msg) = rx.recv().await {
                    handle(&*store, msg).await;
                }
                break;
            }
        }
    }
    debug!("audit writer stopped");
}

async fn handle(store: &dyn AuthStore, msg: Message) {
    match msg {
        Message::Entry(entry) => {
            if let Err(e) = store.insert_audit_log(&entry).await {
                warn!(action = %entry.action, "failed to record audit log: {e}");
            }
        }
        Message::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn entries_are_written_in_order() {
        let store = Arc::new(MemoryStore::new());
        let (recorder, worker) = AuditRecorder::spawn(store.clone(), 16);
        let uid = Uuid::new_v4();
        recorder.record(NewAuditLog::new("first").user(uid));
        recorder.record(NewAuditLog::new("second").user(uid));
        recorder.flush().await;

        let logs = store.list_audit_logs(10).await.unwrap();
        let actions: Vec<_> = logs.iter().map(|l| l.action.as_str()).collect();
        assert_eq!(actions, vec!["second", "first"]);
        assert!(logs.iter().all(|l| l.user_id == Some(uid)));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_audit_writes(true);
        let (recorder, worker) = AuditRecorder::spawn(store.clone(), 4);
        recorder.record(NewAuditLog::new("lost"));
        recorder.flush().await;
        assert!(store.list_audit_logs(10).await.unwrap().is_empty());

        store.set_fail_audit_writes(false);
        recorder.record(NewAuditLog::new("kept"));
        worker.shutdown().await;
        assert_eq!(store.list_audit_logs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_after_shutdown_does_not_panic() {
        let store = Arc::new(MemoryStore::new());
        let (recorder, worker) = AuditRecorder::spawn(store.clone(), 4);
        worker.shutdown().await;
        recorder.record(NewAuditLog::new("late"));
        recorder.flush().await;
        assert!(store.list_audit_logs(10).await.unwrap().is_empty());
    }

    #[test]
    fn builder_copies_client_meta() {
        let client = ClientMeta {
            ip_address: Some("10.0.0.1".into()),
            user_agent: Some("curl/8".into()),
            device_name: None,
        };
        let sid = Uuid::new_v4();
        let entry = NewAuditLog::new("User logged in")
            .session(Some(sid))
            .client(&client);
        assert_eq!(entry.session_id, Some(sid));
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.user_agent.as_deref(), Some("curl/8"));
        assert_eq!(entry.user_id, None);
    }
}
