use crate::api::{Authenticator, RemoteStore};
use crate::error::Result;
use crate::models::{Notation, NotationSummary, Task, User};
use crate::reorder::ReorderReport;
use crate::session::Session;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Result of a background job, delivered back to the event loop.
#[derive(Debug)]
pub enum Outcome {
    SignedIn(Result<Session>),
    /// Tagged with the board generation the fetch was issued under.
    TasksLoaded {
        generation: u64,
        result: Result<Vec<Task>>,
    },
    TaskSaved(Result<Task>),
    StatusSettled { id: i64, result: Result<Task> },
    TaskDeleted { id: i64, result: Result<()> },
    Reordered {
        report: ReorderReport,
        refreshed: Result<Vec<Task>>,
    },
    NotationsLoaded(Result<Vec<NotationSummary>>),
    NotationOpened(Result<Notation>),
    NotationSaved(Result<Notation>),
    NotationDeleted(Result<()>),
    ProfileSaved(Result<User>),
    Deactivated(Result<()>),
}

/// Runs gateway calls on the tokio runtime so the event loop never waits on
/// the network. Jobs are not cancelled: one that outlives its screen still
/// reports back.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn RemoteStore>,
    auth: Arc<dyn Authenticator>,
    tx: UnboundedSender<Outcome>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auth: Arc<dyn Authenticator>,
    ) -> (Worker, UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Worker { store, auth, tx }, rx)
    }

    pub fn spawn<F, Fut>(&self, job: F)
    where
        F: FnOnce(Arc<dyn RemoteStore>, Arc<dyn Authenticator>) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let fut = job(self.store.clone(), self.auth.clone());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if tx.send(fut.await).is_err() {
                debug!("event loop gone, dropping outcome");
            }
        });
    }
}
