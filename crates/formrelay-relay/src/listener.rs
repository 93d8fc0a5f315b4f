//! Background relay worker fed by a bounded queue of submission events.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::events::EntryCreated;
use crate::pipeline::SubmissionPipeline;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Relay queue is full")]
    Full,

    #[error("Relay queue is closed")]
    Closed,
}

/// Producer side of the relay queue
#[derive(Clone)]
pub struct RelayQueue {
    sender: mpsc::Sender<EntryCreated>,
}

impl RelayQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<EntryCreated>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Hand an event to the worker without waiting
    pub fn enqueue(&self, event: EntryCreated) -> Result<(), QueueError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

type Receiver = mpsc::Receiver<EntryCreated>;

struct RunningWorker {
    cancel: CancellationToken,
    handle: JoinHandle<Receiver>,
}

/// Consumes queued events and runs the pipeline for each, one at a time
pub struct RelayWorker {
    pipeline: Arc<SubmissionPipeline>,
    receiver: Arc<RwLock<Option<Receiver>>>,
    running: Arc<RwLock<Option<RunningWorker>>>,
}

impl RelayWorker {
    pub fn new(pipeline: Arc<SubmissionPipeline>, receiver: Receiver) -> Self {
        Self {
            pipeline,
            receiver: Arc::new(RwLock::new(Some(receiver))),
            running: Arc::new(RwLock::new(None)),
        }
    }

    /// Spawn the worker task; no-op when already running
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if running.is_some() {
            info!("Relay worker already running");
            return;
        }

        let Some(mut receiver) = self.receiver.write().await.take() else {
            error!("Relay worker has no queue to consume");
            return;
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pipeline = self.pipeline.clone();

        let handle = tokio::spawn(async move {
            let mut processed = 0u64;
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Some(event) => event,
                        None => {
                            debug!("Relay queue closed");
                            break;
                        }
                    },
                };

                processed += 1;
                let outcome = pipeline.handle(&event).await;
                debug!("Entry {} done: {}", event.entry_id, outcome);
            }
            info!("Relay worker stopped after {} events", processed);
            receiver
        });

        *running = Some(RunningWorker { cancel, handle });
        info!("Relay worker started");
    }

    /// Cancel the worker and wait for the event in flight to finish
    pub async fn stop(&self) {
        let Some(worker) = self.running.write().await.take() else {
            return;
        };

        worker.cancel.cancel();
        match worker.handle.await {
            Ok(receiver) => *self.receiver.write().await = Some(receiver),
            Err(e) => error!("Relay worker task failed: {}", e),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .read()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}
