//! Background processing of visits so redirects never wait on bookkeeping.
//!
//! The redirect handler hands each visit to a bounded queue with `try_send`.
//! A single drain task spawns one task per visit that runs the counter update
//! and the event record concurrently. When the queue is full the visit is
//! dropped with a warning.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::analytics::{EventRecorder, VisitContext};
use crate::shortener::Shortener;

#[derive(Debug, Clone)]
pub struct Visit {
    pub short_id: String,
    pub owner_id: Option<String>,
    pub context: VisitContext,
}

#[derive(Clone)]
pub struct VisitDispatcher {
    tx: mpsc::Sender<Visit>,
}

impl VisitDispatcher {
    /// Start the drain task. `recorder = None` disables event recording while
    /// still counting visits.
    ///
    /// The task finishes after every dispatcher clone is dropped and all
    /// in-flight visits are processed.
    pub fn spawn(
        shortener: Arc<Shortener>,
        recorder: Option<Arc<EventRecorder>>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(rx, shortener, recorder));
        (Self { tx }, handle)
    }

    /// Queue a visit without waiting. Returns `false` if it was dropped.
    pub fn dispatch(&self, visit: Visit) -> bool {
        match self.tx.try_send(visit) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(visit)) => {
                warn!(short_id = %visit.short_id, "Visit queue full, dropping visit");
                false
            }
            Err(mpsc::error::TrySendError::Closed(visit)) => {
                warn!(short_id = %visit.short_id, "Visit dispatcher stopped, dropping visit");
                false
            }
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<Visit>,
    shortener: Arc<Shortener>,
    recorder: Option<Arc<EventRecorder>>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            visit = rx.recv() => match visit {
                Some(visit) => {
                    in_flight.spawn(process(shortener.clone(), recorder.clone(), visit));
                }
                None => break,
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    let pending = in_flight.len();
    while in_flight.join_next().await.is_some() {}
    info!(pending, "Visit dispatcher stopped");
}

async fn process(shortener: Arc<Shortener>, recorder: Option<Arc<EventRecorder>>, visit: Visit) {
    let Visit {
        short_id,
        owner_id,
        context,
    } = visit;

    let count = async {
        if let Err(err) = shortener
            .storage()
            .record_visit(&short_id, context.occurred_at)
            .await
        {
            warn!(short_id = %short_id, error = %err, "Failed to update visit counter");
        }
    };

    let record = async {
        let Some(recorder) = &recorder else {
            return;
        };
        match recorder
            .record(&short_id, owner_id.as_deref(), context.clone())
            .await
        {
            Ok(event) => debug!(short_id = %short_id, event_id = event.id, "Visit recorded"),
            Err(err) => warn!(short_id = %short_id, error = %err, "Failed to record visit event"),
        }
    };

    tokio::join!(count, record);
}
