use crate::error::{FsmError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Description of one family of deal state machines.
///
/// The implementing type is a marker; all behavior lives in the associated
/// items. `apply` is the event catalog (guard plus pure mutation on the
/// record), `enter` is the state-entry catalog (dispatch on the record's
/// current status). Entry functions never return errors: every failure path
/// must produce an event that moves the machine to a well-defined state.
#[async_trait]
pub trait DealSpec: Sized + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;
    type Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Event: fmt::Debug + Send + Sync + 'static;
    type Environment: Send + Sync + 'static + ?Sized;

    /// Persistence format version. Records written by another version
    /// refuse to rehydrate.
    const VERSION: u32;

    fn id(record: &Self::Record) -> Self::Id;

    /// Stable numeric code of the record's current status, stored in the
    /// persistence envelope.
    fn status_code(record: &Self::Record) -> u64;

    /// Whether the record's current status is in the terminal set.
    fn is_terminal(record: &Self::Record) -> bool;

    /// Apply an event: run its guard and, if accepted, mutate the record.
    /// An error leaves the record untouched and the event is dropped.
    fn apply(record: &mut Self::Record, event: &Self::Event) -> Result<()>;

    /// Entry function for the record's current status. Runs after the
    /// mutation has been persisted and subscribers notified. A status with
    /// no entry behavior returns immediately, parking the machine until
    /// the next event.
    async fn enter(env: Arc<Self::Environment>, ctx: Context<Self>, record: Self::Record);
}

/// Handle given to entry functions for feeding events back into their own
/// deal's queue and observing shutdown.
pub struct Context<S: DealSpec> {
    id: S::Id,
    events: mpsc::UnboundedSender<S::Event>,
    shutdown: watch::Receiver<bool>,
}

impl<S: DealSpec> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: DealSpec> Context<S> {
    pub(crate) fn new(
        id: S::Id,
        events: mpsc::UnboundedSender<S::Event>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            events,
            shutdown,
        }
    }

    pub fn id(&self) -> &S::Id {
        &self.id
    }

    /// Enqueue an event for this deal. The event is applied after the
    /// current entry function returns.
    pub fn trigger(&self, event: S::Event) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(FsmError::ShuttingDown);
        }
        self.events
            .send(event)
            .map_err(|_| FsmError::ShuttingDown)
    }

    /// True once the owning group has begun stopping. Long waits inside
    /// entry functions should treat this as a cancellation signal.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    /// Context detached from any engine, for exercising entry functions in
    /// isolation. Returns the receiver that collects whatever events the
    /// entry function triggers, so callers can replay them through `apply`.
    pub fn detached(id: S::Id) -> (Self, mpsc::UnboundedReceiver<S::Event>) {
        let (events, collected) = mpsc::unbounded_channel();
        // A receiver keeps returning the last seen value after the sender
        // drops, so a detached context simply never reports shutdown.
        let (_shutdown_tx, shutdown) = watch::channel(false);
        (
            Self {
                id,
                events,
                shutdown,
            },
            collected,
        )
    }
}
