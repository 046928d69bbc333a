use crate::error::{FsmError, Result};
use crate::machine::{Context, DealSpec};
use crate::store::{decode_record, encode_record, RecordStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Opaque subscription handle. Unsubscribe is by token, never by comparing
/// callback identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Subscriber<S> =
    Box<dyn Fn(&<S as DealSpec>::Event, &<S as DealSpec>::Record) + Send + Sync>;

struct DealHandle<S: DealSpec> {
    sender: mpsc::UnboundedSender<S::Event>,
    task: JoinHandle<()>,
}

/// A group of state machines sharing one record store and one environment.
///
/// Each deal gets a dedicated actor task: events for a deal are applied and
/// their entry functions run strictly one at a time, while distinct deals
/// progress in parallel. Every mutation is persisted before subscribers are
/// notified and before the next entry function observes it.
pub struct StateGroup<S: DealSpec> {
    env: Arc<S::Environment>,
    store: Arc<dyn RecordStore>,
    deals: RwLock<HashMap<S::Id, DealHandle<S>>>,
    subscribers: Arc<RwLock<HashMap<u64, Subscriber<S>>>>,
    next_subscription: AtomicU64,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl<S: DealSpec> StateGroup<S> {
    pub fn new(env: Arc<S::Environment>, store: Arc<dyn RecordStore>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            env,
            store,
            deals: RwLock::new(HashMap::new()),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_subscription: AtomicU64::new(0),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Create and persist a new deal, then run the entry function for its
    /// initial state.
    pub async fn begin(&self, record: S::Record) -> Result<()> {
        self.ensure_open()?;
        let id = S::id(&record);
        if self.deals.read().await.contains_key(&id)
            || self.store.get(&id.to_string()).await?.is_some()
        {
            return Err(FsmError::DealExists(id.to_string()));
        }
        self.store
            .put(&id.to_string(), encode_record::<S>(&record)?)
            .await?;
        self.spawn_actor(id, true).await;
        Ok(())
    }

    /// Enqueue an event for a deal. Events for the same deal are applied in
    /// send order; the call returns once the event is queued.
    pub async fn send(&self, id: &S::Id, event: S::Event) -> Result<()> {
        self.ensure_open()?;
        let sender = {
            let deals = self.deals.read().await;
            deals.get(id).map(|h| h.sender.clone())
        };
        if let Some(sender) = sender {
            return sender.send(event).map_err(|_| FsmError::ShuttingDown);
        }
        // A persisted deal without a running actor (first send after a
        // process restart): rehydrate without re-entering.
        if self.store.get(&id.to_string()).await?.is_some() {
            let sender = self.spawn_actor(id.clone(), false).await;
            return sender.send(event).map_err(|_| FsmError::ShuttingDown);
        }
        Err(FsmError::UnknownDeal(id.to_string()))
    }

    /// Snapshot of every persisted deal record.
    pub async fn list(&self) -> Result<Vec<S::Record>> {
        let raw = self.store.list().await?;
        raw.iter().map(|bytes| decode_record::<S>(bytes)).collect()
    }

    /// Snapshot of one deal record.
    pub async fn get(&self, id: &S::Id) -> Result<Option<S::Record>> {
        match self.store.get(&id.to_string()).await? {
            Some(bytes) => Ok(Some(decode_record::<S>(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether the record's current status is terminal for this machine.
    pub fn is_terminated(&self, record: &S::Record) -> bool {
        S::is_terminal(record)
    }

    /// Rehydrate every persisted record and re-enter its current state.
    /// Deals that already have a running actor are left alone, so entry
    /// functions run at most once per restart. Fails without starting
    /// anything if any record has an unsupported version.
    pub async fn restart(&self) -> Result<()> {
        self.ensure_open()?;
        let records = self.list().await?;
        for record in records {
            self.spawn_actor(S::id(&record), true).await;
        }
        Ok(())
    }

    /// Register a subscriber for (event, record snapshot) notifications.
    pub async fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&S::Event, &S::Record) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .await
            .insert(id, Box::new(callback));
        SubscriptionId(id)
    }

    /// Remove a subscriber. Unknown or already-removed tokens are a no-op.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().await.remove(&id.0);
    }

    /// Refuse further sends, wait for in-flight entry functions to return
    /// (bounded per deal), then close the record store.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown.send(true);
        let handles: Vec<DealHandle<S>> = {
            let mut deals = self.deals.write().await;
            deals.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            drop(handle.sender);
            let mut task = handle.task;
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("deal actor did not stop in time, aborting");
                task.abort();
            }
        }
        self.store.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FsmError::ShuttingDown);
        }
        Ok(())
    }

    async fn spawn_actor(&self, id: S::Id, enter_on_start: bool) -> mpsc::UnboundedSender<S::Event> {
        let mut deals = self.deals.write().await;
        if let Some(handle) = deals.get(&id) {
            return handle.sender.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Context::new(id.clone(), tx.clone(), self.shutdown.subscribe());
        let task = tokio::spawn(actor_loop::<S>(
            self.env.clone(),
            self.store.clone(),
            self.subscribers.clone(),
            ctx,
            rx,
            enter_on_start,
        ));
        deals.insert(
            id,
            DealHandle {
                sender: tx.clone(),
                task,
            },
        );
        tx
    }
}

/// The per-deal actor: applies one event at a time, persisting and
/// notifying before the entry function for the new state runs.
async fn actor_loop<S: DealSpec>(
    env: Arc<S::Environment>,
    store: Arc<dyn RecordStore>,
    subscribers: Arc<RwLock<HashMap<u64, Subscriber<S>>>>,
    ctx: Context<S>,
    mut events: mpsc::UnboundedReceiver<S::Event>,
    enter_on_start: bool,
) {
    let key = ctx.id().to_string();
    let mut shutdown = ctx.shutdown_receiver();

    if enter_on_start {
        match load_record::<S>(store.as_ref(), &key).await {
            Some(record) => S::enter(env.clone(), ctx.clone(), record).await,
            None => {
                warn!(deal = %key, "no persisted record for deal actor");
                return;
            }
        }
    }

    loop {
        tokio::select! {
            biased;
            maybe_event = events.recv() => {
                let event = match maybe_event {
                    Some(event) => event,
                    None => break,
                };
                let mut record = match load_record::<S>(store.as_ref(), &key).await {
                    Some(record) => record,
                    None => continue,
                };
                if let Err(e) = S::apply(&mut record, &event) {
                    debug!(deal = %key, event = ?event, error = %e, "event rejected by guard");
                    continue;
                }
                let encoded = match encode_record::<S>(&record) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        warn!(deal = %key, error = %e, "failed to encode deal record");
                        continue;
                    }
                };
                if let Err(e) = store.put(&key, encoded).await {
                    warn!(deal = %key, error = %e, "failed to persist deal record");
                    continue;
                }
                {
                    let subs = subscribers.read().await;
                    for callback in subs.values() {
                        callback(&event, &record);
                    }
                }
                S::enter(env.clone(), ctx.clone(), record).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn load_record<S: DealSpec>(store: &dyn RecordStore, key: &str) -> Option<S::Record> {
    match store.get(key).await {
        Ok(Some(bytes)) => match decode_record::<S>(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(deal = %key, error = %e, "failed to decode deal record");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(deal = %key, error = %e, "failed to load deal record");
            None
        }
    }
}
