/// Change feed
///
/// Fan-out of page insert/update/delete events to scoped subscribers. Every
/// subscriber has its own unbounded queue, so a slow consumer never loses events.
/// When the source itself may have missed changes (the database listener
/// reconnecting) the feed sends a resync instead, and consumers reload.
///
/// Each subscriber gets an explicit `Subscription` handle; once `cancel` returns, the
/// handler is never called again.
use crate::lock;
use crate::models::{OwnerId, Page, PageId, SessionContext};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "page", rename_all = "lowercase")]
pub enum PageChange {
    Insert(Page),
    Update(Page),
    Delete { id: PageId, owner_id: OwnerId },
}

impl PageChange {
    pub fn owner_id(&self) -> &OwnerId {
        match self {
            PageChange::Insert(page) | PageChange::Update(page) => &page.owner_id,
            PageChange::Delete { owner_id, .. } => owner_id,
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            PageChange::Insert(page) | PageChange::Update(page) => page.id,
            PageChange::Delete { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PageChange::Insert(_) => "insert",
            PageChange::Update(_) => "update",
            PageChange::Delete { .. } => "delete",
        }
    }

    fn dispatch(&self, handler: &mut dyn ChangeHandler) {
        match self {
            PageChange::Insert(page) => handler.on_insert(page),
            PageChange::Update(page) => handler.on_update(page),
            PageChange::Delete { id, .. } => handler.on_delete(*id),
        }
    }
}

/// What a subscriber receives: a change, or notice that changes may have been missed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(PageChange),
    Resync,
}

impl FeedEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Change(change) => change.kind(),
            FeedEvent::Resync => "resync",
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Receiver side of a subscription. Callbacks run on the subscription's delivery
/// task and must not cancel their own subscription.
pub trait ChangeHandler {
    fn on_insert(&mut self, page: &Page);
    fn on_update(&mut self, page: &Page);
    fn on_delete(&mut self, id: PageId);

    /// Changes may have been missed; state derived from the feed should be reloaded.
    fn on_resync(&mut self) {}
}

/// Three plain callbacks, one per event type. Resyncs are ignored.
pub struct Callbacks<I, U, D> {
    pub on_insert: I,
    pub on_update: U,
    pub on_delete: D,
}

impl<I, U, D> ChangeHandler for Callbacks<I, U, D>
where
    I: FnMut(&Page),
    U: FnMut(&Page),
    D: FnMut(PageId),
{
    fn on_insert(&mut self, page: &Page) {
        (self.on_insert)(page)
    }

    fn on_update(&mut self, page: &Page) {
        (self.on_update)(page)
    }

    fn on_delete(&mut self, id: PageId) {
        (self.on_delete)(id)
    }
}

/// Forwards events into a channel, e.g. to feed an event stream.
pub struct ForwardChanges {
    tx: mpsc::UnboundedSender<FeedEvent>,
    owner_id: OwnerId,
}

impl ForwardChanges {
    pub fn new(scope: &SessionContext) -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                owner_id: scope.owner_id.clone(),
            },
            rx,
        )
    }

    fn forward(&self, event: FeedEvent) {
        // receiver gone means the consumer is shutting down; its Subscription drop
        // stops delivery
        let _ = self.tx.send(event);
    }
}

impl ChangeHandler for ForwardChanges {
    fn on_insert(&mut self, page: &Page) {
        self.forward(FeedEvent::Change(PageChange::Insert(page.clone())));
    }

    fn on_update(&mut self, page: &Page) {
        self.forward(FeedEvent::Change(PageChange::Update(page.clone())));
    }

    fn on_delete(&mut self, id: PageId) {
        self.forward(FeedEvent::Change(PageChange::Delete {
            id,
            owner_id: self.owner_id.clone(),
        }));
    }

    fn on_resync(&mut self) {
        self.forward(FeedEvent::Resync);
    }
}

// ============================================================================
// Feed & Subscription
// ============================================================================

type HandlerSlot = Arc<Mutex<Option<Box<dyn ChangeHandler + Send>>>>;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    owner: OwnerId,
    tx: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscriber>,
}

impl Subscribers {
    fn prune(&mut self) {
        self.entries.retain(|s| !s.tx.is_closed());
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangeFeed {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a change to the subscribers of its owner; returns how many got it.
    pub fn publish(&self, change: PageChange) -> usize {
        tracing::debug!(kind = change.kind(), page_id = %change.page_id(), "publishing page change");
        let mut subscribers = lock(&self.subscribers);
        subscribers.prune();
        subscribers
            .entries
            .iter()
            .filter(|s| &s.owner == change.owner_id())
            .filter(|s| s.tx.send(FeedEvent::Change(change.clone())).is_ok())
            .count()
    }

    /// Tell every subscriber that changes may have been missed.
    pub fn resync(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.prune();
        let notified = subscribers
            .entries
            .iter()
            .filter(|s| s.tx.send(FeedEvent::Resync).is_ok())
            .count();
        tracing::info!(subscribers = notified, "change feed resync requested");
        notified
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.prune();
        subscribers.entries.len()
    }

    /// Subscribe to changes of pages owned by `scope`. Events published after this
    /// returns are delivered, in publish order, until the subscription is cancelled
    /// or dropped.
    pub fn subscribe<H>(&self, scope: &SessionContext, handler: H) -> Subscription
    where
        H: ChangeHandler + Send + 'static,
    {
        let slot: HandlerSlot = Arc::new(Mutex::new(Some(Box::new(handler))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.next_id += 1;
            let id = subscribers.next_id;
            subscribers.entries.push(Subscriber {
                id,
                owner: scope.owner_id.clone(),
                tx,
            });
            id
        };

        let delivery = slot.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut guard = lock(&delivery);
                let Some(handler) = guard.as_mut() else {
                    break;
                };
                match event {
                    FeedEvent::Change(change) => change.dispatch(handler.as_mut()),
                    FeedEvent::Resync => handler.on_resync(),
                }
            }
        });

        Subscription {
            id,
            feed: Arc::downgrade(&self.subscribers),
            slot,
            task,
        }
    }
}

/// Cancellable subscription handle. Dropping it cancels as well.
pub struct Subscription {
    id: u64,
    feed: Weak<Mutex<Subscribers>>,
    slot: HandlerSlot,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivery. Waits for a callback already in progress, so no callback runs
    /// after this returns.
    pub fn cancel(&self) {
        lock(&self.slot).take();
        self.task.abort();
        if let Some(feed) = self.feed.upgrade() {
            lock(&feed).entries.retain(|s| s.id != self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
