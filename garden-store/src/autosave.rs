/// Auto-save controller
///
/// Owns the in-memory copy of one page while an editor is mounted. Field edits land
/// in local state immediately and are coalesced by field into a single pending patch;
/// the patch is written to the store once input has been quiet for the debounce
/// interval.
///
/// Flushes of one controller are serialized: a flush dispatched while an earlier one
/// is still in flight waits for it, so the store applies them in dispatch order.
/// Failed flushes are not retried; the failure is only recorded in the status.
use crate::debounce::Debouncer;
use crate::error::StoreError;
use crate::lock;
use crate::models::{Page, PageContent, PageId, PagePatch, SessionContext};
use crate::store::PageStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveStatus {
    pub page: Page,
    pub saving: bool,
    pub dirty: bool,
    /// The page disappeared from the store; the editor should leave.
    pub gone: bool,
    pub last_error: Option<String>,
    pub fires_in_ms: Option<u64>,
    pub flushes: u64,
}

struct Shared<S> {
    store: Arc<S>,
    scope: SessionContext,
    page_id: PageId,
    local: Mutex<Page>,
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
    gone: AtomicBool,
    last_error: Mutex<Option<String>>,
    flush_gate: tokio::sync::Mutex<()>,
}

impl<S: PageStore + 'static> Shared<S> {
    fn dispatch(self: &Arc<Self>, patch: PagePatch) {
        if patch.is_empty() || self.gone.load(Ordering::Acquire) {
            return;
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.dispatched.fetch_add(1, Ordering::AcqRel);

        let shared = self.clone();
        tokio::spawn(async move {
            let _gate = shared.flush_gate.lock().await;

            if shared.gone.load(Ordering::Acquire) {
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                return;
            }

            match shared
                .store
                .update(&shared.scope, shared.page_id, patch)
                .await
            {
                Ok(saved) => {
                    lock(&shared.local).updated_at = saved.updated_at;
                    lock(&shared.last_error).take();
                    tracing::debug!(page_id = %shared.page_id, "page saved");
                }
                Err(StoreError::NotFound(id)) => {
                    shared.gone.store(true, Ordering::Release);
                    tracing::warn!(page_id = %id, "page no longer exists; auto-save stopped");
                }
                Err(e) => {
                    tracing::warn!(page_id = %shared.page_id, error = %e, "auto-save failed");
                    *lock(&shared.last_error) = Some(e.to_string());
                }
            }

            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

pub struct AutoSaveController<S: PageStore + 'static> {
    shared: Arc<Shared<S>>,
    debouncer: Debouncer<PagePatch>,
}

impl<S: PageStore + 'static> AutoSaveController<S> {
    /// Mount an editor over an already loaded page.
    pub fn mount(store: Arc<S>, scope: SessionContext, page: Page, wait: Duration) -> Self {
        let shared = Arc::new(Shared {
            store,
            scope,
            page_id: page.id,
            local: Mutex::new(page),
            in_flight: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            gone: AtomicBool::new(false),
            last_error: Mutex::new(None),
            flush_gate: tokio::sync::Mutex::new(()),
        });

        let sink = shared.clone();
        let debouncer = Debouncer::new(wait, move |patch| sink.dispatch(patch));

        Self { shared, debouncer }
    }

    /// Load the page and mount. A missing page surfaces as `NotFound`.
    pub async fn open(
        store: Arc<S>,
        scope: SessionContext,
        id: PageId,
        wait: Duration,
    ) -> Result<Self, StoreError> {
        let page = store.get(&scope, id).await?;
        Ok(Self::mount(store, scope, page, wait))
    }

    pub fn page_id(&self) -> PageId {
        self.shared.page_id
    }

    pub fn scope(&self) -> &SessionContext {
        &self.shared.scope
    }

    pub fn on_title_change(&self, title: impl Into<String>) {
        let title = title.into();
        lock(&self.shared.local).title = title.clone();
        self.schedule(PagePatch::title(title));
    }

    /// `None` clears the body.
    pub fn on_content_change(&self, content: impl Into<Option<PageContent>>) {
        let content = content.into();
        lock(&self.shared.local).content = content.clone();
        self.schedule(PagePatch {
            title: None,
            content: Some(content),
        });
    }

    fn schedule(&self, patch: PagePatch) {
        if self.is_gone() {
            self.debouncer.cancel();
            return;
        }
        tracing::debug!(page_id = %self.shared.page_id, "edit scheduled for auto-save");
        self.debouncer.schedule(patch);
    }

    /// Send `patch` to the store without waiting for the result.
    pub fn flush(&self, patch: PagePatch) {
        self.shared.dispatch(patch);
    }

    /// Flush the pending edit now, skipping the rest of the quiet interval.
    pub fn flush_pending(&self) -> bool {
        self.debouncer.fire_now()
    }

    /// Teardown: drop the pending edit so no write happens after unmount. An already
    /// dispatched flush is left to complete.
    pub fn cancel_pending_flush(&self) -> bool {
        self.debouncer.cancel().is_some()
    }

    pub fn is_saving(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) > 0
    }

    pub fn is_gone(&self) -> bool {
        self.shared.gone.load(Ordering::Acquire)
    }

    pub fn page(&self) -> Page {
        lock(&self.shared.local).clone()
    }

    pub fn status(&self) -> SaveStatus {
        if self.is_gone() {
            // stopped: nothing left to save
            self.debouncer.cancel();
        }
        let saving = self.is_saving();
        SaveStatus {
            page: self.page(),
            saving,
            dirty: saving || self.debouncer.is_pending(),
            gone: self.is_gone(),
            last_error: lock(&self.shared.last_error).clone(),
            fires_in_ms: self
                .debouncer
                .fires_after()
                .map(|d| d.as_millis() as u64),
            flushes: self.shared.dispatched.load(Ordering::Acquire),
        }
    }
}
