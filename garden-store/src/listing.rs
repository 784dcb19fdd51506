/// Dashboard page list kept in sync with the change feed.
use crate::changes::{ChangeHandler, Subscription};
use crate::error::StoreResult;
use crate::lock;
use crate::models::{Page, PageId, SessionContext};
use crate::store::{PageStore, sort_for_listing};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageList {
    pages: Vec<Page>,
    /// Set by a feed resync until the list is reloaded from the store.
    stale: bool,
}

impl PageList {
    pub fn new(mut pages: Vec<Page>) -> Self {
        sort_for_listing(&mut pages);
        pages.dedup_by_key(|p| p.id);
        Self {
            pages,
            stale: false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Replace the contents with a fresh listing from the store.
    pub fn replace(&mut self, pages: Vec<Page>) {
        *self = Self::new(pages);
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.pages.iter().any(|p| p.id == id)
    }

    /// Inserts arrive both from the local create and from the feed; keep one copy.
    pub fn insert(&mut self, page: Page) {
        if self.contains(page.id) {
            self.update(page);
            return;
        }
        self.pages.push(page);
        sort_for_listing(&mut self.pages);
    }

    /// Replace the entry unless ours is newer; unknown pages are added.
    pub fn update(&mut self, page: Page) {
        match self.pages.iter_mut().find(|p| p.id == page.id) {
            Some(existing) if existing.updated_at > page.updated_at => return,
            Some(existing) => *existing = page,
            None => self.pages.push(page),
        }
        sort_for_listing(&mut self.pages);
    }

    pub fn remove(&mut self, id: PageId) -> bool {
        let before = self.pages.len();
        self.pages.retain(|p| p.id != id);
        self.pages.len() != before
    }
}

impl ChangeHandler for PageList {
    fn on_insert(&mut self, page: &Page) {
        self.insert(page.clone());
    }

    fn on_update(&mut self, page: &Page) {
        self.update(page.clone());
    }

    fn on_delete(&mut self, id: PageId) {
        self.remove(id);
    }

    fn on_resync(&mut self) {
        self.stale = true;
    }
}

/// `PageList` shared between a feed subscription and its readers.
#[derive(Debug, Clone, Default)]
pub struct SharedPageList(Arc<Mutex<PageList>>);

impl SharedPageList {
    pub fn new(list: PageList) -> Self {
        Self(Arc::new(Mutex::new(list)))
    }

    pub fn snapshot(&self) -> PageList {
        lock(&self.0).clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut PageList) -> R) -> R {
        f(&mut lock(&self.0))
    }

    pub async fn reload<S: PageStore>(&self, store: &S, scope: &SessionContext) -> StoreResult<()> {
        let pages = store.list(scope).await?;
        lock(&self.0).replace(pages);
        Ok(())
    }

    /// Keep this list in sync with `store`'s feed, reloading it whenever the feed
    /// resyncs.
    pub fn follow<S>(&self, store: Arc<S>, scope: &SessionContext) -> Subscription
    where
        S: PageStore + 'static,
    {
        let handler = FollowStore {
            list: self.clone(),
            store: store.clone(),
            scope: scope.clone(),
        };
        store.changes().subscribe(scope, handler)
    }
}

impl ChangeHandler for SharedPageList {
    fn on_insert(&mut self, page: &Page) {
        lock(&self.0).on_insert(page);
    }

    fn on_update(&mut self, page: &Page) {
        lock(&self.0).on_update(page);
    }

    fn on_delete(&mut self, id: PageId) {
        lock(&self.0).on_delete(id);
    }

    fn on_resync(&mut self) {
        lock(&self.0).on_resync();
    }
}

struct FollowStore<S> {
    list: SharedPageList,
    store: Arc<S>,
    scope: SessionContext,
}

impl<S: PageStore + 'static> ChangeHandler for FollowStore<S> {
    fn on_insert(&mut self, page: &Page) {
        self.list.on_insert(page);
    }

    fn on_update(&mut self, page: &Page) {
        self.list.on_update(page);
    }

    fn on_delete(&mut self, id: PageId) {
        self.list.on_delete(id);
    }

    fn on_resync(&mut self) {
        self.list.on_resync();
        let (list, store, scope) = (self.list.clone(), self.store.clone(), self.scope.clone());
        tokio::spawn(async move {
            if let Err(e) = list.reload(store.as_ref(), &scope).await {
                // stays stale; the next resync retries
                tracing::warn!(owner = %scope.owner_id, "page list reload failed: {}", e);
            }
        });
    }
}
