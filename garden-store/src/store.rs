/// Document store contract and the in-memory implementation
use crate::changes::{ChangeFeed, PageChange};
use crate::error::{StoreError, StoreResult};
use crate::lock;
use crate::models::{NewPage, Page, PageId, PagePatch, SessionContext};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

/// Persistence for pages. Every call is scoped by the caller's session; pages owned
/// by someone else are reported as `NotFound`.
pub trait PageStore: Send + Sync {
    fn get(
        &self,
        scope: &SessionContext,
        id: PageId,
    ) -> impl Future<Output = StoreResult<Page>> + Send;

    /// Pages of the scope, most recently updated first.
    fn list(&self, scope: &SessionContext) -> impl Future<Output = StoreResult<Vec<Page>>> + Send;

    /// Assigns the identifier and both timestamps. A `parent_id` must name a page of
    /// the same owner, otherwise the parent is reported as `NotFound`.
    fn create(
        &self,
        scope: &SessionContext,
        page: NewPage,
    ) -> impl Future<Output = StoreResult<Page>> + Send;

    /// Partial update; refreshes `updated_at` on success.
    fn update(
        &self,
        scope: &SessionContext,
        id: PageId,
        patch: PagePatch,
    ) -> impl Future<Output = StoreResult<Page>> + Send;

    fn delete(
        &self,
        scope: &SessionContext,
        id: PageId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Change notifications for this store's pages.
    fn changes(&self) -> &ChangeFeed;
}

/// Dashboard ordering: newest `updated_at` first, ties by id.
pub fn sort_for_listing(pages: &mut [Page]) {
    pages.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryPageStore {
    pages: Mutex<HashMap<PageId, Page>>,
    feed: ChangeFeed,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            feed,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.pages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owned(&self, scope: &SessionContext, id: PageId) -> StoreResult<Page> {
        lock(&self.pages)
            .get(&id)
            .filter(|p| scope.owns(p))
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

impl PageStore for MemoryPageStore {
    async fn get(&self, scope: &SessionContext, id: PageId) -> StoreResult<Page> {
        self.owned(scope, id)
    }

    async fn list(&self, scope: &SessionContext) -> StoreResult<Vec<Page>> {
        let mut pages: Vec<Page> = lock(&self.pages)
            .values()
            .filter(|p| scope.owns(p))
            .cloned()
            .collect();
        sort_for_listing(&mut pages);
        Ok(pages)
    }

    async fn create(&self, scope: &SessionContext, page: NewPage) -> StoreResult<Page> {
        let created = {
            let mut pages = lock(&self.pages);
            if let Some(parent) = page.parent_id {
                if !pages.get(&parent).is_some_and(|p| scope.owns(p)) {
                    return Err(StoreError::NotFound(parent));
                }
            }

            let now = Utc::now();
            let created = Page {
                id: PageId::new_random(),
                title: page.title,
                content: page.content,
                parent_id: page.parent_id,
                owner_id: scope.owner_id.clone(),
                created_at: now,
                updated_at: now,
            };
            pages.insert(created.id, created.clone());
            created
        };
        self.feed.publish(PageChange::Insert(created.clone()));
        Ok(created)
    }

    async fn update(&self, scope: &SessionContext, id: PageId, patch: PagePatch) -> StoreResult<Page> {
        let updated = {
            let mut pages = lock(&self.pages);
            let page = pages
                .get_mut(&id)
                .filter(|p| scope.owns(p))
                .ok_or(StoreError::NotFound(id))?;
            page.apply(&patch);
            // keep per-record timestamps strictly increasing
            let now = Utc::now();
            page.updated_at = if now > page.updated_at {
                now
            } else {
                page.updated_at + chrono::Duration::microseconds(1)
            };
            page.clone()
        };
        self.feed.publish(PageChange::Update(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, scope: &SessionContext, id: PageId) -> StoreResult<()> {
        let removed = {
            let mut pages = lock(&self.pages);
            match pages.get(&id) {
                Some(p) if scope.owns(p) => pages.remove(&id),
                _ => None,
            }
        };
        let removed = removed.ok_or(StoreError::NotFound(id))?;
        self.feed.publish(PageChange::Delete {
            id,
            owner_id: removed.owner_id,
        });
        Ok(())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageContent;

    fn alice() -> SessionContext {
        SessionContext::new("usr_alice", "alice@example.com")
    }

    fn bob() -> SessionContext {
        SessionContext::new("usr_bob", "bob@example.com")
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamps() {
        let store = MemoryPageStore::new();
        let page = store.create(&alice(), NewPage::titled("First")).await.unwrap();

        assert_eq!(page.title, "First");
        assert_eq!(page.owner_id.as_str(), "usr_alice");
        assert_eq!(page.created_at, page.updated_at);
        assert_eq!(page.content, Some(PageContent::empty_blocks()));
        assert_eq!(store.get(&alice(), page.id).await.unwrap(), page);
    }

    #[tokio::test]
    async fn test_update_is_partial_and_refreshes_timestamp() {
        let store = MemoryPageStore::new();
        let page = store.create(&alice(), NewPage::titled("Title")).await.unwrap();

        let updated = store
            .update(&alice(), page.id, PagePatch::content(PageContent::plain_text("body")))
            .await
            .unwrap();

        assert_eq!(updated.title, "Title");
        assert_eq!(updated.content, Some(PageContent::plain_text("body")));
        assert!(updated.updated_at > page.updated_at);
        assert_eq!(updated.created_at, page.created_at);
    }

    #[tokio::test]
    async fn test_identical_update_twice_is_idempotent() {
        let store = MemoryPageStore::new();
        let page = store.create(&alice(), NewPage::titled("a")).await.unwrap();
        let patch = PagePatch {
            title: Some("b".to_string()),
            content: Some(Some(PageContent::plain_text("c"))),
        };

        let once = store.update(&alice(), page.id, patch.clone()).await.unwrap();
        let twice = store.update(&alice(), page.id, patch).await.unwrap();

        assert_eq!(once.title, twice.title);
        assert_eq!(once.content, twice.content);
        assert_eq!(once.parent_id, twice.parent_id);
        assert_eq!(once.created_at, twice.created_at);
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let store = MemoryPageStore::new();
        let page = store.create(&alice(), NewPage::titled("private")).await.unwrap();

        assert_eq!(
            store.get(&bob(), page.id).await,
            Err(StoreError::NotFound(page.id))
        );
        assert!(store.update(&bob(), page.id, PagePatch::title("x")).await.is_err());
        assert!(store.delete(&bob(), page.id).await.is_err());
        assert!(store.list(&bob()).await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_parent_must_belong_to_the_same_owner() {
        let store = MemoryPageStore::new();
        let own = store.create(&alice(), NewPage::titled("root")).await.unwrap();
        let foreign = store.create(&bob(), NewPage::titled("bob's")).await.unwrap();
        let child = |parent| NewPage {
            parent_id: Some(parent),
            ..NewPage::titled("child")
        };

        let nested = store.create(&alice(), child(own.id)).await.unwrap();
        assert_eq!(nested.parent_id, Some(own.id));

        assert_eq!(
            store.create(&alice(), child(foreign.id)).await,
            Err(StoreError::NotFound(foreign.id))
        );
        let missing = PageId::new_random();
        assert_eq!(
            store.create(&alice(), child(missing)).await,
            Err(StoreError::NotFound(missing))
        );
        assert_eq!(store.list(&alice()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let store = MemoryPageStore::new();
        let page = store.create(&alice(), NewPage::titled("gone")).await.unwrap();

        store.delete(&alice(), page.id).await.unwrap();

        assert!(store.get(&alice(), page.id).await.unwrap_err().is_not_found());
        assert!(store.delete(&alice(), page.id).await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_by_updated_desc() {
        let store = MemoryPageStore::new();
        let a = store.create(&alice(), NewPage::titled("a")).await.unwrap();
        store.create(&alice(), NewPage::titled("b")).await.unwrap();
        store.update(&alice(), a.id, PagePatch::title("a2")).await.unwrap();

        let titles: Vec<String> = store
            .list(&alice())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();

        assert_eq!(titles, vec!["a2".to_string(), "b".to_string()]);
    }
}
