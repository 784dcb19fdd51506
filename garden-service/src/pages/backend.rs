use super::db::PgPageStore;
use garden_store::{
    ChangeFeed, MemoryPageStore, NewPage, Page, PageId, PagePatch, PageStore, SessionContext,
    StoreResult,
};

/// The configured page store.
#[derive(Debug)]
pub enum PageBackend {
    Postgres(PgPageStore),
    Memory(MemoryPageStore),
}

impl PageBackend {
    pub fn name(&self) -> &'static str {
        match self {
            PageBackend::Postgres(_) => "postgres",
            PageBackend::Memory(_) => "memory",
        }
    }
}

impl PageStore for PageBackend {
    async fn get(&self, scope: &SessionContext, id: PageId) -> StoreResult<Page> {
        match self {
            PageBackend::Postgres(store) => store.get(scope, id).await,
            PageBackend::Memory(store) => store.get(scope, id).await,
        }
    }

    async fn list(&self, scope: &SessionContext) -> StoreResult<Vec<Page>> {
        match self {
            PageBackend::Postgres(store) => store.list(scope).await,
            PageBackend::Memory(store) => store.list(scope).await,
        }
    }

    async fn create(&self, scope: &SessionContext, page: NewPage) -> StoreResult<Page> {
        match self {
            PageBackend::Postgres(store) => store.create(scope, page).await,
            PageBackend::Memory(store) => store.create(scope, page).await,
        }
    }

    async fn update(&self, scope: &SessionContext, id: PageId, patch: PagePatch) -> StoreResult<Page> {
        match self {
            PageBackend::Postgres(store) => store.update(scope, id, patch).await,
            PageBackend::Memory(store) => store.update(scope, id, patch).await,
        }
    }

    async fn delete(&self, scope: &SessionContext, id: PageId) -> StoreResult<()> {
        match self {
            PageBackend::Postgres(store) => store.delete(scope, id).await,
            PageBackend::Memory(store) => store.delete(scope, id).await,
        }
    }

    fn changes(&self) -> &ChangeFeed {
        match self {
            PageBackend::Postgres(store) => store.changes(),
            PageBackend::Memory(store) => store.changes(),
        }
    }
}
