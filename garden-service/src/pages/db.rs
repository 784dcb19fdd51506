/// Postgres page store
///
/// Writes do not publish to the change feed themselves; the `page_changes`
/// NOTIFY trigger and `listener::relay_page_changes` do, so edits made by other
/// processes reach subscribers too.
use chrono::{DateTime, Utc};
use garden_store::{
    ChangeFeed, NewPage, OwnerId, Page, PageContent, PageId, PagePatch, PageStore, SessionContext,
    StoreError, StoreResult,
};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Row of the `pages` table
#[derive(Debug, Clone, FromRow)]
pub struct PageRow {
    pub id: Uuid,
    pub title: String,
    pub content: Option<Value>,
    pub parent_id: Option<Uuid>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Page {
            id: PageId(row.id),
            title: row.title,
            content: row.content.map(PageContent::from),
            parent_id: row.parent_id.map(PageId),
            owner_id: OwnerId::new(row.owner_id),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgPageStore {
    db: PgPool,
    feed: ChangeFeed,
}

impl PgPageStore {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            feed: ChangeFeed::default(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// Unscoped read used by the notification relay.
    pub async fn fetch_by_id(&self, id: PageId) -> StoreResult<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT * FROM pages
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.db)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.map(Page::from))
    }
}

impl PageStore for PgPageStore {
    async fn get(&self, scope: &SessionContext, id: PageId) -> StoreResult<Page> {
        sqlx::query_as::<_, PageRow>(
            r#"
            SELECT * FROM pages
            WHERE id = $1
              AND owner_id = $2
            "#,
        )
        .bind(id.0)
        .bind(scope.owner_id.as_str())
        .fetch_optional(&self.db)
        .await
        .map_err(StoreError::backend)?
        .map(Page::from)
        .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, scope: &SessionContext) -> StoreResult<Vec<Page>> {
        let rows = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT * FROM pages
            WHERE owner_id = $1
            ORDER BY updated_at DESC, id
            "#,
        )
        .bind(scope.owner_id.as_str())
        .fetch_all(&self.db)
        .await
        .map_err(StoreError::backend)?;

        Ok(rows.into_iter().map(Page::from).collect())
    }

    async fn create(&self, scope: &SessionContext, page: NewPage) -> StoreResult<Page> {
        let id = PageId::new_random();
        let parent_id = page.parent_id;

        // nothing is inserted when the parent is missing or owned by someone else
        sqlx::query_as::<_, PageRow>(
            r#"
            INSERT INTO pages (id, title, content, parent_id, owner_id, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, NOW(), NOW()
            WHERE $4::uuid IS NULL
               OR EXISTS (SELECT 1 FROM pages WHERE id = $4 AND owner_id = $5)
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(&page.title)
        .bind(page.content.map(PageContent::into_inner))
        .bind(parent_id.map(|p| p.0))
        .bind(scope.owner_id.as_str())
        .fetch_optional(&self.db)
        .await
        .map_err(StoreError::backend)?
        .map(Page::from)
        .ok_or(StoreError::NotFound(parent_id.unwrap_or(id)))
    }

    async fn update(&self, scope: &SessionContext, id: PageId, patch: PagePatch) -> StoreResult<Page> {
        // updated_at strictly increases per row even when the clock does not
        sqlx::query_as::<_, PageRow>(
            r#"
            UPDATE pages
            SET title = COALESCE($3, title),
                content = CASE WHEN $4 THEN $5 ELSE content END,
                updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1
              AND owner_id = $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(scope.owner_id.as_str())
        .bind(patch.title)
        .bind(patch.content.is_some())
        .bind(patch.content.flatten().map(PageContent::into_inner))
        .fetch_optional(&self.db)
        .await
        .map_err(StoreError::backend)?
        .map(Page::from)
        .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, scope: &SessionContext, id: PageId) -> StoreResult<()> {
        let deleted = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM pages
            WHERE id = $1
              AND owner_id = $2
            RETURNING id
            "#,
        )
        .bind(id.0)
        .bind(scope.owner_id.as_str())
        .fetch_optional(&self.db)
        .await
        .map_err(StoreError::backend)?;

        deleted.map(|_| ()).ok_or(StoreError::NotFound(id))
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}
