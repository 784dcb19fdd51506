/// Database schema, applied at startup on the postgres backend.
use anyhow::{Context, Result};
use sqlx::PgPool;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    id          UUID PRIMARY KEY,
    title       TEXT NOT NULL DEFAULT '',
    content     JSONB,
    parent_id   UUID REFERENCES pages (id) ON DELETE SET NULL,
    owner_id    TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS pages_owner_updated_idx
    ON pages (owner_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS whitelist (
    email       TEXT PRIMARY KEY,
    allowed     BOOLEAN NOT NULL DEFAULT TRUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE OR REPLACE FUNCTION notify_page_change() RETURNS trigger AS $$
DECLARE
    changed pages%ROWTYPE;
BEGIN
    IF TG_OP = 'DELETE' THEN
        changed := OLD;
    ELSE
        changed := NEW;
    END IF;

    PERFORM pg_notify(
        'page_changes',
        json_build_object(
            'type', lower(TG_OP),
            'id', changed.id,
            'owner_id', changed.owner_id
        )::text
    );
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS pages_notify ON pages;
CREATE TRIGGER pages_notify
    AFTER INSERT OR UPDATE OR DELETE ON pages
    FOR EACH ROW EXECUTE FUNCTION notify_page_change();
"#;

pub async fn migrate(db: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(db)
        .await
        .context("Failed to apply database schema")?;
    tracing::info!("Database schema is up to date");
    Ok(())
}
