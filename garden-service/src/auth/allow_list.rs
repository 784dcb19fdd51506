/// Allow-list consulted after the identity provider vouches for an email.
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum AllowList {
    /// Fixed set of lowercase emails.
    Static(Arc<HashSet<String>>),
    /// `whitelist` table
    Postgres(PgPool),
}

impl AllowList {
    pub fn from_emails<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Static(Arc::new(
            emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .collect(),
        ))
    }

    /// Email comparison is case-insensitive.
    pub async fn is_allowed(&self, email: &str) -> Result<bool> {
        match self {
            AllowList::Static(emails) => Ok(emails.contains(&email.trim().to_lowercase())),
            AllowList::Postgres(db) => {
                let allowed = sqlx::query_scalar::<_, bool>(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM whitelist
                        WHERE lower(email) = lower($1)
                          AND allowed = TRUE
                    )
                    "#,
                )
                .bind(email.trim())
                .fetch_one(db)
                .await
                .context("Failed to check allow-list")?;

                Ok(allowed)
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AllowList::Static(_) => "static",
            AllowList::Postgres(_) => "postgres",
        }
    }
}
