/// Relays the `page_changes` NOTIFY channel into the page store's change feed.
///
/// Payloads only carry the id and owner (NOTIFY payloads are size-limited); inserts
/// and updates are re-read before publishing. Notifications sent while the listener
/// is disconnected are lost, so every (re)connect resyncs the feed.
use crate::pages::PgPageStore;
use anyhow::{Context, Result};
use garden_store::{OwnerId, PageChange, PageId, PageStore};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const PAGE_CHANNEL: &str = "page_changes";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub id: PageId,
    pub owner_id: OwnerId,
}

pub fn parse_notification(payload: &str) -> Result<PageNotification> {
    serde_json::from_str(payload).context("Malformed page notification")
}

async fn resolve(store: &PgPageStore, notification: PageNotification) -> Result<Option<PageChange>> {
    let PageNotification { kind, id, owner_id } = notification;
    if kind == ChangeKind::Delete {
        return Ok(Some(PageChange::Delete { id, owner_id }));
    }

    // a row deleted before we got to read it is reported by its own DELETE
    let Some(page) = store.fetch_by_id(id).await? else {
        return Ok(None);
    };
    Ok(Some(match kind {
        ChangeKind::Insert => PageChange::Insert(page),
        _ => PageChange::Update(page),
    }))
}

pub async fn relay_page_changes(store: &PgPageStore) -> Result<()> {
    let mut listener = PgListener::connect_with(store.pool())
        .await
        .context("Failed to connect page change listener")?;
    listener
        .listen(PAGE_CHANNEL)
        .await
        .context("Failed to LISTEN on page changes")?;
    tracing::info!("Listening for page changes on '{}'", PAGE_CHANNEL);
    store.changes().resync();

    loop {
        // `None`: the connection dropped and was re-established
        let Some(notification) = listener
            .try_recv()
            .await
            .context("Page change listener failed")?
        else {
            tracing::warn!("page change listener reconnected; notifications may have been missed");
            store.changes().resync();
            continue;
        };

        let parsed = match parse_notification(notification.payload()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("ignoring page notification: {:#}", e);
                continue;
            }
        };

        match resolve(store, parsed).await {
            Ok(Some(change)) => {
                store.changes().publish(change);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to resolve page notification: {:#}", e),
        }
    }
}

/// Keep the relay running, reconnecting after failures.
pub fn spawn_relay(store: PgPageStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = relay_page_changes(&store).await {
                tracing::error!("page change relay stopped: {:#}", e);
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_payload() {
        let id = PageId::new_random();
        let payload = format!(r#"{{"type": "delete", "id": "{}", "owner_id": "sub-1"}}"#, id);

        assert_eq!(
            parse_notification(&payload).unwrap(),
            PageNotification {
                kind: ChangeKind::Delete,
                id,
                owner_id: OwnerId::new("sub-1"),
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_notification("not json").is_err());
        assert!(parse_notification(r#"{"type": "truncate", "id": "x", "owner_id": "y"}"#).is_err());
    }
}
