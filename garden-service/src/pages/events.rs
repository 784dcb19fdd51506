/// `GET /api/pages/changes`: the caller's page changes as server-sent events.
///
/// Events are `insert`, `update` and `delete` carrying the change as JSON, and
/// `resync` when changes may have been missed and the client should reload its
/// listing. Events carry no `id`; a reconnecting client reloads instead of
/// resuming.
use crate::context::Ctx;
use axum::{
    Extension,
    extract::State,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use garden_store::{FeedEvent, ForwardChanges, PageStore, SessionContext, Subscription};
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Event stream that owns its feed subscription; dropping the stream (client
/// disconnect) cancels the subscription.
pub struct ChangeStream {
    changes: UnboundedReceiverStream<FeedEvent>,
    _subscription: Subscription,
}

impl ChangeStream {
    pub fn subscribe(ctx: &Ctx, scope: &SessionContext) -> Self {
        let (handler, rx) = ForwardChanges::new(scope);
        let subscription = ctx.pages.changes().subscribe(scope, handler);
        Self {
            changes: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        }
    }
}

pub fn to_event(event: &FeedEvent) -> Result<Event, axum::Error> {
    let sse = Event::default().event(event.kind());
    match event {
        FeedEvent::Change(change) => sse.json_data(change),
        FeedEvent::Resync => sse.json_data(json!({ "type": "resync" })),
    }
}

impl Stream for ChangeStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.changes)
            .poll_next(cx)
            .map(|event| event.map(|e| to_event(&e)))
    }
}

pub async fn page_changes(
    State(ctx): State<Ctx>,
    Extension(scope): Extension<SessionContext>,
) -> Sse<KeepAliveStream<ChangeStream>> {
    tracing::info!(owner = %scope.owner_id, "change stream opened");
    Sse::new(ChangeStream::subscribe(&ctx, &scope)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppConfig;
    use garden_store::NewPage;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn ctx() -> Ctx {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        Ctx::in_memory(config).unwrap()
    }

    #[tokio::test]
    async fn test_stream_receives_own_changes_only() {
        let ctx = ctx();
        let mine = SessionContext::new("sub-1", "ada@example.com");
        let theirs = SessionContext::new("sub-2", "grace@example.com");
        let mut stream = ChangeStream::subscribe(&ctx, &mine);
        assert_eq!(ctx.pages.changes().subscriber_count(), 1);

        ctx.pages.create(&theirs, NewPage::titled("foreign")).await.unwrap();
        ctx.pages.create(&mine, NewPage::titled("own")).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(matches!(next, Some(Ok(_))));

        drop(stream);
        tokio::time::timeout(Duration::from_secs(1), async {
            while ctx.pages.changes().subscriber_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
