/// Trailing-edge debounce as an explicit state machine.
///
/// State is `{pending, timer}`. `schedule` merges the payload into the pending one and
/// re-arms the timer; when the timer survives a full quiet interval the pending
/// payload is handed to the sink. `cancel` disarms and discards.
use crate::lock;
use crate::models::PagePatch;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Merge a newer payload into an older pending one.
pub trait Coalesce {
    fn coalesce(&mut self, newer: Self);
}

impl Coalesce for PagePatch {
    fn coalesce(&mut self, newer: Self) {
        if newer.title.is_some() {
            self.title = newer.title;
        }
        if newer.content.is_some() {
            self.content = newer.content;
        }
    }
}

struct DebounceState<P> {
    pending: Option<P>,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    // bumped on every re-arm/cancel so a timer that already woke up can tell it is stale
    generation: u64,
}

type Sink<P> = Arc<dyn Fn(P) + Send + Sync>;

pub struct Debouncer<P> {
    wait: Duration,
    state: Arc<Mutex<DebounceState<P>>>,
    sink: Sink<P>,
}

impl<P: Coalesce + Send + 'static> Debouncer<P> {
    pub fn new(wait: Duration, sink: impl Fn(P) + Send + Sync + 'static) -> Self {
        Self {
            wait,
            state: Arc::new(Mutex::new(DebounceState {
                pending: None,
                timer: None,
                deadline: None,
                generation: 0,
            })),
            sink: Arc::new(sink),
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Merge `payload` into the pending payload and restart the quiet interval.
    pub fn schedule(&self, payload: P) {
        let mut state = lock(&self.state);

        match state.pending.as_mut() {
            Some(pending) => pending.coalesce(payload),
            None => state.pending = Some(payload),
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.deadline = Some(Instant::now() + self.wait);

        let generation = state.generation;
        let shared = self.state.clone();
        let sink = self.sink.clone();
        let wait = self.wait;

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            let due = {
                let mut state = lock(&shared);
                if state.generation != generation {
                    return;
                }
                state.timer = None;
                state.deadline = None;
                state.pending.take()
            };

            if let Some(payload) = due {
                sink(payload);
            }
        }));
    }

    /// Disarm the timer and discard the pending payload, returning it.
    pub fn cancel(&self) -> Option<P> {
        let mut state = lock(&self.state);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.deadline = None;
        state.pending.take()
    }

    /// Fire the pending payload now instead of waiting out the interval.
    pub fn fire_now(&self) -> bool {
        match self.cancel() {
            Some(payload) => {
                (self.sink)(payload);
                true
            }
            None => false,
        }
    }

    /// Time left until the pending payload fires, if one is scheduled.
    pub fn fires_after(&self) -> Option<Duration> {
        lock(&self.state)
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }
}

impl<P> Drop for Debouncer<P> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Latest(&'static str);

    impl Coalesce for Latest {
        fn coalesce(&mut self, newer: Self) {
            *self = newer;
        }
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let drift = actual.abs_diff(expected);
        assert!(drift <= Duration::from_millis(5), "{actual:?} vs {expected:?}");
    }

    fn recorder() -> (Arc<Mutex<Vec<(Latest, Instant)>>>, Debouncer<Latest>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let debouncer = Debouncer::new(DEFAULT_DEBOUNCE, move |p| {
            sink.lock().unwrap().push((p, Instant::now()));
        });
        (fired, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_with_last_payload() {
        let (fired, debouncer) = recorder();

        for word in ["H", "He", "Hel", "Hell", "Hello"] {
            debouncer.schedule(Latest(word));
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        let last_edit = Instant::now() - Duration::from_millis(40);

        tokio::time::sleep(Duration::from_millis(1200)).await;

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, Latest("Hello"));
        assert_close(fired[0].1 - last_edit, DEFAULT_DEBOUNCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_input_never_fires() {
        let (fired, debouncer) = recorder();

        for _ in 0..30 {
            debouncer.schedule(Latest("x"));
            tokio::time::sleep(Duration::from_millis(900)).await;
        }

        assert!(fired.lock().unwrap().is_empty());
        assert!(debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_interval_fires_nothing() {
        let (fired, debouncer) = recorder();

        debouncer.schedule(Latest("draft"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(debouncer.cancel(), Some(Latest("draft")));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert_eq!(debouncer.fires_after(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_tracks_rearm() {
        let (_fired, debouncer) = recorder();
        assert_eq!(debouncer.fires_after(), None);

        debouncer.schedule(Latest("a"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_close(debouncer.fires_after().unwrap(), Duration::from_millis(600));

        debouncer.schedule(Latest("b"));
        assert_close(debouncer.fires_after().unwrap(), DEFAULT_DEBOUNCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (fired, debouncer) = recorder();

        debouncer.schedule(Latest("one"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        debouncer.schedule(Latest("two"));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let payloads: Vec<Latest> = fired.lock().unwrap().iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(payloads, vec![Latest("one"), Latest("two")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_disarms_timer() {
        let (fired, debouncer) = recorder();
        debouncer.schedule(Latest("orphan"));
        drop(debouncer);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_patch_coalesces_by_field() {
        let mut pending = PagePatch::title("first");
        pending.coalesce(PagePatch::content(crate::models::PageContent::plain_text("body")));
        pending.coalesce(PagePatch::title("second"));

        assert_eq!(pending.title.as_deref(), Some("second"));
        assert_eq!(
            pending
                .content
                .as_ref()
                .and_then(Option::as_ref)
                .and_then(|c| c.as_plain_text()),
            Some("body")
        );
    }
}
