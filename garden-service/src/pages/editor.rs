/// Mounted editors, one auto-save controller per (owner, page).
///
/// Clients are expected to unmount, but one that just goes away leaves its editor
/// behind; the sweeper tears down editors that have not been touched for
/// `idle_timeout`.
use super::backend::PageBackend;
use garden_store::{AutoSaveController, OwnerId, PageId, SessionContext, StoreResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub type Editor = AutoSaveController<PageBackend>;

type EditorKey = (OwnerId, PageId);

const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

struct Mounted {
    editor: Arc<Editor>,
    touched: Instant,
}

#[derive(Clone)]
pub struct EditorSessions {
    wait: Duration,
    idle_timeout: Duration,
    editors: Arc<Mutex<HashMap<EditorKey, Mounted>>>,
}

impl EditorSessions {
    pub fn new(wait: Duration, idle_timeout: Duration) -> Self {
        Self {
            wait,
            idle_timeout,
            editors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn editors(&self) -> MutexGuard<'_, HashMap<EditorKey, Mounted>> {
        self.editors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the page and mount an editor for it, or return the one already mounted.
    pub async fn mount(
        &self,
        store: Arc<PageBackend>,
        scope: &SessionContext,
        id: PageId,
    ) -> StoreResult<Arc<Editor>> {
        if let Some(editor) = self.get(scope, id) {
            return Ok(editor);
        }

        let editor = Editor::open(store, scope.clone(), id, self.wait).await?;
        tracing::info!(page_id = %id, "editor mounted");

        let key = (scope.owner_id.clone(), id);
        let mut editors = self.editors();
        let mounted = editors.entry(key).or_insert_with(|| Mounted {
            editor: Arc::new(editor),
            touched: Instant::now(),
        });
        mounted.touched = Instant::now();
        Ok(mounted.editor.clone())
    }

    /// The mounted editor, if any. Counts as activity for idle eviction.
    pub fn get(&self, scope: &SessionContext, id: PageId) -> Option<Arc<Editor>> {
        let mut editors = self.editors();
        let mounted = editors.get_mut(&(scope.owner_id.clone(), id))?;
        mounted.touched = Instant::now();
        Some(mounted.editor.clone())
    }

    /// Teardown: the pending edit is discarded and the editor dropped.
    pub fn unmount(&self, scope: &SessionContext, id: PageId) -> bool {
        let removed = self.editors().remove(&(scope.owner_id.clone(), id));
        match removed {
            Some(mounted) => {
                teardown(&mounted.editor, id);
                tracing::info!(page_id = %id, "editor unmounted");
                true
            }
            None => false,
        }
    }

    /// Tear down every editor idle for at least `idle_timeout`; returns how many.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<(EditorKey, Mounted)> = {
            let mut editors = self.editors();
            let idle: Vec<EditorKey> = editors
                .iter()
                .filter(|(_, m)| now.duration_since(m.touched) >= self.idle_timeout)
                .map(|(key, _)| key.clone())
                .collect();
            idle.into_iter()
                .filter_map(|key| editors.remove_entry(&key))
                .collect()
        };

        for ((owner, id), mounted) in &evicted {
            teardown(&mounted.editor, *id);
            tracing::info!(page_id = %id, owner = %owner, "idle editor evicted");
        }
        evicted.len()
    }

    /// Periodically evict idle editors for as long as the runtime lives.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let sessions = self.clone();
        let period = self.idle_timeout.min(MAX_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sessions.evict_idle();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.editors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn teardown(editor: &Editor, id: PageId) {
    if editor.cancel_pending_flush() {
        tracing::debug!(page_id = %id, "pending edit discarded on unmount");
    }
}
