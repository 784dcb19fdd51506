//! Core of the garden: the page model, the scoped page store, the change feed and
//! the editor-side auto-save machinery. Transport-agnostic; the HTTP surface lives
//! in `garden-service`.
pub mod autosave;
pub mod changes;
pub mod debounce;
pub mod error;
pub mod listing;
pub mod models;
pub mod store;

pub use autosave::{AutoSaveController, SaveStatus};
pub use changes::{
    Callbacks, ChangeFeed, ChangeHandler, FeedEvent, ForwardChanges, PageChange, Subscription,
};
pub use debounce::{Coalesce, DEFAULT_DEBOUNCE, Debouncer};
pub use error::{StoreError, StoreResult};
pub use listing::{PageList, SharedPageList};
pub use models::{NewPage, OwnerId, Page, PageContent, PageId, PagePatch, SessionContext, UNTITLED};
pub use store::{MemoryPageStore, PageStore, sort_for_listing};

use std::sync::{Mutex, MutexGuard, PoisonError};

// A panicking callback must not wedge every later caller.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
