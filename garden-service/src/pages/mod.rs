pub mod backend;
pub mod db;
pub mod editor;
pub mod events;
pub mod handlers;

pub use backend::PageBackend;
pub use db::PgPageStore;
pub use editor::EditorSessions;
