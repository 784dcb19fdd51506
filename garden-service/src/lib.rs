pub mod auth;
pub mod context;
pub mod error;
pub mod listener;
pub mod pages;
pub mod routes;
pub mod schema;

pub use context::{AppConfig, Ctx};
pub use error::AppError;
