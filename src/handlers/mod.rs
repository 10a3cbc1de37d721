pub mod endpoints;
pub mod health;
pub mod query;

pub use endpoints::endpoints_handler;
pub use health::{health_handler, ready_handler};
pub use query::query_handler;
