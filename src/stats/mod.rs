pub mod api;
pub mod models;
pub mod store;

pub use api::{LookupError, RankClient};
pub use models::*;
pub use store::{StatsError, StatsStore};
