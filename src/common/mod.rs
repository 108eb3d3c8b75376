pub mod http;
pub mod logger;
pub mod types;

pub use http::*;
pub use types::*;
