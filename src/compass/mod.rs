//! Client for the Compass (Ellucian Banner) class search API.

pub mod api;
pub mod client;
pub mod errors;
pub mod json;
pub mod models;
pub mod paginate;
pub mod retry;
pub mod session;

pub use api::CompassApi;
pub use client::RetryingClient;
pub use errors::CompassError;
pub use models::*;
pub use paginate::{MAX_PAGE_SIZE, PageRequest, Paginator};
pub use retry::RetryPolicy;
pub use session::TermSession;
