//! Shared utilities for the Veil wallet.

pub mod ids;
pub mod logging;
pub mod time;

pub use ids::random_id;
pub use logging::init_tracing;
pub use time::{format_duration, now_millis};
