pub mod constants;
mod poll;
mod timeout;

pub use poll::{Backoff, sleep_or_cancel};
pub use timeout::{validate_interaction_timeout, validate_navigation_timeout};
