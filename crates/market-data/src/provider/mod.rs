//! Rate provider abstraction and concrete implementation.

mod traits;

pub mod rate_api;

pub use traits::{RateLimit, RateProvider};
