pub mod logging;

pub use logging::RateLimiter;
