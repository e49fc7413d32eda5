//! Portfolio-wide risk controls.

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerConfig, BreakerVerdict, CircuitBreaker, CircuitBreakerState};
