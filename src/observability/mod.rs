//! Observability for the broker sentinel
//!
//! Structured logging setup and the span macros used around ticks and MQTT operations.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{mqtt_span, tick_span};
