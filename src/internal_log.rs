//! Internal self-diagnostic logging.
//!
//! These macros mirror the `otel_*!` family from the OpenTelemetry Rust SDK:
//! structured events gated behind the `internal-logs` feature and emitted
//! through `tracing`. They are for the crate's own diagnostics, not for
//! application logging.

#![allow(unused_macros)]

/// Logs an informational self-diagnostic event.
#[macro_export]
macro_rules! otel_info {
    (name: $name:expr $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = $name; }
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = ($name, $($value),+); }
        }
    };
}

/// Logs a warning self-diagnostic event.
#[macro_export]
macro_rules! otel_warn {
    (name: $name:expr $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = $name; }
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = ($name, $($value),+); }
        }
    };
}

/// Logs a debug self-diagnostic event.
#[macro_export]
macro_rules! otel_debug {
    (name: $name:expr $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = $name; }
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = ($name, $($value),+); }
        }
    };
}

/// Logs an error self-diagnostic event.
#[macro_export]
macro_rules! otel_error {
    (name: $name:expr $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = $name; }
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        {
            #[cfg(feature = "internal-logs")]
            { tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
            #[cfg(not(feature = "internal-logs"))]
            { let _ = ($name, $($value),+); }
        }
    };
}
