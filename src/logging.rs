//! Logging and tracing infrastructure for binforge.
//!
//! Diagnostics go through the `tracing` crate. A process-wide switch gates
//! every event the crate emits: the `log_*!` and `span_trace!` macros check
//! it before doing anything, so a disabled process sees no output from
//! parsing, mutation or serialization. The switch starts enabled and can be
//! flipped at any time, from any thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[doc(hidden)]
pub use tracing as __tracing;

static INIT: Once = Once::new();
static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn diagnostic output on.
pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Turn diagnostic output off for the whole process.
pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Initialize the global tracing subscriber.
///
/// This should be called once at program startup.
/// Subsequent calls are ignored.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        // A host process may already own the global subscriber.
        if tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
            && is_enabled()
        {
            info!("binforge tracing initialized");
        }
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        if tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
            && is_enabled()
        {
            info!("binforge tracing initialized (JSON mode)");
        }
    });
}

/// Debug-level event, emitted only while logging is enabled.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => {
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::debug!($($arg)+);
        }
    };
}

/// Info-level event, emitted only while logging is enabled.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => {
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::info!($($arg)+);
        }
    };
}

/// Warn-level event, emitted only while logging is enabled.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => {
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::warn!($($arg)+);
        }
    };
}

/// Macro for logging and returning errors
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::error!(error = %e, "Operation failed");
        }
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::error!(error = %e, message = $msg, "Operation failed");
        }
        e
    }};
}

/// Span that collapses to `Span::none()` while logging is disabled.
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::info_span!($name)
        } else {
            $crate::logging::__tracing::Span::none()
        }
    };
    ($name:expr, $($field:tt)*) => {
        if $crate::logging::is_enabled() {
            $crate::logging::__tracing::info_span!($name, $($field)*)
        } else {
            $crate::logging::__tracing::Span::none()
        }
    };
}
