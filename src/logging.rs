//! Logging for the alert pipeline.
//!
//! Every record is emitted under the `event_alerts` target. What each level carries:
//!
//! * `error`: filter installation given up, receipt fetches and marker pairing failures (with the
//!   transaction hash), sends dropped from an outbound channel.
//! * `warn`: logs outside the watched event set, clipped or requeued outbound messages.
//! * `info`: poller and dispatcher start/stop, filter recreation, provider failover.
//! * `debug` and `trace`: per-cycle counts, filter ids, retry delays.
//!
//! Without the `tracing` feature the macros expand to nothing but still borrow their field
//! values, so the same bindings are used with and without logging.

#[cfg(feature = "tracing")]
macro_rules! log_at {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "event_alerts", $($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_at {
    ($level:ident, $($arg:tt)*) => {
        $crate::__log_consume!($($arg)*)
    };
}

#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => { log_at!(error, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => { log_at!(warn, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => { log_at!(info, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => { log_at!(debug, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => { log_at!(trace, $($arg)*) };
}

#[doc(hidden)]
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! __log_consume {
    ($field:ident = % $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__log_consume!($($rest)*); }
    };
    ($field:ident = ? $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__log_consume!($($rest)*); }
    };
    ($field:ident = $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__log_consume!($($rest)*); }
    };
    ($message:literal, $($arg:expr),+ $(,)?) => {
        { $(let _ = &$arg;)+ }
    };
    ($message:literal) => {};
    () => {};
}
