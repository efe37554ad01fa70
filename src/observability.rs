// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Write-only structured-event sinks consumed from external collaborators:
//! [`Logger`], [`Tracer`], [`Meter`]. The crate ships a `tracing`-backed
//! default for the first two since `tracing` is already a hard dependency;
//! no metrics backend is bundled — [`Meter`] is a hook, not a product.
//!
//! Failures in any sink never fail a node.

/// Severity of a [`Logger::log`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured-event sink. Implementations must not fail a node on a
/// logging error; there is no `Result` return for that reason.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]);
}

/// An open span guard. Dropping it ends the span.
///
/// Deliberately not `Send`: `tracing`'s own entered-span guard is
/// thread-affine (entering on one thread and dropping on another would
/// desynchronize the subscriber's span stack), and this trait's default
/// implementation wraps it directly.
pub trait SpanGuard {}

impl SpanGuard for tracing::span::EnteredSpan {}

/// Opens spans for the duration of a scope.
pub trait Tracer: Send + Sync {
    fn span(&self, name: &str) -> Box<dyn SpanGuard>;
}

/// A counter/gauge sink. No concrete backend ships with the core; callers
/// supply their own (Prometheus, OTLP, statsd) behind this trait.
pub trait Meter: Send + Sync {
    fn counter(&self, name: &str, value: u64, tags: &[(&str, &str)]);
}

/// Default [`Logger`] routing through `tracing`'s global dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        let field_str: String = fields
            .iter()
            .map(|(k, v)| format!(" {k}={v}"))
            .collect();
        match level {
            LogLevel::Debug => tracing::debug!("{message}{field_str}"),
            LogLevel::Info => tracing::info!("{message}{field_str}"),
            LogLevel::Warn => tracing::warn!("{message}{field_str}"),
            LogLevel::Error => tracing::error!("{message}{field_str}"),
        }
    }
}

/// Default [`Tracer`] opening `tracing::info_span!` spans.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn span(&self, name: &str) -> Box<dyn SpanGuard> {
        let span = tracing::info_span!("flowcore", name);
        Box::new(span.entered())
    }
}
