//! Query observation hooks.
//!
//! A [`QueryObserver`] is told when each statement starts and ends on a
//! connection, together with non-sensitive connection metadata. Observers are
//! attached through Diesel's per-connection instrumentation, so the timing
//! state lives with the connection that ran the statement.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use diesel::connection::{Instrumentation, InstrumentationEvent};
use tracing::{debug, warn};

/// Where a statement ran. Credentials are never included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMeta {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

/// Receives statement start and end notifications.
///
/// Implementations must not block for long: hooks run inline on the
/// connection. A panicking hook is contained and logged.
pub trait QueryObserver: Send + Sync {
    /// Called before `statement` is sent. The text includes bound values.
    fn on_start(&self, meta: &ConnectionMeta, statement: &str);

    /// Called once the statement has finished, with its failure if any.
    fn on_end(&self, meta: &ConnectionMeta, error: Option<&str>, duration: Duration);
}

/// Observer that emits `tracing` debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingQueryObserver;

impl QueryObserver for TracingQueryObserver {
    fn on_start(&self, meta: &ConnectionMeta, statement: &str) {
        debug!(
            host = %meta.host,
            port = meta.port,
            user = %meta.user,
            database = %meta.database,
            sql = statement,
            "query execution start"
        );
    }

    fn on_end(&self, meta: &ConnectionMeta, error: Option<&str>, duration: Duration) {
        debug!(
            host = %meta.host,
            port = meta.port,
            user = %meta.user,
            database = %meta.database,
            error,
            duration_ms = duration.as_secs_f64() * 1000.0,
            "query execution end"
        );
    }
}

/// Adapts a [`QueryObserver`] to Diesel's connection instrumentation.
pub(crate) struct ObservedConnection {
    observer: Arc<dyn QueryObserver>,
    meta: ConnectionMeta,
    started: Option<Instant>,
}

impl ObservedConnection {
    pub(crate) fn new(observer: Arc<dyn QueryObserver>, meta: ConnectionMeta) -> Self {
        Self {
            observer,
            meta,
            started: None,
        }
    }

    fn query_started(&mut self, statement: &str) {
        self.started = Some(Instant::now());
        contain_panic("on_start", || self.observer.on_start(&self.meta, statement));
    }

    fn query_finished(&mut self, error: Option<&str>) {
        let duration = self
            .started
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        contain_panic("on_end", || self.observer.on_end(&self.meta, error, duration));
    }
}

fn contain_panic(hook: &'static str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(hook, "query observer panicked; statement result unaffected");
    }
}

impl Instrumentation for ObservedConnection {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { query, .. } => {
                self.query_started(&query.to_string());
            }
            InstrumentationEvent::FinishQuery { error, .. } => {
                let message = error.map(ToString::to_string);
                self.query_finished(message.as_deref());
            }
            _ => {}
        }
    }
}
