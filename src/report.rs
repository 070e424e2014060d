use tracing::Level;

/// Sink for the messages the pipeline emits while it runs.
pub trait Reporter {
    fn report(&self, level: Level, message: &str);
}

/// Forwards reports to the process-wide `tracing` subscriber.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{}", message),
            Level::WARN => tracing::warn!("{}", message),
            Level::INFO => tracing::info!("{}", message),
            Level::DEBUG => tracing::debug!("{}", message),
            _ => tracing::trace!("{}", message),
        }
    }
}
