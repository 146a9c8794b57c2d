//! Destinations for error reports

use extmux_core::ErrorReport;
use tracing::error;

/// Receives every rejected or failed call, plus error reports sent by peers.
///
/// Reports arrive already masked.
pub trait ErrorSink: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

impl<F> ErrorSink for F
where
    F: Fn(&ErrorReport) + Send + Sync,
{
    fn report(&self, report: &ErrorReport) {
        self(report)
    }
}

/// Writes reports to the tracing pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, report: &ErrorReport) {
        error!(tenant_id = %report.tenant_id, "extension error: {}", report.error);
    }
}
