//! Dispatch Module - Recipient delivery, analytics and the scheduler worker

mod analytics;
mod dispatcher;
mod transport;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use analytics::AnalyticsAggregator;
pub use dispatcher::{ConfigurationError, DispatchError, DispatchReport, DispatchSettings, Dispatcher};
pub use transport::{DeliveryError, OutgoingEmail, SessionError, SmtpTransport, Transport, TransportSession};
pub use worker::{DispatchRun, ScheduledDispatchWorker};
