//! Mailcast Core - Campaign scheduling and dispatch
//!
//! This crate validates campaign schedules, drives the campaign state
//! machine and delivers campaigns to their recipients over SMTP while
//! keeping per-campaign delivery analytics.

pub mod campaign;
pub mod dispatch;

pub use campaign::{CampaignError, CampaignEvent, CampaignManager, ScheduleValidator, SchedulingError};
pub use dispatch::{
    AnalyticsAggregator, ConfigurationError, DispatchError, DispatchReport, DispatchSettings,
    Dispatcher, ScheduledDispatchWorker, SmtpTransport, Transport,
};
