//! Campaign Module - Scheduling, lifecycle and management

pub mod manager;
pub mod schedule;
pub mod state;

pub use manager::{CampaignEdit, CampaignError, CampaignManager, NewCampaign, SubmittedCampaign};
pub use schedule::{ScheduleDecision, ScheduleRequest, ScheduleValidator, SchedulingError};
pub use state::{next_status, CampaignEvent, CampaignStateMachine, InvalidTransition, TransitionError};
