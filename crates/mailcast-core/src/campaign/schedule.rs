//! Schedule Validator - Resolves a requested send time into a UTC instant

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use mailcast_common::config::SchedulingConfig;
use mailcast_storage::models::{CampaignStatus, ScheduleType};
use thiserror::Error;
use tracing::warn;

/// Naive local forms accepted after RFC 3339 fails. `%.f` also matches an
/// absent fraction.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Schedule validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("a scheduled campaign requires a send date and time")]
    MissingDatetime,

    #[error("could not parse send time '{0}'")]
    InvalidDatetime(String),

    #[error("local time {local} does not exist in {timezone}")]
    NonexistentLocalTime { local: String, timezone: String },

    #[error("campaign must be scheduled at least {} in the future", minutes_label(.min_lead_minutes))]
    TooSoon {
        min_lead_minutes: i64,
        requested: DateTime<Utc>,
    },
}

fn minutes_label(minutes: &i64) -> String {
    if *minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{} minutes", minutes)
    }
}

/// What the validator decided for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Send right away
    Immediate,
    /// Send at the given instant
    At(DateTime<Utc>),
    /// Keep as a draft
    Draft,
}

impl ScheduleDecision {
    /// Status and stored instant for a campaign taking this decision at `now`.
    /// Immediate sends are stored as due right now and dispatched at once.
    pub fn placement(&self, now: DateTime<Utc>) -> (CampaignStatus, Option<DateTime<Utc>>) {
        match self {
            ScheduleDecision::Immediate => (CampaignStatus::Scheduled, Some(now)),
            ScheduleDecision::At(at) => (CampaignStatus::Scheduled, Some(*at)),
            ScheduleDecision::Draft => (CampaignStatus::Draft, None),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, ScheduleDecision::Immediate)
    }
}

/// A schedule as submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub schedule_type: ScheduleType,
    pub datetime: Option<String>,
    pub timezone: Option<String>,
}

impl ScheduleRequest {
    pub fn now() -> Self {
        Self {
            schedule_type: ScheduleType::Now,
            datetime: None,
            timezone: None,
        }
    }

    pub fn draft() -> Self {
        Self {
            schedule_type: ScheduleType::Draft,
            datetime: None,
            timezone: None,
        }
    }

    pub fn later(datetime: impl Into<String>, timezone: Option<&str>) -> Self {
        Self {
            schedule_type: ScheduleType::Later,
            datetime: Some(datetime.into()),
            timezone: timezone.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Zone {
    Utc,
    Named(Tz),
}

/// Validates requested schedules against the clock and the tz database
#[derive(Debug, Clone)]
pub struct ScheduleValidator {
    min_lead_time: Duration,
    default_zone: Zone,
}

impl Default for ScheduleValidator {
    fn default() -> Self {
        Self::from_config(&SchedulingConfig::default())
    }
}

impl ScheduleValidator {
    pub fn new(min_lead_time: Duration) -> Self {
        Self {
            min_lead_time,
            default_zone: Zone::Utc,
        }
    }

    pub fn from_config(config: &SchedulingConfig) -> Self {
        let min_lead_time =
            Duration::from_std(config.min_lead_time()).unwrap_or_else(|_| Duration::seconds(60));
        Self {
            min_lead_time,
            default_zone: resolve_zone(Some(&config.default_timezone), Zone::Utc),
        }
    }

    pub fn min_lead_time(&self) -> Duration {
        self.min_lead_time
    }

    /// Validate a request against the current time
    pub fn validate(
        &self,
        datetime: Option<&str>,
        timezone: Option<&str>,
        schedule_type: ScheduleType,
    ) -> Result<ScheduleDecision, SchedulingError> {
        self.validate_at(datetime, timezone, schedule_type, Utc::now())
    }

    pub fn validate_request(
        &self,
        request: &ScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<ScheduleDecision, SchedulingError> {
        self.validate_at(
            request.datetime.as_deref(),
            request.timezone.as_deref(),
            request.schedule_type,
            now,
        )
    }

    /// Validate a request against a caller-supplied clock
    pub fn validate_at(
        &self,
        datetime: Option<&str>,
        timezone: Option<&str>,
        schedule_type: ScheduleType,
        now: DateTime<Utc>,
    ) -> Result<ScheduleDecision, SchedulingError> {
        match schedule_type {
            ScheduleType::Draft => Ok(ScheduleDecision::Draft),
            ScheduleType::Now => Ok(ScheduleDecision::Immediate),
            ScheduleType::Later => {
                let raw = datetime
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(SchedulingError::MissingDatetime)?;

                let zone = resolve_zone(timezone, self.default_zone);
                let at = parse_instant(raw, zone)?;

                let earliest = now.checked_add_signed(self.min_lead_time);
                if earliest.map_or(true, |earliest| at < earliest) {
                    return Err(SchedulingError::TooSoon {
                        min_lead_minutes: lead_minutes(self.min_lead_time),
                        requested: at,
                    });
                }

                Ok(ScheduleDecision::At(at))
            }
        }
    }
}

/// Lead time in whole minutes, rounded up
fn lead_minutes(lead: Duration) -> i64 {
    let secs = lead.num_seconds().max(0);
    (secs + 59) / 60
}

fn resolve_zone(timezone: Option<&str>, fallback: Zone) -> Zone {
    let Some(name) = timezone.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback;
    };
    if name.eq_ignore_ascii_case("utc") {
        return Zone::Utc;
    }

    match name
        .parse::<Tz>()
        .ok()
        .or_else(|| Tz::from_str_insensitive(name).ok())
    {
        Some(tz) => Zone::Named(tz),
        None => {
            warn!(timezone = %name, "Unknown timezone, interpreting send time as UTC");
            Zone::Utc
        }
    }
}

fn parse_instant(raw: &str, zone: Zone) -> Result<DateTime<Utc>, SchedulingError> {
    // An explicit offset is absolute, whatever zone was requested
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| SchedulingError::InvalidDatetime(raw.to_string()))?;

    match zone {
        Zone::Utc => Ok(Utc.from_utc_datetime(&naive)),
        Zone::Named(tz) => match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(SchedulingError::NonexistentLocalTime {
                local: raw.to_string(),
                timezone: tz.name().to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn validator() -> ScheduleValidator {
        ScheduleValidator::new(Duration::seconds(60))
    }

    fn later(raw: &str, tz: Option<&str>) -> Result<ScheduleDecision, SchedulingError> {
        validator().validate_at(Some(raw), tz, ScheduleType::Later, now())
    }

    #[test]
    fn test_lead_time_boundary() {
        let soon = (now() + Duration::seconds(30)).to_rfc3339();
        let err = later(&soon, None).unwrap_err();
        assert!(matches!(err, SchedulingError::TooSoon { .. }));
        assert_eq!(
            err.to_string(),
            "campaign must be scheduled at least 1 minute in the future"
        );

        let fine = now() + Duration::seconds(120);
        assert_eq!(
            later(&fine.to_rfc3339(), None).unwrap(),
            ScheduleDecision::At(fine)
        );

        let exact = now() + Duration::seconds(60);
        assert_eq!(
            later(&exact.to_rfc3339(), None).unwrap(),
            ScheduleDecision::At(exact)
        );
    }

    #[test]
    fn test_lead_time_message_rounds_up() {
        let validator = ScheduleValidator::new(Duration::seconds(300));
        let err = validator
            .validate_at(
                Some("2024-01-15T12:01:00Z"),
                None,
                ScheduleType::Later,
                now(),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "campaign must be scheduled at least 5 minutes in the future"
        );
    }

    #[test]
    fn test_now_and_draft_ignore_datetime() {
        let v = validator();
        assert_eq!(
            v.validate_at(Some("garbage"), Some("Nowhere/City"), ScheduleType::Draft, now())
                .unwrap(),
            ScheduleDecision::Draft
        );
        assert_eq!(
            v.validate_at(Some("2000-01-01T00:00:00Z"), None, ScheduleType::Now, now())
                .unwrap(),
            ScheduleDecision::Immediate
        );
    }

    #[test]
    fn test_later_requires_datetime() {
        let v = validator();
        assert_eq!(
            v.validate_at(None, None, ScheduleType::Later, now()),
            Err(SchedulingError::MissingDatetime)
        );
        assert_eq!(
            v.validate_at(Some("  "), None, ScheduleType::Later, now()),
            Err(SchedulingError::MissingDatetime)
        );
        assert_eq!(
            later("next tuesday", None),
            Err(SchedulingError::InvalidDatetime("next tuesday".to_string()))
        );
    }

    #[test]
    fn test_local_time_in_named_zone() {
        // EDT is UTC-4 in July
        let expected = Utc.with_ymd_and_hms(2024, 7, 1, 13, 0, 0).unwrap();
        assert_eq!(
            later("2024-07-01T09:00", Some("America/New_York")).unwrap(),
            ScheduleDecision::At(expected)
        );
        assert_eq!(
            later("2024-07-01 09:00:00", Some("America/New_York")).unwrap(),
            ScheduleDecision::At(expected)
        );

        // JST has no DST
        assert_eq!(
            later("2024-07-01T09:00:00.000", Some("Asia/Tokyo")).unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_explicit_offset_wins_over_zone() {
        assert_eq!(
            later("2024-07-01T09:00:00+02:00", Some("America/New_York")).unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 7, 1, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_unknown_zone_degrades_to_utc() {
        assert_eq!(
            later("2024-07-01T09:00", Some("Mars/Olympus_Mons")).unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(
            later("2024-07-01T09:00", Some("utc")).unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_zone_names_ignore_case() {
        assert_eq!(
            later("2024-07-01T09:00", Some("america/new_york")).unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 7, 1, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_lead_time_beyond_the_calendar_rejects() {
        let validator = ScheduleValidator::new(Duration::seconds(100_000_000_000_000));
        let err = validator
            .validate_at(
                Some("2030-01-01T00:00:00Z"),
                None,
                ScheduleType::Later,
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, SchedulingError::TooSoon { .. }));
    }

    #[test]
    fn test_dst_transitions() {
        // 02:30 is skipped on 2024-03-10 in New York
        assert!(matches!(
            later("2024-03-10T02:30", Some("America/New_York")),
            Err(SchedulingError::NonexistentLocalTime { .. })
        ));

        // 01:30 occurs twice on 2024-11-03; the EDT reading comes first
        assert_eq!(
            later("2024-11-03T01:30", Some("America/New_York")).unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_default_zone_from_config() {
        let config = SchedulingConfig {
            min_lead_time_secs: 60,
            default_timezone: "Europe/Berlin".to_string(),
        };
        let v = ScheduleValidator::from_config(&config);
        // CEST is UTC+2 in July
        assert_eq!(
            v.validate_at(Some("2024-07-01T09:00"), None, ScheduleType::Later, now())
                .unwrap(),
            ScheduleDecision::At(Utc.with_ymd_and_hms(2024, 7, 1, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_placement() {
        let at = now() + Duration::hours(1);
        assert_eq!(
            ScheduleDecision::Immediate.placement(now()),
            (CampaignStatus::Scheduled, Some(now()))
        );
        assert_eq!(
            ScheduleDecision::At(at).placement(now()),
            (CampaignStatus::Scheduled, Some(at))
        );
        assert_eq!(
            ScheduleDecision::Draft.placement(now()),
            (CampaignStatus::Draft, None)
        );
    }
}
