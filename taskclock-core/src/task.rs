//! Task service wire types.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

pub type TaskId = i64;

/// A task as returned by the task service.
///
/// The service spells the configured duration `timer_lenght`; the field keeps
/// that name so the JSON maps one to one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Configured duration in seconds. Older service builds send it as a
    /// string, so both forms are accepted.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub timer_lenght: Option<f64>,
    #[serde(default, alias = "timer_status")]
    pub timer_active: bool,
    #[serde(default, deserialize_with = "service_timestamp")]
    pub timer_start: Option<DateTime<Local>>,
    /// Absolute end of the running countdown.
    #[serde(default, deserialize_with = "service_timestamp")]
    pub timer_stop: Option<DateTime<Local>>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, deserialize_with = "service_timestamp")]
    pub created_at: Option<DateTime<Local>>,
    #[serde(default, deserialize_with = "service_timestamp")]
    pub updated_at: Option<DateTime<Local>>,
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub timer_lenght: u64,
}

/// Body of `PUT /tasks/{id}/`. Unset fields are left untouched by the service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_lenght: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

impl TaskUpdate {
    pub fn completion(is_completed: bool) -> Self {
        Self {
            is_completed: Some(is_completed),
            ..Self::default()
        }
    }

    /// Sets the timer length. `None` if the length in seconds overflows.
    pub fn timer_minutes(minutes: u64) -> Option<Self> {
        Some(Self {
            timer_lenght: Some(minutes_to_seconds(minutes)?),
            ..Self::default()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.timer_lenght.is_none()
            && self.is_completed.is_none()
    }
}

pub fn minutes_to_seconds(minutes: u64) -> Option<u64> {
    minutes.checked_mul(60)
}

/// Response of `GET /auth/status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthStatus {
    pub is_guest: bool,
    #[serde(default)]
    pub user_email: Option<String>,
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Number(n)) => Some(n),
        // Non-numeric text becomes NaN so duration validation rejects it.
        Some(Raw::Text(s)) => Some(s.trim().parse().unwrap_or(f64::NAN)),
    })
}

fn service_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Local>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) => parse_timestamp(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parses an ISO-8601 timestamp. The service stores naive local times, so a
/// timestamp without an offset is read in the local zone.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Local>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| format!("invalid timestamp {s:?}: {e}"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("timestamp {s:?} does not exist in the local zone"))
}
