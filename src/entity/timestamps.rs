//! Lifecycle timestamps and their canonical text form.
//!
//! In memory every timestamp is a `DateTime<Utc>`. On disk (and on the wire to the
//! offline queue) they are RFC 3339 UTC strings with millisecond precision, e.g.
//! `2024-03-01T09:30:00.250Z`. Converting text back is strict: anything that is not a
//! full instant is rejected with an error naming the field, except the empty string,
//! which reads as "absent".

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimestampError;

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const DELETED_AT: &str = "deletedAt";

/// Current instant truncated to the precision the canonical text form keeps.
pub fn now() -> DateTime<Utc> {
  Utc::now().trunc_subsecs(3)
}

/// Render an instant in canonical text form.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse canonical text into an instant.
///
/// Returns `Ok(None)` for empty (or all-whitespace) input. Offsets other than `Z` are
/// accepted and normalized to UTC.
pub fn parse_timestamp(
  field: &'static str,
  text: &str,
) -> Result<Option<DateTime<Utc>>, TimestampError> {
  let trimmed = text.trim();
  if trimmed.is_empty() {
    return Ok(None);
  }

  if NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() {
    return Err(TimestampError {
      field,
      value: text.to_string(),
      reason: "date has no time component".to_string(),
    });
  }

  DateTime::parse_from_rfc3339(trimmed)
    .map(|dt| Some(dt.with_timezone(&Utc)))
    .map_err(|e| TimestampError {
      field,
      value: text.to_string(),
      reason: e.to_string(),
    })
}

/// The three lifecycle timestamps every cached entity carries.
///
/// `deleted_at` being `Some` is what makes a record a tombstone; its value only matters
/// for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimestampsText", into = "TimestampsText")]
pub struct Timestamps {
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub deleted_at: Option<DateTime<Utc>>,
}

impl Timestamps {
  /// Timestamps for a record created at `at`.
  pub fn created(at: DateTime<Utc>) -> Self {
    Self {
      created_at: Some(at),
      ..Self::default()
    }
  }

  /// Set `created_at` unless it already has a value.
  pub fn populate_created(&mut self, at: DateTime<Utc>) {
    if self.created_at.is_none() {
      self.created_at = Some(at);
    }
  }

  /// Always overwrite `updated_at`.
  pub fn refresh_updated(&mut self, at: DateTime<Utc>) {
    self.updated_at = Some(at);
  }

  /// Turn the record into a tombstone. Repeating it only re-stamps `deleted_at`;
  /// `created_at` and `updated_at` are kept so later merges can still compare them.
  pub fn mark_tombstone(&mut self, at: DateTime<Utc>) {
    self.deleted_at = Some(at);
  }

  pub fn is_tombstone(&self) -> bool {
    self.deleted_at.is_some()
  }

  /// Build from the persisted text form.
  pub fn from_text(
    created_at: Option<&str>,
    updated_at: Option<&str>,
    deleted_at: Option<&str>,
  ) -> Result<Self, TimestampError> {
    let parse = |field, text: Option<&str>| match text {
      Some(t) => parse_timestamp(field, t),
      None => Ok(None),
    };

    Ok(Self {
      created_at: parse(CREATED_AT, created_at)?,
      updated_at: parse(UPDATED_AT, updated_at)?,
      deleted_at: parse(DELETED_AT, deleted_at)?,
    })
  }
}

/// Serialized shape of [`Timestamps`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimestampsText {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  updated_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  deleted_at: Option<String>,
}

impl TryFrom<TimestampsText> for Timestamps {
  type Error = TimestampError;

  fn try_from(text: TimestampsText) -> Result<Self, Self::Error> {
    Self::from_text(
      text.created_at.as_deref(),
      text.updated_at.as_deref(),
      text.deleted_at.as_deref(),
    )
  }
}

impl From<Timestamps> for TimestampsText {
  fn from(ts: Timestamps) -> Self {
    Self {
      created_at: ts.created_at.map(format_timestamp),
      updated_at: ts.updated_at.map(format_timestamp),
      deleted_at: ts.deleted_at.map(format_timestamp),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_round_trip_keeps_milliseconds() {
    let at = Utc.timestamp_millis_opt(1_709_285_400_250).unwrap();
    let text = format_timestamp(at);
    assert_eq!(text, "2024-03-01T09:30:00.250Z");
    assert_eq!(parse_timestamp(UPDATED_AT, &text).unwrap(), Some(at));
  }

  #[test]
  fn test_empty_string_is_absent() {
    assert_eq!(parse_timestamp(CREATED_AT, "").unwrap(), None);
    assert_eq!(parse_timestamp(CREATED_AT, "   ").unwrap(), None);
  }

  #[test]
  fn test_date_without_time_is_rejected() {
    let err = parse_timestamp(UPDATED_AT, "2024-03-01").unwrap_err();
    assert_eq!(err.field, UPDATED_AT);
    assert!(err.to_string().contains("updatedAt"));
  }

  #[test]
  fn test_malformed_text_names_field() {
    let err = parse_timestamp(DELETED_AT, "yesterday-ish").unwrap_err();
    assert_eq!(err.field, DELETED_AT);
    assert_eq!(err.value, "yesterday-ish");
  }

  #[test]
  fn test_offsets_normalize_to_utc() {
    let parsed = parse_timestamp(CREATED_AT, "2024-03-01T11:30:00.000+02:00")
      .unwrap()
      .unwrap();
    assert_eq!(format_timestamp(parsed), "2024-03-01T09:30:00.000Z");
  }

  #[test]
  fn test_populate_created_never_overwrites() {
    let first = Utc.timestamp_millis_opt(1_000).unwrap();
    let later = Utc.timestamp_millis_opt(2_000).unwrap();
    let mut ts = Timestamps::default();
    ts.populate_created(first);
    ts.populate_created(later);
    assert_eq!(ts.created_at, Some(first));
  }

  #[test]
  fn test_refresh_updated_always_overwrites() {
    let mut ts = Timestamps::created(Utc.timestamp_millis_opt(1_000).unwrap());
    ts.refresh_updated(Utc.timestamp_millis_opt(2_000).unwrap());
    ts.refresh_updated(Utc.timestamp_millis_opt(3_000).unwrap());
    assert_eq!(ts.updated_at, Utc.timestamp_millis_opt(3_000).single());
  }

  #[test]
  fn test_mark_tombstone_keeps_history() {
    let created = Utc.timestamp_millis_opt(1_000).unwrap();
    let updated = Utc.timestamp_millis_opt(2_000).unwrap();
    let mut ts = Timestamps {
      created_at: Some(created),
      updated_at: Some(updated),
      deleted_at: None,
    };

    ts.mark_tombstone(Utc.timestamp_millis_opt(3_000).unwrap());
    ts.mark_tombstone(Utc.timestamp_millis_opt(4_000).unwrap());

    assert!(ts.is_tombstone());
    assert_eq!(ts.created_at, Some(created));
    assert_eq!(ts.updated_at, Some(updated));
    assert_eq!(ts.deleted_at, Utc.timestamp_millis_opt(4_000).single());
  }

  #[test]
  fn test_serde_uses_canonical_text() {
    let ts = Timestamps::created(Utc.timestamp_millis_opt(1_709_285_400_250).unwrap());
    let json = serde_json::to_value(&ts).unwrap();
    assert_eq!(
      json,
      serde_json::json!({ "createdAt": "2024-03-01T09:30:00.250Z" })
    );

    let back: Timestamps = serde_json::from_value(json).unwrap();
    assert_eq!(back, ts);
  }

  #[test]
  fn test_serde_rejects_bad_field() {
    let err = serde_json::from_value::<Timestamps>(serde_json::json!({
      "createdAt": "2024-03-01T09:30:00.000Z",
      "deletedAt": "2024-03-02",
    }))
    .unwrap_err();
    assert!(err.to_string().contains("deletedAt"));
  }

  #[test]
  fn test_empty_deleted_at_is_not_a_tombstone() {
    let ts: Timestamps = serde_json::from_value(serde_json::json!({ "deletedAt": "" })).unwrap();
    assert!(!ts.is_tombstone());
  }
}
