//! Data models for the EV Trip Logbook.
//!
//! `TripRecord` and `StagedTrip` are persisted (CSV and JSON respectively)
//! and keep their field names as column/key names everywhere, including the
//! REST API. Request payloads coming from the frontend use camelCase.
//! Derived analytics types live in [`crate::analytics`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for a planned (map-estimated) trip distance in km
pub const MAX_PLANNED_DISTANCE_KM: f64 = 1000.0;
/// Upper bound for a planned (map-estimated) trip duration in minutes
pub const MAX_PLANNED_DURATION_MIN: f64 = 300.0;
pub const MAX_BATTERY_PERCENT: i32 = 100;
pub const MAX_RANGE_KM: i32 = 1000;
pub const MAX_ODOMETER_KM: i64 = 1_000_000;
pub const MIN_TEMPERATURE_C: i32 = -50;
pub const MAX_TEMPERATURE_C: i32 = 60;
/// Temperature assumed when no reading is available
pub const DEFAULT_TEMPERATURE_C: i32 = 20;

/// Serde adapter for wall-clock times stored as `HH:MM`.
///
/// Seconds are only written when non-zero so values round-trip exactly.
/// Both `HH:MM` and `HH:MM:SS` are accepted when reading.
pub mod hhmm {
    use chrono::{NaiveTime, Timelike};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if time.second() == 0 && time.nanosecond() == 0 {
            time.format("%H:%M").to_string()
        } else {
            time.format("%H:%M:%S%.f").to_string()
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text)
            .ok_or_else(|| de::Error::custom(format!("invalid time '{}', expected HH:MM", text)))
    }

    /// Parse `HH:MM` or `HH:MM:SS[.fff]`
    pub fn parse(text: &str) -> Option<NaiveTime> {
        let text = text.trim();
        NaiveTime::parse_from_str(text, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S%.f"))
            .ok()
    }
}

/// Drop seconds and sub-seconds; journey timestamps are recorded per minute.
pub fn truncate_to_minute(instant: NaiveDateTime) -> NaiveDateTime {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

/// One completed journey, as stored in the trip table.
///
/// Field order is the column order of the CSV file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub planned_distance_km: f64,
    pub planned_duration_min: f64,
    pub battery_before: i32,
    pub battery_after: i32,
    pub range_before: i32,
    pub range_after: i32,
    pub odometer_before: i64,
    pub odometer_after: i64,
    pub temperature_before: i32,
    pub temperature_after: i32,
    pub start_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub end_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

impl TripRecord {
    pub fn start_instant(&self) -> NaiveDateTime {
        self.start_date.and_time(self.start_time)
    }

    pub fn end_instant(&self) -> NaiveDateTime {
        self.end_date.and_time(self.end_time)
    }

    /// Check every field against the limits accepted from user input.
    ///
    /// Odometer ordering and timestamps are not checked here; records that
    /// violate them are excluded by the analytics filter.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_planned(self.planned_distance_km, self.planned_duration_min)?;
        check_int("battery_before", self.battery_before.into(), 0, MAX_BATTERY_PERCENT.into())?;
        check_int("battery_after", self.battery_after.into(), 0, MAX_BATTERY_PERCENT.into())?;
        check_int("range_before", self.range_before.into(), 0, MAX_RANGE_KM.into())?;
        check_int("range_after", self.range_after.into(), 0, MAX_RANGE_KM.into())?;
        check_int("odometer_before", self.odometer_before, 0, MAX_ODOMETER_KM)?;
        check_int("odometer_after", self.odometer_after, 0, MAX_ODOMETER_KM)?;
        check_temperature("temperature_before", self.temperature_before)?;
        check_temperature("temperature_after", self.temperature_after)?;
        Ok(())
    }
}

/// The "before" half of a journey that has been started but not completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTrip {
    pub planned_distance_km: f64,
    pub planned_duration_min: f64,
    pub battery_before: i32,
    pub range_before: i32,
    pub odometer_before: i64,
    pub temperature_before: i32,
    pub start_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
}

impl StagedTrip {
    /// The template every stored payload is overlaid on when loading.
    pub fn defaults_at(now: NaiveDateTime) -> Self {
        let now = truncate_to_minute(now);
        Self {
            planned_distance_km: 0.0,
            planned_duration_min: 0.0,
            battery_before: 0,
            range_before: 0,
            odometer_before: 0,
            temperature_before: DEFAULT_TEMPERATURE_C,
            start_date: now.date(),
            start_time: now.time(),
        }
    }

    pub fn from_readings(readings: &StartReadings, now: NaiveDateTime) -> Self {
        let mut staged = Self::defaults_at(now);
        staged.apply_readings(readings);
        staged
    }

    /// Replace the editable start values, keeping the recorded start time.
    pub fn apply_readings(&mut self, readings: &StartReadings) {
        self.planned_distance_km = readings.planned_distance_km;
        self.planned_duration_min = readings.planned_duration_min;
        self.battery_before = readings.battery;
        self.range_before = readings.range;
        self.odometer_before = readings.odometer;
        self.temperature_before = readings.temperature;
    }

    /// Merge with the "after" readings into a completed trip ending at `now`.
    pub fn complete(&self, after: &AfterReadings, now: NaiveDateTime) -> TripRecord {
        let now = truncate_to_minute(now);
        TripRecord {
            planned_distance_km: self.planned_distance_km,
            planned_duration_min: self.planned_duration_min,
            battery_before: self.battery_before,
            battery_after: after.battery,
            range_before: self.range_before,
            range_after: after.range,
            odometer_before: self.odometer_before,
            odometer_after: after.odometer,
            temperature_before: self.temperature_before,
            temperature_after: after.temperature,
            start_date: self.start_date,
            start_time: self.start_time,
            end_date: now.date(),
            end_time: now.time(),
        }
    }

    pub fn start_instant(&self) -> NaiveDateTime {
        self.start_date.and_time(self.start_time)
    }
}

/// Vehicle readings entered when starting a journey (or editing its start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReadings {
    pub planned_distance_km: f64,
    pub planned_duration_min: f64,
    pub battery: i32,
    pub range: i32,
    pub odometer: i64,
    pub temperature: i32,
}

impl StartReadings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_planned(self.planned_distance_km, self.planned_duration_min)?;
        check_int("battery", self.battery.into(), 0, MAX_BATTERY_PERCENT.into())?;
        check_int("range", self.range.into(), 0, MAX_RANGE_KM.into())?;
        check_int("odometer", self.odometer, 0, MAX_ODOMETER_KM)?;
        check_temperature("temperature", self.temperature)
    }
}

/// Vehicle readings entered when completing a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterReadings {
    pub battery: i32,
    pub range: i32,
    pub odometer: i64,
    pub temperature: i32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("Row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

/// Validate a whole table, reporting the first offending row (0-based).
pub fn validate_trips(records: &[TripRecord]) -> Result<(), ValidationError> {
    for (row, record) in records.iter().enumerate() {
        record.validate().map_err(|e| ValidationError::Row {
            row,
            source: Box::new(e),
        })?;
    }
    Ok(())
}

fn check_planned(distance_km: f64, duration_min: f64) -> Result<(), ValidationError> {
    check_float("planned_distance_km", distance_km, 0.0, MAX_PLANNED_DISTANCE_KM)?;
    check_float("planned_duration_min", duration_min, 0.0, MAX_PLANNED_DURATION_MIN)
}

fn check_float(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange { field, value, min, max });
    }
    Ok(())
}

fn check_int(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

fn check_temperature(field: &'static str, value: i32) -> Result<(), ValidationError> {
    check_int(field, value.into(), MIN_TEMPERATURE_C.into(), MAX_TEMPERATURE_C.into())
}
