//! Journey workflow.
//!
//! A journey moves through an explicit state machine:
//! ```text
//! NoJourney ──start──▶ Started ──complete/cancel──▶ NoJourney
//!                       │  ▲
//!             begin_edit│  │save_edit/cancel_edit
//!                       ▼  │
//!                 Started { editing }
//! ```
//! `Logbook` owns the trip store, the staged-trip holder and the current
//! state. Every operation holds the state lock for its whole duration, so
//! operations never interleave.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use crate::analytics::{self, AnalyticsRecord, ReportOutcome};
use crate::backup::{self, BackupError, RestoreSummary};
use crate::models::{
    validate_trips, AfterReadings, StagedTrip, StartReadings, TripRecord, ValidationError,
    DEFAULT_TEMPERATURE_C,
};
use crate::staging::{StagedLookup, StagedTripHolder, StagingError};
use crate::store::{self, StoreError, TripStore};

/// Battery percentage suggested for a journey's end, below the start value
const SUGGESTED_BATTERY_DROP: i32 = 10;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Journey data not found! Please start a new journey.")]
    MissingStagedTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum JourneyState {
    NoJourney,
    Started { editing: bool },
}

impl JourneyState {
    fn describe(self) -> &'static str {
        match self {
            JourneyState::NoJourney => "no journey is in progress",
            JourneyState::Started { editing: false } => "a journey is in progress",
            JourneyState::Started { editing: true } => "editing the journey start",
        }
    }
}

/// Current state plus the staged trip, as shown on the tracking screen
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyStatus {
    pub state: JourneyState,
    pub staged: Option<StagedTrip>,
    pub warning: Option<String>,
}

/// Prefilled values for the "start journey" form
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDefaults {
    pub battery: i32,
    pub range: i32,
    pub odometer: i64,
    pub temperature: i32,
}

impl StartDefaults {
    /// Continue from where the last recorded journey ended.
    pub fn from_last_trip(last: Option<&TripRecord>) -> Self {
        match last {
            Some(trip) => Self {
                battery: trip.battery_after,
                range: trip.range_after,
                odometer: trip.odometer_after,
                temperature: DEFAULT_TEMPERATURE_C,
            },
            None => Self {
                battery: 100,
                range: 0,
                odometer: 0,
                temperature: DEFAULT_TEMPERATURE_C,
            },
        }
    }
}

/// Suggested "after" readings for completing `staged`.
pub fn completion_defaults(staged: &StagedTrip) -> AfterReadings {
    let planned = staged.planned_distance_km;
    AfterReadings {
        battery: staged.battery_before.saturating_sub(SUGGESTED_BATTERY_DROP).max(0),
        range: (f64::from(staged.range_before) - planned).max(0.0) as i32,
        odometer: (staged.odometer_before as f64 + planned) as i64,
        temperature: staged.temperature_before,
    }
}

pub struct Logbook {
    data_dir: PathBuf,
    store: TripStore,
    holder: StagedTripHolder,
    state: Mutex<JourneyState>,
}

impl Logbook {
    /// Open the logbook in `data_dir`, resuming a journey left in progress.
    pub fn open(data_dir: &Path) -> Result<Self, WorkflowError> {
        let store = TripStore::new(data_dir)?;
        let holder = StagedTripHolder::new(data_dir)?;

        let state = match holder.current()? {
            StagedLookup::Found(trip) => {
                log::info!("Resuming journey started {}", trip.start_instant());
                JourneyState::Started { editing: false }
            }
            StagedLookup::Empty | StagedLookup::Discarded { .. } => JourneyState::NoJourney,
        };

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            store,
            holder,
            state: Mutex::new(state),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn lock(&self) -> MutexGuard<'_, JourneyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> JourneyState {
        *self.lock()
    }

    /// Current state with the staged trip, reconciling with the holder.
    ///
    /// If a journey was started but its staged data is gone or corrupt,
    /// the workflow falls back to `NoJourney` and reports a warning.
    pub fn status(&self) -> Result<JourneyStatus, WorkflowError> {
        let mut state = self.lock();
        let lookup = self.holder.current()?;
        let warning = lookup.warning();
        let staged = lookup.into_trip();

        match (*state, &staged) {
            (JourneyState::NoJourney, Some(_)) => {
                *state = JourneyState::Started { editing: false };
            }
            (JourneyState::Started { .. }, None) => {
                log::warn!("Journey in progress but no staged data found; resetting");
                *state = JourneyState::NoJourney;
            }
            _ => {}
        }

        Ok(JourneyStatus {
            state: *state,
            staged,
            warning,
        })
    }

    pub fn start_defaults(&self) -> Result<StartDefaults, WorkflowError> {
        let last = self.store.last()?;
        Ok(StartDefaults::from_last_trip(last.as_ref()))
    }

    /// Suggested "after" readings for the journey in progress.
    pub fn completion_defaults(&self) -> Result<AfterReadings, WorkflowError> {
        let state = self.lock();
        let staged = self.require_staged(*state, "suggest completion values")?;
        Ok(completion_defaults(&staged))
    }

    pub fn start(&self, readings: &StartReadings) -> Result<StagedTrip, WorkflowError> {
        self.start_at(readings, chrono::Local::now().naive_local())
    }

    pub fn start_at(&self, readings: &StartReadings, now: NaiveDateTime) -> Result<StagedTrip, WorkflowError> {
        let mut state = self.lock();
        if *state != JourneyState::NoJourney {
            return Err(invalid("start a journey", *state));
        }
        readings.validate()?;

        let staged = StagedTrip::from_readings(readings, now);
        self.holder.stage(&staged)?;
        *state = JourneyState::Started { editing: false };
        Ok(staged)
    }

    pub fn begin_edit(&self) -> Result<(), WorkflowError> {
        self.set_editing(true, "edit start values")
    }

    pub fn cancel_edit(&self) -> Result<(), WorkflowError> {
        self.set_editing(false, "cancel editing")
    }

    fn set_editing(&self, editing: bool, action: &'static str) -> Result<(), WorkflowError> {
        let mut state = self.lock();
        match *state {
            JourneyState::Started { .. } => {
                *state = JourneyState::Started { editing };
                Ok(())
            }
            JourneyState::NoJourney => Err(invalid(action, *state)),
        }
    }

    /// Replace the start values of the journey in progress.
    pub fn save_edit(&self, readings: &StartReadings) -> Result<StagedTrip, WorkflowError> {
        let mut state = self.lock();
        if *state != (JourneyState::Started { editing: true }) {
            return Err(invalid("save start values", *state));
        }
        readings.validate()?;

        let mut staged = match self.require_staged(*state, "save start values") {
            Err(WorkflowError::MissingStagedTrip) => {
                *state = JourneyState::NoJourney;
                return Err(WorkflowError::MissingStagedTrip);
            }
            other => other?,
        };
        staged.apply_readings(readings);
        self.holder.stage(&staged)?;
        *state = JourneyState::Started { editing: false };
        log::info!("Start values updated");
        Ok(staged)
    }

    pub fn complete(&self, after: &AfterReadings) -> Result<TripRecord, WorkflowError> {
        self.complete_at(after, chrono::Local::now().naive_local())
    }

    /// Merge the staged trip with `after`, store it and clear the holder.
    pub fn complete_at(&self, after: &AfterReadings, now: NaiveDateTime) -> Result<TripRecord, WorkflowError> {
        let mut state = self.lock();
        let staged = match self.require_staged(*state, "complete a journey") {
            Err(WorkflowError::MissingStagedTrip) => {
                *state = JourneyState::NoJourney;
                return Err(WorkflowError::MissingStagedTrip);
            }
            other => other?,
        };

        let trip = staged.complete(after, now);
        trip.validate()?;

        let count = self.store.append(trip.clone())?;
        self.holder.clear()?;
        *state = JourneyState::NoJourney;
        log::info!(
            "Journey completed: {} km, {}% battery ({} trips recorded)",
            trip.odometer_after - trip.odometer_before,
            trip.battery_before - trip.battery_after,
            count
        );
        Ok(trip)
    }

    /// Abandon the journey in progress without recording it.
    pub fn cancel(&self) -> Result<(), WorkflowError> {
        let mut state = self.lock();
        if *state == JourneyState::NoJourney {
            return Err(invalid("cancel a journey", *state));
        }
        self.holder.clear()?;
        *state = JourneyState::NoJourney;
        log::info!("Journey cancelled");
        Ok(())
    }

    fn require_staged(&self, state: JourneyState, action: &'static str) -> Result<StagedTrip, WorkflowError> {
        if state == JourneyState::NoJourney {
            return Err(invalid(action, state));
        }
        self.holder
            .current()?
            .into_trip()
            .ok_or(WorkflowError::MissingStagedTrip)
    }

    // ------------------------------------------------------------------------
    // Trip history
    // ------------------------------------------------------------------------

    pub fn trips(&self) -> Result<Vec<TripRecord>, WorkflowError> {
        let _state = self.lock();
        Ok(self.store.load()?)
    }

    /// Replace the whole history with an edited table after validating it.
    pub fn replace_trips(&self, records: &[TripRecord]) -> Result<(), WorkflowError> {
        let _state = self.lock();
        validate_trips(records)?;
        self.store.save(records)?;
        Ok(())
    }

    pub fn export_csv(&self) -> Result<String, WorkflowError> {
        let trips = self.trips()?;
        Ok(store::export_csv(&trips)?)
    }

    pub fn analytics(&self) -> Result<ReportOutcome, WorkflowError> {
        let trips = self.trips()?;
        Ok(analytics::report(&trips))
    }

    /// Valid trips with derived metrics, e.g. for model training
    pub fn analytics_records(&self) -> Result<Vec<AnalyticsRecord>, WorkflowError> {
        let trips = self.trips()?;
        Ok(analytics::derive(&trips))
    }

    // ------------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------------

    pub fn export_backup(&self, models_dir: &Path, dest: &Path) -> Result<(), WorkflowError> {
        let _state = self.lock();
        backup::export_backup(&self.data_dir, models_dir, dest)?;
        Ok(())
    }

    /// Replace the logbook with the contents of a backup archive.
    ///
    /// The journey state follows the restored staged trip.
    pub fn restore_backup(&self, src: &Path, models_dir: &Path) -> Result<RestoreSummary, WorkflowError> {
        let mut state = self.lock();
        let summary = backup::import_backup(src, &self.data_dir, models_dir)?;
        *state = match self.holder.current()? {
            StagedLookup::Found(_) => JourneyState::Started { editing: false },
            _ => JourneyState::NoJourney,
        };
        Ok(summary)
    }
}

fn invalid(action: &'static str, state: JourneyState) -> WorkflowError {
    WorkflowError::InvalidTransition {
        action,
        state: state.describe(),
    }
}
