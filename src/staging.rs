//! Single-slot holder for the journey currently in progress.
//!
//! The "before" snapshot of a started journey is kept as a JSON document in
//! the data directory until the journey is completed or cancelled. Loading is
//! fail-soft: a corrupt document is removed and reported, never raised.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::Value;
use thiserror::Error;

use crate::models::StagedTrip;
use crate::store::write_atomic;

/// File name of the staged trip document inside the data directory
pub const STAGED_TRIP_FILE: &str = "staged_trip.json";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of looking up the staged trip
#[derive(Debug, Clone, PartialEq)]
pub enum StagedLookup {
    Found(StagedTrip),
    Empty,
    /// The stored document could not be read and has been removed
    Discarded { reason: String },
}

impl StagedLookup {
    pub fn trip(&self) -> Option<&StagedTrip> {
        match self {
            StagedLookup::Found(trip) => Some(trip),
            _ => None,
        }
    }

    pub fn into_trip(self) -> Option<StagedTrip> {
        match self {
            StagedLookup::Found(trip) => Some(trip),
            _ => None,
        }
    }

    /// Warning to show the user, if the stored trip had to be discarded
    pub fn warning(&self) -> Option<String> {
        match self {
            StagedLookup::Discarded { reason } => {
                Some(format!("Error loading journey data: {}", reason))
            }
            _ => None,
        }
    }
}

pub struct StagedTripHolder {
    path: PathBuf,
}

impl StagedTripHolder {
    pub fn new(data_dir: &Path) -> Result<Self, StagingError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(STAGED_TRIP_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `trip`, replacing any previously staged one.
    pub fn stage(&self, trip: &StagedTrip) -> Result<(), StagingError> {
        let json = serde_json::to_vec_pretty(trip)?;
        write_atomic(&self.path, &json)?;
        log::info!(
            "Staged journey starting {} at odometer {} km",
            trip.start_instant(),
            trip.odometer_before
        );
        Ok(())
    }

    /// Load the staged trip, filling missing fields with defaults for now.
    pub fn current(&self) -> Result<StagedLookup, StagingError> {
        self.current_at(chrono::Local::now().naive_local())
    }

    /// Load the staged trip, filling missing fields with defaults for `now`.
    pub fn current_at(&self, now: NaiveDateTime) -> Result<StagedLookup, StagingError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StagedLookup::Empty),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Ok(self.discard(format!("not valid UTF-8: {}", e)));
            }
            Err(e) => return Err(e.into()),
        };

        match merge_with_defaults(&contents, now) {
            Ok(trip) => Ok(StagedLookup::Found(trip)),
            Err(reason) => Ok(self.discard(reason)),
        }
    }

    /// Remove the staged trip. No-op when nothing is staged.
    pub fn clear(&self) -> Result<(), StagingError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("Cleared staged journey");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn discard(&self, reason: String) -> StagedLookup {
        log::warn!("Discarding corrupt staged journey at {:?}: {}", self.path, reason);
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove corrupt staged journey {:?}: {}", self.path, e);
        }
        StagedLookup::Discarded { reason }
    }
}

/// Overlay every key of the stored payload on the default template.
///
/// Payloads written by older versions may lack newer fields; those keep their
/// default values instead of failing the load.
fn merge_with_defaults(contents: &str, now: NaiveDateTime) -> Result<StagedTrip, String> {
    let payload: Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;
    let Value::Object(stored) = payload else {
        return Err("expected a JSON object".to_string());
    };

    let mut merged = match serde_json::to_value(StagedTrip::defaults_at(now)) {
        Ok(Value::Object(defaults)) => defaults,
        Ok(_) => return Err("default template is not an object".to_string()),
        Err(e) => return Err(e.to_string()),
    };
    merged.extend(stored);

    serde_json::from_value(Value::Object(merged)).map_err(|e| e.to_string())
}
