//! Backup and restore of the logbook data.
//!
//! A backup is a gzip-compressed tar archive laid out as:
//! ```text
//! backup.tar.gz
//! ├── trips.csv
//! ├── staged_trip.json      # only while a journey is in progress
//! └── models/
//!     ├── actual_time_drive_model.json
//!     └── battery_usage_model.json
//! ```
//! Only `trips.csv` is mandatory. Restoring replaces the current files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::models::{validate_trips, ValidationError};
use crate::prediction::{BATTERY_MODEL_FILE, TIME_MODEL_FILE};
use crate::staging::STAGED_TRIP_FILE;
use crate::store::{read_csv, write_atomic, StoreError, TRIPS_FILE};

const MODELS_ENTRY: &str = "models";
const MODEL_FILES: [&str; 2] = [TIME_MODEL_FILE, BATTERY_MODEL_FILE];

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid backup file: {0}")]
    Invalid(String),

    #[error("Invalid trip table in backup: {0}")]
    Trips(#[from] StoreError),

    #[error("Invalid trip in backup: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub trips_restored: usize,
    pub staged_trip: bool,
    pub models: Vec<String>,
}

/// Pack the trip table, the staged trip and the model artifacts into `dest`.
pub fn export_backup(data_dir: &Path, models_dir: &Path, dest: &Path) -> Result<(), BackupError> {
    let start = std::time::Instant::now();
    log::info!("Starting backup to {:?}", dest);

    let dest_file = fs::File::create(dest)?;
    let gz = flate2::write::GzEncoder::new(dest_file, flate2::Compression::default());
    let mut tar = tar::Builder::new(gz);

    let trips_path = data_dir.join(TRIPS_FILE);
    if trips_path.exists() {
        tar.append_path_with_name(&trips_path, TRIPS_FILE)?;
    } else {
        // an empty logbook still produces a restorable archive
        let mut header = Vec::new();
        crate::store::write_csv(&[], &mut header)?;
        let mut entry = tar::Header::new_gnu();
        entry.set_size(header.len() as u64);
        entry.set_mode(0o644);
        entry.set_cksum();
        tar.append_data(&mut entry, TRIPS_FILE, header.as_slice())?;
    }

    let staged_path = data_dir.join(STAGED_TRIP_FILE);
    if staged_path.exists() {
        tar.append_path_with_name(&staged_path, STAGED_TRIP_FILE)?;
    }

    for name in MODEL_FILES {
        let model_path = models_dir.join(name);
        if model_path.exists() {
            tar.append_path_with_name(&model_path, format!("{}/{}", MODELS_ENTRY, name))?;
        }
    }

    tar.into_inner()?.finish()?;

    log::info!(
        "Backup completed in {:.1}ms → {:?}",
        start.elapsed().as_secs_f64() * 1000.0,
        dest
    );
    Ok(())
}

/// Restore a backup created by `export_backup`, replacing the current data.
///
/// The archive is unpacked and every trip is range-checked before anything
/// in `data_dir` is touched. A staged trip absent from the archive is cleared.
pub fn import_backup(src: &Path, data_dir: &Path, models_dir: &Path) -> Result<RestoreSummary, BackupError> {
    let start = std::time::Instant::now();
    log::info!("Starting restore from {:?}", src);

    let temp_dir = ScratchDir::new()?;
    let file = fs::File::open(src)?;
    let gz = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(gz);
    archive
        .unpack(temp_dir.path())
        .map_err(|e| BackupError::Invalid(format!("failed to extract archive: {}", e)))?;

    let trips_path = temp_dir.path().join(TRIPS_FILE);
    if !trips_path.exists() {
        return Err(BackupError::Invalid(format!("missing {}", TRIPS_FILE)));
    }
    let trips_bytes = fs::read(&trips_path)?;
    let trips = read_csv(trips_bytes.as_slice())?;
    validate_trips(&trips)?;
    let trips_restored = trips.len();

    fs::create_dir_all(data_dir)?;
    write_atomic(&data_dir.join(TRIPS_FILE), &trips_bytes)?;

    let staged_path = temp_dir.path().join(STAGED_TRIP_FILE);
    let staged_trip = staged_path.exists();
    if staged_trip {
        write_atomic(&data_dir.join(STAGED_TRIP_FILE), &fs::read(&staged_path)?)?;
    } else {
        match fs::remove_file(data_dir.join(STAGED_TRIP_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut models = Vec::new();
    for name in MODEL_FILES {
        let model_path = temp_dir.path().join(MODELS_ENTRY).join(name);
        if model_path.exists() {
            fs::create_dir_all(models_dir)?;
            write_atomic(&models_dir.join(name), &fs::read(&model_path)?)?;
            models.push(name.to_string());
        }
    }

    log::info!(
        "Restored {} trips ({} models) in {:.1}ms",
        trips_restored,
        models.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(RestoreSummary {
        trips_restored,
        staged_trip,
        models,
    })
}

/// Temporary directory removed on drop
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new() -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!("ev-trip-logbook-restore-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}
