//! Trip table persistence.
//!
//! Completed trips live in a single CSV file inside the data directory:
//! ```text
//! {data_dir}/
//! └── trips.csv        # one row per completed journey
//! ```
//! Every save rewrites the whole file through a temporary sibling that is
//! renamed into place, so readers never observe a half-written table.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::TripRecord;

/// File name of the trip table inside the data directory
pub const TRIPS_FILE: &str = "trips.csv";

/// Column order of the trip table; matches the field order of `TripRecord`.
pub const TRIP_COLUMNS: [&str; 14] = [
    "planned_distance_km",
    "planned_duration_min",
    "battery_before",
    "battery_after",
    "range_before",
    "range_after",
    "odometer_before",
    "odometer_after",
    "temperature_before",
    "temperature_after",
    "start_date",
    "start_time",
    "end_date",
    "end_time",
];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed trip table: {0}")]
    Malformed(String),
}

/// CSV-backed store of completed trips, in insertion order.
pub struct TripStore {
    path: PathBuf,
}

impl TripStore {
    /// Open the store in `data_dir`, creating the directory if needed.
    ///
    /// The CSV file itself is only created on the first save.
    pub fn new(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(TRIPS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every stored trip. A missing file is an empty table.
    pub fn load(&self) -> Result<Vec<TripRecord>, StoreError> {
        let start = std::time::Instant::now();
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No trip table at {:?} yet", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let records = read_csv(file)?;
        log::debug!(
            "Loaded {} trips from {:?} in {:.1}ms",
            records.len(),
            self.path,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(records)
    }

    /// Replace the whole table with `records`.
    pub fn save(&self, records: &[TripRecord]) -> Result<(), StoreError> {
        let mut buffer = Vec::new();
        write_csv(records, &mut buffer)?;
        write_atomic(&self.path, &buffer)?;
        log::info!("Saved {} trips to {:?}", records.len(), self.path);
        Ok(())
    }

    /// Append one trip by rewriting the table. Returns the new trip count.
    pub fn append(&self, record: TripRecord) -> Result<usize, StoreError> {
        let mut records = self.load()?;
        records.push(record);
        self.save(&records)?;
        Ok(records.len())
    }

    /// The most recently stored trip, if any.
    pub fn last(&self) -> Result<Option<TripRecord>, StoreError> {
        Ok(self.load()?.pop())
    }
}

/// Write `records` as CSV with the fixed header row, even when empty.
pub fn write_csv<W: Write>(records: &[TripRecord], writer: W) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(TRIP_COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse a trip table. Columns are matched by header name.
pub fn read_csv<R: io::Read>(reader: R) -> Result<Vec<TripRecord>, StoreError> {
    let mut reader = csv::Reader::from_reader(reader);

    let headers = reader.headers()?.clone();
    if !headers.is_empty() {
        if let Some(missing) = TRIP_COLUMNS
            .iter()
            .find(|column| !headers.iter().any(|h| h.trim() == **column))
        {
            return Err(StoreError::Malformed(format!("missing column '{}'", missing)));
        }
    }

    reader
        .deserialize::<TripRecord>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)
}

/// Render `records` in the trip table format, e.g. for a download.
pub fn export_csv(records: &[TripRecord]) -> Result<String, StoreError> {
    let mut buffer = Vec::new();
    write_csv(records, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Write `contents` to `path` via a temporary sibling file and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data");
    let temp_path = path.with_file_name(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
