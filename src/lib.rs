pub mod analytics;
pub mod backup;
pub mod config;
pub mod models;
pub mod prediction;
pub mod staging;
pub mod store;
pub mod workflow;

#[cfg(feature = "web")]
pub mod server;

pub use analytics::{AnalyticsReport, ReportOutcome};
pub use models::*;
pub use prediction::PredictionService;
pub use workflow::{JourneyState, Logbook};
