//! Trip analytics.
//!
//! Turns the stored trip table into per-trip efficiency metrics and the
//! aggregate report shown on the analytics dashboard. Everything here is a
//! pure function of the input records; nothing is cached or persisted.
//!
//! A trip only contributes to analytics when it used battery, covered
//! distance and took time. Anything else is dropped, never repaired.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::TripRecord;

/// Fallback time accuracy when the actual duration is not positive
pub const FALLBACK_TIME_ACCURACY_PCT: f64 = 100.0;

// ============================================================================
// CATEGORICAL BANDS
// ============================================================================

/// Average-temperature band of a trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TemperatureBand {
    #[serde(rename = "Below 0°C")]
    BelowZero,
    #[serde(rename = "0-10°C")]
    ZeroToTen,
    #[serde(rename = "10-20°C")]
    TenToTwenty,
    #[serde(rename = "20-30°C")]
    TwentyToThirty,
    #[serde(rename = "Above 30°C")]
    AboveThirty,
}

/// Inclusive upper bound of each band, in ascending order.
/// Values above the last bound fall into `AboveThirty`.
const TEMPERATURE_BOUNDS: [(f64, TemperatureBand); 4] = [
    (0.0, TemperatureBand::BelowZero),
    (10.0, TemperatureBand::ZeroToTen),
    (20.0, TemperatureBand::TenToTwenty),
    (30.0, TemperatureBand::TwentyToThirty),
];

impl TemperatureBand {
    pub const ALL: [TemperatureBand; 5] = [
        TemperatureBand::BelowZero,
        TemperatureBand::ZeroToTen,
        TemperatureBand::TenToTwenty,
        TemperatureBand::TwentyToThirty,
        TemperatureBand::AboveThirty,
    ];

    pub fn classify(avg_temperature: f64) -> Self {
        classify(&TEMPERATURE_BOUNDS, TemperatureBand::AboveThirty, avg_temperature)
    }

    pub fn label(self) -> &'static str {
        match self {
            TemperatureBand::BelowZero => "Below 0°C",
            TemperatureBand::ZeroToTen => "0-10°C",
            TemperatureBand::TenToTwenty => "10-20°C",
            TemperatureBand::TwentyToThirty => "20-30°C",
            TemperatureBand::AboveThirty => "Above 30°C",
        }
    }
}

/// How the actual drive time compared with the estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeEfficiencyBand {
    #[serde(rename = "Very Slow")]
    VerySlow,
    #[serde(rename = "Slower")]
    Slower,
    #[serde(rename = "On Time")]
    OnTime,
    #[serde(rename = "Faster")]
    Faster,
    #[serde(rename = "Very Fast")]
    VeryFast,
}

/// Inclusive upper bound (time accuracy %) of each band, ascending.
const TIME_EFFICIENCY_BOUNDS: [(f64, TimeEfficiencyBand); 4] = [
    (80.0, TimeEfficiencyBand::VerySlow),
    (90.0, TimeEfficiencyBand::Slower),
    (110.0, TimeEfficiencyBand::OnTime),
    (120.0, TimeEfficiencyBand::Faster),
];

impl TimeEfficiencyBand {
    pub fn classify(time_accuracy_pct: f64) -> Self {
        classify(&TIME_EFFICIENCY_BOUNDS, TimeEfficiencyBand::VeryFast, time_accuracy_pct)
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeEfficiencyBand::VerySlow => "Very Slow",
            TimeEfficiencyBand::Slower => "Slower",
            TimeEfficiencyBand::OnTime => "On Time",
            TimeEfficiencyBand::Faster => "Faster",
            TimeEfficiencyBand::VeryFast => "Very Fast",
        }
    }
}

/// First band whose inclusive upper bound holds `value`, else `overflow`.
/// NaN compares false against every bound and lands in `overflow`.
fn classify<B: Copy>(bounds: &[(f64, B)], overflow: B, value: f64) -> B {
    bounds
        .iter()
        .find(|(upper, _)| value <= *upper)
        .map(|(_, band)| *band)
        .unwrap_or(overflow)
}

// ============================================================================
// PER-TRIP DERIVATION
// ============================================================================

/// Quantities derivable from any trip, valid or not
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripMetrics {
    pub actual_distance: i64,
    pub battery_used: i32,
    pub avg_temperature: f64,
    pub actual_duration_min: f64,
    /// Actual minus planned duration, in minutes
    pub time_difference: f64,
}

impl TripMetrics {
    /// Stored rows are not range-checked on load, so differences saturate.
    pub fn derive(trip: &TripRecord) -> Self {
        let elapsed = trip.end_instant() - trip.start_instant();
        let actual_duration_min = elapsed.num_milliseconds() as f64 / 60_000.0;

        Self {
            actual_distance: trip.odometer_after.saturating_sub(trip.odometer_before),
            battery_used: trip.battery_before.saturating_sub(trip.battery_after),
            avg_temperature: (f64::from(trip.temperature_before) + f64::from(trip.temperature_after)) / 2.0,
            actual_duration_min,
            time_difference: actual_duration_min - trip.planned_duration_min,
        }
    }

    /// Battery used, distance covered and time elapsed are all positive.
    pub fn is_valid(&self) -> bool {
        self.battery_used > 0 && self.actual_distance > 0 && self.actual_duration_min > 0.0
    }

    pub fn hours(&self) -> f64 {
        self.actual_duration_min / 60.0
    }
}

/// Planned duration as a percentage of the actual duration.
///
/// Falls back to 100 when the actual duration is not positive, so it can be
/// shown for trips that never reach the analytics set.
pub fn time_accuracy_pct(planned_duration_min: f64, actual_duration_min: f64) -> f64 {
    if actual_duration_min > 0.0 {
        planned_duration_min / actual_duration_min * 100.0
    } else {
        FALLBACK_TIME_ACCURACY_PCT
    }
}

/// A trip that passed the validity filter, with all derived fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub trip: TripRecord,
    pub actual_distance: i64,
    pub battery_used: i32,
    pub avg_temperature: f64,
    pub actual_duration_min: f64,
    pub time_difference: f64,
    pub average_speed_kmh: f64,
    /// Kilometres travelled per 1% of battery
    pub km_per_battery_pct: f64,
    pub km_per_hour: f64,
    pub battery_per_hour: f64,
    pub temperature_band: TemperatureBand,
    pub time_accuracy_pct: f64,
    pub time_efficiency_band: TimeEfficiencyBand,
}

impl AnalyticsRecord {
    /// Derive the analytics record for `trip`, or `None` if it is filtered out.
    pub fn from_trip(trip: &TripRecord) -> Option<Self> {
        let metrics = TripMetrics::derive(trip);
        if !metrics.is_valid() {
            return None;
        }

        let distance = metrics.actual_distance as f64;
        let hours = metrics.hours();
        let speed = distance / hours;
        let time_accuracy = time_accuracy_pct(trip.planned_duration_min, metrics.actual_duration_min);

        Some(Self {
            trip: trip.clone(),
            actual_distance: metrics.actual_distance,
            battery_used: metrics.battery_used,
            avg_temperature: metrics.avg_temperature,
            actual_duration_min: metrics.actual_duration_min,
            time_difference: metrics.time_difference,
            average_speed_kmh: speed,
            km_per_battery_pct: distance / f64::from(metrics.battery_used),
            km_per_hour: speed,
            battery_per_hour: f64::from(metrics.battery_used) / hours,
            temperature_band: TemperatureBand::classify(metrics.avg_temperature),
            time_accuracy_pct: time_accuracy,
            time_efficiency_band: TimeEfficiencyBand::classify(time_accuracy),
        })
    }
}

/// Derive analytics records for every valid trip, preserving order.
pub fn derive(trips: &[TripRecord]) -> Vec<AnalyticsRecord> {
    let records: Vec<AnalyticsRecord> = trips.iter().filter_map(AnalyticsRecord::from_trip).collect();
    if records.len() < trips.len() {
        log::debug!(
            "Excluded {} of {} trips from analytics (no battery use, distance or duration)",
            trips.len() - records.len(),
            trips.len()
        );
    }
    records
}

// ============================================================================
// AGGREGATES
// ============================================================================

/// Headline battery efficiency
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyOverview {
    pub mean_km_per_battery_pct: f64,
    /// Sample standard deviation; absent with a single trip
    pub std_dev_km_per_battery_pct: Option<f64>,
    /// Range from 100% to 0% at the mean efficiency
    pub theoretical_range_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureBandStats {
    pub band: TemperatureBand,
    pub mean_km_per_battery_pct: f64,
    pub min_km_per_battery_pct: f64,
    pub max_km_per_battery_pct: f64,
    pub trip_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyEfficiency {
    pub date: NaiveDate,
    pub km_per_battery_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Improving,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub direction: TrendDirection,
    /// Second-half mean relative to first-half mean, in percent
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyTrend {
    /// Mean efficiency per start date, oldest first
    pub daily: Vec<DailyEfficiency>,
    pub recent_km_per_battery_pct: f64,
    /// Most recent day relative to the mean of all days, in percent
    pub recent_vs_average_pct: f64,
    /// Only available with at least two distinct dates
    pub trend: Option<TrendSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyPoint {
    pub date: NaiveDate,
    pub time_accuracy_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAnalysis {
    pub mean_time_accuracy_pct: f64,
    pub mean_average_speed_kmh: f64,
    pub accuracy_series: Vec<AccuracyPoint>,
}

/// Everything the analytics dashboard displays
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub trip_count: usize,
    pub excluded_count: usize,
    pub overview: EfficiencyOverview,
    pub trend: EfficiencyTrend,
    pub temperature: Vec<TemperatureBandStats>,
    pub time: TimeAnalysis,
    /// Pearson correlation of distance and battery used
    pub distance_battery_correlation: Option<f64>,
    pub records: Vec<AnalyticsRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReportOutcome {
    NoTrips,
    NoValidTrips { excluded_count: usize },
    Ready { report: Box<AnalyticsReport> },
}

impl ReportOutcome {
    /// Explanation to show instead of the dashboard, if there is nothing to show
    pub fn message(&self) -> Option<&'static str> {
        match self {
            ReportOutcome::NoTrips => Some("No journey data available for analytics yet."),
            ReportOutcome::NoValidTrips { .. } => Some(
                "No valid journey data available for analysis. Please ensure journeys are \
                 recorded with proper battery and distance measurements.",
            ),
            ReportOutcome::Ready { .. } => None,
        }
    }
}

/// Build the analytics report for the full trip table.
pub fn report(trips: &[TripRecord]) -> ReportOutcome {
    if trips.is_empty() {
        return ReportOutcome::NoTrips;
    }

    let start = std::time::Instant::now();
    let records = derive(trips);
    let excluded_count = trips.len() - records.len();

    let Some(report) = build_report(records, excluded_count) else {
        return ReportOutcome::NoValidTrips { excluded_count };
    };

    log::debug!(
        "Built analytics report for {} trips in {:.1}ms",
        report.trip_count,
        start.elapsed().as_secs_f64() * 1000.0
    );
    ReportOutcome::Ready {
        report: Box::new(report),
    }
}

/// Aggregate a non-empty analytics set. Returns `None` for an empty one.
pub fn build_report(records: Vec<AnalyticsRecord>, excluded_count: usize) -> Option<AnalyticsReport> {
    let efficiency: Vec<f64> = records.iter().map(|r| r.km_per_battery_pct).collect();
    let mean_efficiency = mean(&efficiency)?;

    let overview = EfficiencyOverview {
        mean_km_per_battery_pct: mean_efficiency,
        std_dev_km_per_battery_pct: sample_std_dev(&efficiency),
        theoretical_range_km: mean_efficiency * 100.0,
    };

    let trend = efficiency_trend(&records)?;
    let temperature = temperature_breakdown(&records);

    let accuracies: Vec<f64> = records.iter().map(|r| r.time_accuracy_pct).collect();
    let speeds: Vec<f64> = records.iter().map(|r| r.average_speed_kmh).collect();
    let time = TimeAnalysis {
        mean_time_accuracy_pct: mean(&accuracies)?,
        mean_average_speed_kmh: mean(&speeds)?,
        accuracy_series: records
            .iter()
            .map(|r| AccuracyPoint {
                date: r.trip.start_date,
                time_accuracy_pct: r.time_accuracy_pct,
            })
            .collect(),
    };

    let distances: Vec<f64> = records.iter().map(|r| r.actual_distance as f64).collect();
    let battery: Vec<f64> = records.iter().map(|r| f64::from(r.battery_used)).collect();

    Some(AnalyticsReport {
        trip_count: records.len(),
        excluded_count,
        overview,
        trend,
        temperature,
        time,
        distance_battery_correlation: pearson(&distances, &battery),
        records,
    })
}

/// Efficiency statistics per temperature band, in band order.
/// Bands without trips are omitted.
pub fn temperature_breakdown(records: &[AnalyticsRecord]) -> Vec<TemperatureBandStats> {
    let mut groups: BTreeMap<TemperatureBand, Vec<f64>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.temperature_band)
            .or_default()
            .push(record.km_per_battery_pct);
    }

    groups
        .into_iter()
        .filter_map(|(band, values)| {
            Some(TemperatureBandStats {
                band,
                mean_km_per_battery_pct: mean(&values)?,
                min_km_per_battery_pct: values.iter().copied().fold(f64::INFINITY, f64::min),
                max_km_per_battery_pct: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                trip_count: values.len(),
            })
        })
        .collect()
}

/// Daily mean efficiency and the direction it is heading.
pub fn efficiency_trend(records: &[AnalyticsRecord]) -> Option<EfficiencyTrend> {
    let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for record in records {
        by_date
            .entry(record.trip.start_date)
            .or_default()
            .push(record.km_per_battery_pct);
    }

    let daily: Vec<DailyEfficiency> = by_date
        .into_iter()
        .filter_map(|(date, values)| {
            Some(DailyEfficiency {
                date,
                km_per_battery_pct: mean(&values)?,
            })
        })
        .collect();

    let values: Vec<f64> = daily.iter().map(|d| d.km_per_battery_pct).collect();
    let recent = *values.last()?;
    let average = mean(&values)?;

    let trend = if values.len() > 1 {
        let (first, second) = values.split_at(values.len() / 2);
        let first_mean = mean(first)?;
        let second_mean = mean(second)?;
        Some(TrendSummary {
            direction: if second_mean > first_mean {
                TrendDirection::Improving
            } else {
                TrendDirection::Declining
            },
            change_pct: (second_mean - first_mean) / first_mean * 100.0,
        })
    } else {
        None
    };

    Some(EfficiencyTrend {
        daily,
        recent_km_per_battery_pct: recent,
        recent_vs_average_pct: (recent - average) / average * 100.0,
        trend,
    })
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with Bessel's correction (n - 1)
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Pearson correlation coefficient. `None` when undefined.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    const EPS: f64 = 1e-9;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    /// 100 → 150 km, 80 → 60 %, 2024-01-01 09:00 → 09:30, planned 25 min
    fn example_trip() -> TripRecord {
        TripRecord {
            planned_distance_km: 48.0,
            planned_duration_min: 25.0,
            battery_before: 80,
            battery_after: 60,
            range_before: 300,
            range_after: 250,
            odometer_before: 100,
            odometer_after: 150,
            temperature_before: 8,
            temperature_after: 12,
            start_date: date("2024-01-01"),
            start_time: time("09:00"),
            end_date: date("2024-01-01"),
            end_time: time("09:30"),
        }
    }

    fn trip_on(day: &str, distance: i64, battery_used: i32) -> TripRecord {
        let mut trip = example_trip();
        trip.start_date = date(day);
        trip.end_date = date(day);
        trip.odometer_after = trip.odometer_before + distance;
        trip.battery_after = trip.battery_before - battery_used;
        trip
    }

    #[test]
    fn test_example_trip_derivation() {
        let record = AnalyticsRecord::from_trip(&example_trip()).unwrap();

        assert_eq!(record.actual_distance, 50);
        assert_eq!(record.battery_used, 20);
        assert!((record.actual_duration_min - 30.0).abs() < EPS);
        assert!((record.time_difference - 5.0).abs() < EPS);
        assert!((record.km_per_battery_pct - 2.5).abs() < EPS);
        assert!((record.average_speed_kmh - 100.0).abs() < EPS);
        assert!((record.km_per_hour - 100.0).abs() < EPS);
        assert!((record.battery_per_hour - 40.0).abs() < EPS);
        assert!((record.time_accuracy_pct - 83.333_333_333).abs() < 1e-6);
        assert_eq!(record.time_efficiency_band, TimeEfficiencyBand::Slower);
        assert!((record.avg_temperature - 10.0).abs() < EPS);
        assert_eq!(record.temperature_band, TemperatureBand::ZeroToTen);
    }

    #[test]
    fn test_zero_battery_use_excluded() {
        let mut trip = example_trip();
        trip.battery_after = trip.battery_before;
        assert!(AnalyticsRecord::from_trip(&trip).is_none());
    }

    #[test]
    fn test_zero_distance_excluded() {
        let mut trip = example_trip();
        trip.odometer_after = trip.odometer_before;
        assert!(AnalyticsRecord::from_trip(&trip).is_none());
    }

    #[test]
    fn test_odometer_going_backwards_excluded() {
        let mut trip = example_trip();
        trip.odometer_after = trip.odometer_before - 10;
        assert!(AnalyticsRecord::from_trip(&trip).is_none());
    }

    #[test]
    fn test_zero_duration_excluded() {
        let mut trip = example_trip();
        trip.end_time = trip.start_time;
        assert!(AnalyticsRecord::from_trip(&trip).is_none());

        let metrics = TripMetrics::derive(&trip);
        assert_eq!(metrics.actual_duration_min, 0.0);
        assert_eq!(
            time_accuracy_pct(trip.planned_duration_min, metrics.actual_duration_min),
            FALLBACK_TIME_ACCURACY_PCT
        );
    }

    #[test]
    fn test_extreme_readings_do_not_overflow() {
        let mut trip = example_trip();
        trip.temperature_before = i32::MAX;
        trip.temperature_after = i32::MAX;
        trip.battery_before = i32::MAX;
        trip.battery_after = i32::MIN;
        trip.odometer_before = i64::MIN;
        trip.odometer_after = i64::MAX;

        let metrics = TripMetrics::derive(&trip);
        assert_eq!(metrics.avg_temperature, f64::from(i32::MAX));
        assert_eq!(metrics.battery_used, i32::MAX);
        assert_eq!(metrics.actual_distance, i64::MAX);
        assert!(matches!(report(&[trip]), ReportOutcome::Ready { .. }));

        let mut backwards = example_trip();
        backwards.odometer_before = i64::MAX;
        backwards.odometer_after = i64::MIN;
        backwards.battery_before = i32::MIN;
        backwards.battery_after = i32::MAX;
        assert!(AnalyticsRecord::from_trip(&backwards).is_none());
    }

    #[test]
    fn test_duration_spans_midnight() {
        let mut trip = example_trip();
        trip.start_time = time("23:50");
        trip.end_date = date("2024-01-02");
        trip.end_time = time("00:20");
        let record = AnalyticsRecord::from_trip(&trip).unwrap();
        assert!((record.actual_duration_min - 30.0).abs() < EPS);
    }

    #[test]
    fn test_derive_keeps_order_and_filters() {
        let mut invalid = example_trip();
        invalid.battery_after = 80;
        let trips = vec![
            trip_on("2024-01-03", 30, 10),
            invalid,
            trip_on("2024-01-01", 60, 20),
        ];

        let records = derive(&trips);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trip, trips[0]);
        assert_eq!(records[1].trip, trips[2]);
        assert!(records.iter().all(|r| r.km_per_battery_pct > 0.0));

        let all_valid = vec![trip_on("2024-01-01", 5, 1), example_trip()];
        assert_eq!(derive(&all_valid).len(), all_valid.len());
    }

    #[test]
    fn test_temperature_bands_at_boundaries() {
        use TemperatureBand::*;
        let cases = [
            (f64::NEG_INFINITY, BelowZero),
            (-25.0, BelowZero),
            (0.0, BelowZero),
            (0.5, ZeroToTen),
            (10.0, ZeroToTen),
            (10.5, TenToTwenty),
            (20.0, TenToTwenty),
            (20.5, TwentyToThirty),
            (30.0, TwentyToThirty),
            (30.5, AboveThirty),
            (f64::INFINITY, AboveThirty),
        ];
        for (value, expected) in cases {
            assert_eq!(TemperatureBand::classify(value), expected, "avg temperature {}", value);
        }
    }

    #[test]
    fn test_temperature_bands_total_and_ordered() {
        // every half-degree from -60 to 70 maps to one band, monotonically
        let mut previous = TemperatureBand::BelowZero;
        for step in -120..=140 {
            let band = TemperatureBand::classify(f64::from(step) / 2.0);
            assert!(band >= previous);
            previous = band;
        }
        assert_eq!(previous, TemperatureBand::AboveThirty);
        assert_eq!(TemperatureBand::ALL.len(), 5);
    }

    #[test]
    fn test_time_efficiency_bands_at_boundaries() {
        use TimeEfficiencyBand::*;
        let cases = [
            (0.0, VerySlow),
            (79.9, VerySlow),
            (80.0, VerySlow),
            (80.1, Slower),
            (90.0, Slower),
            (90.1, OnTime),
            (100.0, OnTime),
            (110.0, OnTime),
            (110.1, Faster),
            (120.0, Faster),
            (120.1, VeryFast),
            (500.0, VeryFast),
        ];
        for (value, expected) in cases {
            assert_eq!(TimeEfficiencyBand::classify(value), expected, "accuracy {}", value);
        }
        assert_eq!(TimeEfficiencyBand::classify(f64::NAN), VeryFast);
    }

    #[test]
    fn test_band_labels_serialize() {
        assert_eq!(
            serde_json::to_string(&TemperatureBand::BelowZero).unwrap(),
            "\"Below 0°C\""
        );
        assert_eq!(
            serde_json::to_string(&TimeEfficiencyBand::OnTime).unwrap(),
            format!("\"{}\"", TimeEfficiencyBand::OnTime.label())
        );
    }

    #[test]
    fn test_report_on_empty_and_invalid_input() {
        assert_eq!(report(&[]), ReportOutcome::NoTrips);

        let mut idle = example_trip();
        idle.odometer_after = idle.odometer_before;
        let outcome = report(&[idle]);
        assert_eq!(outcome, ReportOutcome::NoValidTrips { excluded_count: 1 });
        assert!(outcome.message().is_some());
    }

    #[test]
    fn test_report_aggregates() {
        // efficiencies: 3.0 (01-01), 2.0 (01-01), 4.0 (01-02), 5.0 (01-03)
        let trips = vec![
            trip_on("2024-01-01", 30, 10),
            trip_on("2024-01-01", 40, 20),
            trip_on("2024-01-02", 40, 10),
            trip_on("2024-01-03", 50, 10),
        ];
        let ReportOutcome::Ready { report: built } = report(&trips) else {
            panic!("expected a report");
        };
        let report = *built;

        assert_eq!(report.trip_count, 4);
        assert_eq!(report.excluded_count, 0);
        assert!((report.overview.mean_km_per_battery_pct - 3.5).abs() < EPS);
        assert!((report.overview.theoretical_range_km - 350.0).abs() < EPS);
        let std_dev = report.overview.std_dev_km_per_battery_pct.unwrap();
        assert!((std_dev - (5.0f64 / 3.0).sqrt()).abs() < EPS);

        // daily means 2.5, 4.0, 5.0
        let daily: Vec<f64> = report.trend.daily.iter().map(|d| d.km_per_battery_pct).collect();
        assert_eq!(daily, vec![2.5, 4.0, 5.0]);
        assert_eq!(report.trend.daily[0].date, date("2024-01-01"));
        assert!((report.trend.recent_km_per_battery_pct - 5.0).abs() < EPS);
        let average = (2.5 + 4.0 + 5.0) / 3.0;
        assert!((report.trend.recent_vs_average_pct - (5.0 - average) / average * 100.0).abs() < EPS);

        // first half [2.5], second half [4.0, 5.0]
        let trend = report.trend.trend.as_ref().unwrap();
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert!((trend.change_pct - 80.0).abs() < EPS);

        assert_eq!(report.temperature.len(), 1);
        let band = &report.temperature[0];
        assert_eq!(band.band, TemperatureBand::ZeroToTen);
        assert_eq!(band.trip_count, 4);
        assert!((band.min_km_per_battery_pct - 2.0).abs() < EPS);
        assert!((band.max_km_per_battery_pct - 5.0).abs() < EPS);

        assert!((report.time.mean_time_accuracy_pct - 250.0 / 3.0).abs() < 1e-6);
        assert_eq!(report.time.accuracy_series.len(), 4);
        assert!((report.time.mean_average_speed_kmh - 80.0).abs() < EPS);
        assert!(report.distance_battery_correlation.is_some());
    }

    #[test]
    fn test_single_day_has_no_trend() {
        let ReportOutcome::Ready { report: built } = report(&[example_trip()]) else {
            panic!("expected a report");
        };
        let report = *built;
        assert!(report.trend.trend.is_none());
        assert!(report.overview.std_dev_km_per_battery_pct.is_none());
        assert!(report.distance_battery_correlation.is_none());
        assert!((report.trend.recent_vs_average_pct).abs() < EPS);
    }

    #[test]
    fn test_declining_trend() {
        let trips = vec![trip_on("2024-02-01", 50, 10), trip_on("2024-02-02", 30, 10)];
        let trend = efficiency_trend(&derive(&trips)).unwrap().trend.unwrap();
        assert_eq!(trend.direction, TrendDirection::Declining);
        assert!((trend.change_pct + 40.0).abs() < EPS);
    }

    #[test]
    fn test_temperature_breakdown_groups_by_band() {
        let mut cold = trip_on("2024-01-05", 20, 10);
        cold.temperature_before = -6;
        cold.temperature_after = -2;
        let mut hot = trip_on("2024-07-05", 60, 10);
        hot.temperature_before = 31;
        hot.temperature_after = 35;
        let mild = trip_on("2024-04-05", 40, 10);

        let stats = temperature_breakdown(&derive(&[hot, mild, cold]));
        let bands: Vec<TemperatureBand> = stats.iter().map(|s| s.band).collect();
        assert_eq!(
            bands,
            vec![TemperatureBand::BelowZero, TemperatureBand::ZeroToTen, TemperatureBand::AboveThirty]
        );
        assert!((stats[0].mean_km_per_battery_pct - 2.0).abs() < EPS);
        assert!((stats[2].mean_km_per_battery_pct - 6.0).abs() < EPS);
    }

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&xs, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < EPS);
        assert!((pearson(&xs, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < EPS);
        assert_eq!(pearson(&xs, &[3.0, 3.0, 3.0, 3.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }

    #[test]
    fn test_mean_of_empty_is_undefined() {
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std_dev(&[1.0]), None);
        assert!(build_report(Vec::new(), 3).is_none());
    }
}
