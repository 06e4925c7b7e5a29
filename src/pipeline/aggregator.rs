//! Per-machine aggregation state: minute and hour stats per sensor, the last
//! observed time and the raw sample log.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use super::clock::{crossed_boundaries, Granularity};
use super::raw_log::RawLog;
use super::stat::Stat;
use crate::config::StatsConfig;
use crate::types::{DataUpdate, MinuteUpdate};

#[derive(Debug, Clone)]
struct SensorStats {
    minute: Stat,
    hour: Stat,
}

/// Result of one cascade check.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeFlush {
    /// Boundaries crossed, in nesting order. Always starts with `Minute`.
    pub levels: Vec<Granularity>,
    /// Time of the update that crossed the boundary
    pub now: NaiveDateTime,
    /// Minute averages of sensors that saw data
    pub minute: Vec<MinuteUpdate>,
    /// Hour averages of sensors that saw data. Empty unless `Hour` crossed.
    pub hour: Vec<(String, f64)>,
    /// Every sensor seen so far, for the stored day/month/year rollups
    pub sensors: Vec<String>,
}

impl CascadeFlush {
    pub fn crossed(&self, granularity: Granularity) -> bool {
        self.levels.contains(&granularity)
    }
}

/// Aggregation state of one connected machine.
///
/// The sensor set only grows: a sensor is added the first time it appears in
/// an update and keeps the reduction mode chosen then.
pub struct MachineAggregator {
    name: String,
    last_observed: NaiveDateTime,
    sensors: BTreeMap<String, SensorStats>,
    raw_log: Option<RawLog>,
}

impl MachineAggregator {
    pub fn new(name: impl Into<String>, now: NaiveDateTime, raw_log_root: Option<&Path>) -> Self {
        let name = name.into();
        let raw_log = raw_log_root.map(|root| RawLog::new(root, &name, now.date()));
        Self {
            name,
            last_observed: now,
            sensors: BTreeMap::new(),
            raw_log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_observed(&self) -> NaiveDateTime {
        self.last_observed
    }

    pub fn sensor_names(&self) -> Vec<String> {
        self.sensors.keys().cloned().collect()
    }

    /// Samples folded into the current minute for `sensor`.
    pub fn minute_count(&self, sensor: &str) -> Option<usize> {
        self.sensors.get(sensor).map(|s| s.minute.count())
    }

    /// Check the cascade against `now` and read out every crossed level.
    ///
    /// Minute and hour stats are read destructively. The raw log rotates when
    /// the day changes. Returns `None` while still inside the same minute.
    pub fn advance(&mut self, now: NaiveDateTime) -> Option<CascadeFlush> {
        let levels = crossed_boundaries(&self.last_observed, &now);
        self.last_observed = now;
        if levels.is_empty() {
            return None;
        }

        let minute = self
            .sensors
            .iter_mut()
            .filter(|(_, s)| !s.minute.is_empty())
            .map(|(name, s)| MinuteUpdate {
                sensor_name: name.clone(),
                data: s.minute.take_average(),
                time: now,
            })
            .collect();

        let hour = if levels.contains(&Granularity::Hour) {
            self.sensors
                .iter_mut()
                .filter(|(_, s)| !s.hour.is_empty())
                .map(|(name, s)| (name.clone(), s.hour.take_average()))
                .collect()
        } else {
            Vec::new()
        };

        if levels.contains(&Granularity::Day) {
            if let Some(log) = self.raw_log.as_mut() {
                log.rotate(now.date());
            }
        }

        Some(CascadeFlush {
            levels,
            now,
            minute,
            hour,
            sensors: self.sensor_names(),
        })
    }

    /// Fold an update into the minute and hour stats and the raw log.
    ///
    /// Returns the sensors seen for the first time.
    pub fn fold(&mut self, update: &DataUpdate, modes: &StatsConfig, now: NaiveDateTime) -> Vec<String> {
        let mut new_sensors = Vec::new();

        for (sensor, samples) in update {
            let stats = self.sensors.entry(sensor.clone()).or_insert_with(|| {
                new_sensors.push(sensor.clone());
                let mode = modes.mode_for(samples.sensor_type.as_deref());
                SensorStats {
                    minute: Stat::new(mode),
                    hour: Stat::new(mode),
                }
            });
            stats.minute.add(&samples.data);
            stats.hour.add(&samples.data);

            if let Some(log) = self.raw_log.as_mut() {
                if let Err(e) = log.append(sensor, now, &samples.data) {
                    warn!(machine = %self.name, sensor = %sensor, error = %e, "Failed to write raw log");
                }
            }
        }

        new_sensors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorSamples;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn update(sensor: &str, sensor_type: Option<&str>, data: &[f64]) -> DataUpdate {
        DataUpdate::from([(
            sensor.to_string(),
            SensorSamples {
                sensor_type: sensor_type.map(String::from),
                data: data.to_vec(),
            },
        )])
    }

    #[test]
    fn test_minute_rollover_averages_and_resets() {
        let stats = StatsConfig::default();
        let mut agg = MachineAggregator::new("M1", at(5, 10, 0, 0), None);

        assert!(agg.advance(at(5, 10, 0, 10)).is_none());
        assert_eq!(agg.fold(&update("vib1", Some("VIB"), &[1.0, 2.0, 3.0]), &stats, at(5, 10, 0, 10)), vec!["vib1"]);
        assert!(agg.advance(at(5, 10, 0, 20)).is_none());
        assert!(agg.fold(&update("vib1", None, &[4.0, 5.0]), &stats, at(5, 10, 0, 20)).is_empty());

        let flush = agg.advance(at(5, 10, 1, 0)).unwrap();
        assert_eq!(flush.levels, vec![Granularity::Minute]);
        assert_eq!(flush.minute.len(), 1);
        assert!((flush.minute[0].data - 3.0).abs() < 1e-12);
        assert_eq!(flush.minute[0].time, at(5, 10, 1, 0));
        assert!(flush.hour.is_empty());
        assert_eq!(agg.minute_count("vib1"), Some(0));
    }

    #[test]
    fn test_hour_stat_survives_minute_flushes() {
        let stats = StatsConfig::default();
        let mut agg = MachineAggregator::new("M1", at(5, 10, 58, 0), None);
        agg.fold(&update("t", Some("TEMP"), &[10.0]), &stats, at(5, 10, 58, 0));
        agg.advance(at(5, 10, 59, 0));
        agg.fold(&update("t", Some("TEMP"), &[20.0]), &stats, at(5, 10, 59, 0));

        let flush = agg.advance(at(5, 11, 0, 0)).unwrap();
        assert_eq!(flush.levels, vec![Granularity::Minute, Granularity::Hour]);
        assert_eq!(flush.hour, vec![("t".to_string(), 15.0)]);
    }

    #[test]
    fn test_reduction_mode_fixed_at_first_sighting() {
        let stats = StatsConfig::default();
        let mut agg = MachineAggregator::new("M1", at(5, 10, 0, 0), None);
        agg.fold(&update("v", Some("VIB"), &[-2.0]), &stats, at(5, 10, 0, 0));
        // a later update declaring another type does not change the mode
        agg.fold(&update("v", Some("TEMP"), &[-4.0]), &stats, at(5, 10, 0, 1));

        let flush = agg.advance(at(5, 10, 1, 0)).unwrap();
        assert!((flush.minute[0].data - 3.0).abs() < 1e-12);
    }
}
