//! Per-day raw sample CSV logs.
//!
//! One file per `(sensor, date)` at `<root>/<machine>/<YYYY-MM-DD>_<sensor>.csv`
//! with a `time,data` header and one row per sample.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const HEADER: [&str; 2] = ["time", "data"];

pub struct RawLog {
    dir: PathBuf,
    date: NaiveDate,
    writers: HashMap<String, csv::Writer<File>>,
}

impl RawLog {
    pub fn new(root: &Path, machine: &str, date: NaiveDate) -> Self {
        Self {
            dir: root.join(machine),
            date,
            writers: HashMap::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path_for(&self, sensor: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", self.date.format("%Y-%m-%d"), sensor))
    }

    fn writer(&mut self, sensor: &str) -> io::Result<&mut csv::Writer<File>> {
        if !self.writers.contains_key(sensor) {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.path_for(sensor);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let fresh = file.metadata()?.len() == 0;
            let mut writer = csv::Writer::from_writer(file);
            if fresh {
                writer.write_record(HEADER)?;
            }
            self.writers.insert(sensor.to_string(), writer);
        }
        self.writers
            .get_mut(sensor)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "raw log writer missing"))
    }

    /// Append one row per sample, all stamped with `time`.
    pub fn append(&mut self, sensor: &str, time: NaiveDateTime, values: &[f64]) -> io::Result<()> {
        let stamp = time.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        let writer = self.writer(sensor)?;
        for value in values {
            writer.write_record([stamp.as_str(), value.to_string().as_str()])?;
        }
        writer.flush()
    }

    /// Close the current day's files; later appends open files for `date`.
    pub fn rotate(&mut self, date: NaiveDate) {
        for (sensor, mut writer) in self.writers.drain() {
            if let Err(e) = writer.flush() {
                tracing::warn!(sensor = %sensor, error = %e, "Failed to flush raw log");
            }
        }
        self.date = date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let mut log = RawLog::new(dir.path(), "M1", day(5));
        let t = day(5).and_hms_opt(10, 0, 0).unwrap();
        log.append("vib1", t, &[1.0, 2.5]).unwrap();
        log.append("vib1", t, &[3.0]).unwrap();

        let path = dir.path().join("M1").join("2024-03-05_vib1.csv");
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "time,data");
        assert_eq!(lines[1], "2024-03-05 10:00:00.000000,1");
        assert_eq!(lines[2], "2024-03-05 10:00:00.000000,2.5");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_log_reads_back_as_csv() {
        let dir = TempDir::new().unwrap();
        let mut log = RawLog::new(dir.path(), "M1", day(5));
        let t = day(5).and_hms_opt(10, 0, 0).unwrap();
        log.append("vib1", t, &[-0.25]).unwrap();
        log.rotate(day(6));

        let mut reader = csv::Reader::from_path(dir.path().join("M1/2024-03-05_vib1.csv")).unwrap();
        assert_eq!(reader.headers().unwrap(), vec!["time", "data"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "2024-03-05 10:00:00.000000");
        assert_eq!(rows[0][1].parse::<f64>().unwrap(), -0.25);
    }

    #[test]
    fn test_rotate_opens_new_day_file() {
        let dir = TempDir::new().unwrap();
        let mut log = RawLog::new(dir.path(), "M1", day(5));
        log.append("t1", day(5).and_hms_opt(23, 59, 0).unwrap(), &[1.0]).unwrap();
        log.rotate(day(6));
        log.append("t1", day(6).and_hms_opt(0, 0, 1).unwrap(), &[2.0]).unwrap();

        assert!(dir.path().join("M1/2024-03-05_t1.csv").exists());
        let next = std::fs::read_to_string(dir.path().join("M1/2024-03-06_t1.csv")).unwrap();
        assert_eq!(next.lines().count(), 2);
        assert_eq!(log.date(), day(6));
    }
}
