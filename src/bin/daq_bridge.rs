//! CSV waveform bridge: replays CSV files through a producer machine.
//!
//! Watches a directory for `*.csv` files and streams each one, once, to the
//! monitoring server over the link protocol. Rows sharing a time value form
//! one acquisition batch.
//!
//! Usage:
//!   cargo run --bin daq-bridge -- --watch-dir ./incoming --machine-name press-01
//!   cargo run --bin daq-bridge -- --watch-dir ./incoming --config producer.toml --machine-name press-01 --replay-sleep

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use condition_monitor::config::{defaults, LinkConfig, MachineConfig, ProducerConfig, SensorConfig};
use condition_monitor::link::spawn_link;
use condition_monitor::producer::{DataSender, EventHandler, Machine, MetadataModelLoader};

/// Stream CSV waveform files to the monitoring server.
#[derive(Parser, Debug)]
#[command(name = "daq-bridge")]
#[command(version)]
struct Args {
    /// Directory to watch for CSV files
    #[arg(long)]
    watch_dir: PathBuf,

    /// Producer configuration. Without it the machine is built from the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Machine name to register
    #[arg(long)]
    machine_name: String,

    /// Monitoring server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Monitoring server ingest port
    #[arg(long, default_value_t = 8082)]
    port: u16,

    /// Sensor name the CSV values are reported under
    #[arg(long, default_value = "shot_blast_vib1")]
    sensor_name: String,

    /// Sensor type for server statistics
    #[arg(long, default_value = "VIB")]
    sensor_type: String,

    /// Samples per second sent to the server
    #[arg(long, default_value_t = defaults::LINK_MAX_RATE)]
    output_rate: usize,

    /// Seconds between directory scans
    #[arg(long, default_value_t = 1.0)]
    poll_interval: f64,

    /// Sleep one second per time group to mimic real time
    #[arg(long)]
    replay_sleep: bool,
}

impl Args {
    fn machine_config(&self) -> Result<(MachineConfig, PathBuf)> {
        if let Some(path) = &self.config {
            let config = ProducerConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            let Some(machine) = config.machine(&self.machine_name) else {
                bail!("machine {} is not in {}", self.machine_name, path.display());
            };
            return Ok((machine.clone(), config.model_dir.clone()));
        }

        let mut link = LinkConfig::new(&self.host, self.port);
        link.max_rate = self.output_rate;
        let machine = MachineConfig {
            name: self.machine_name.clone(),
            sensors: vec![SensorConfig {
                name: self.sensor_name.clone(),
                sensor_type: self.sensor_type.clone(),
            }],
            fault_detectable: false,
            fault_threshold: 0.0,
            link: Some(link),
        };
        Ok((machine, ProducerConfig::default().model_dir))
    }
}

// ============================================================================
// CSV Reading
// ============================================================================

/// Pick the time and value columns from a header row.
///
/// Time is `time` (any case) or the first column. Value is the first of
/// `y`, `data`, `amplitude`, `value`, else the second column.
fn detect_columns(headers: &[String]) -> Result<(usize, usize)> {
    let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    if headers.is_empty() {
        bail!("no header row");
    }
    let time_idx = find("time").unwrap_or(0);
    if let Some(value_idx) = ["y", "data", "amplitude", "value"].iter().find_map(|k| find(*k)) {
        return Ok((time_idx, value_idx));
    }
    if headers.len() < 2 {
        bail!("CSV needs at least two columns (time, value)");
    }
    Ok((time_idx, 1))
}

/// Read `(time, value)` rows. Rows whose value does not parse are skipped.
fn load_csv(path: &Path) -> Result<Vec<(String, f64)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        bail!("{} is empty", path.display());
    }
    let (time_idx, value_idx) =
        detect_columns(&headers).with_context(|| format!("in {}", path.display()))?;

    let mut rows = Vec::new();
    for (line_num, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line_num + 2, error = %e, "Error reading CSV record");
                continue;
            }
        };
        let Some(value) = record.get(value_idx).and_then(|v| v.parse::<f64>().ok()) else {
            continue;
        };
        let time = record.get(time_idx).unwrap_or("");
        rows.push((time.to_string(), value));
    }
    Ok(rows)
}

/// Group consecutive rows sharing a time value.
fn group_by_time(rows: Vec<(String, f64)>) -> Vec<Vec<f64>> {
    let mut groups = Vec::new();
    let mut current: Option<String> = None;
    let mut bucket = Vec::new();
    for (time, value) in rows {
        if current.as_ref().is_some_and(|c| *c != time) {
            groups.push(std::mem::take(&mut bucket));
        }
        current = Some(time);
        bucket.push(value);
    }
    if !bucket.is_empty() {
        groups.push(bucket);
    }
    groups
}

// ============================================================================
// Streaming
// ============================================================================

async fn stream_file(machine: &mut Machine, sensor: &str, path: &Path, replay_sleep: bool) -> Result<usize> {
    let groups = group_by_time(load_csv(path)?);
    let count = groups.len();
    for values in groups {
        machine.data_update(BTreeMap::from([(sensor.to_string(), values)]));
        // keeps groups in file order on the link
        machine.settle().await;
        if replay_sleep {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    Ok(count)
}

fn pending_csv_files(dir: &Path, processed: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("scanning {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .filter(|p| !processed.contains(p))
        .collect();
    files.sort();
    Ok(files)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    if !args.watch_dir.is_dir() {
        bail!("watch directory not found: {}", args.watch_dir.display());
    }

    let (machine_config, model_dir) = args.machine_config()?;
    let Some(sensor) = machine_config.sensors.first().map(|s| s.name.clone()) else {
        bail!("machine {} has no sensors", machine_config.name);
    };
    let link_config = machine_config
        .link
        .clone()
        .unwrap_or_else(|| LinkConfig::new(&args.host, args.port));

    let mut machine = Machine::new(&machine_config, &MetadataModelLoader::new(model_dir));
    let link = spawn_link(&machine_config.name, &link_config);
    let sender: Arc<dyn EventHandler> = Arc::new(DataSender::new(
        link.clone(),
        machine_config.sensor_types(),
        link_config.max_rate,
    ));
    machine.register_handler(sender);

    info!(
        machine = %machine_config.name,
        server = %link_config.address(),
        watch_dir = %args.watch_dir.display(),
        "daq-bridge started"
    );

    let poll = Duration::from_secs_f64(args.poll_interval.max(0.05));
    let mut processed = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
            _ = tokio::time::sleep(poll) => {}
        }

        if !link.is_connected() {
            continue;
        }

        for path in pending_csv_files(&args.watch_dir, &processed)? {
            match stream_file(&mut machine, &sensor, &path, args.replay_sleep).await {
                Ok(groups) => info!(file = %path.display(), groups, "file streamed"),
                Err(e) => warn!(file = %path.display(), error = %e, "file skipped"),
            }
            processed.insert(path);
        }
    }

    machine.settle().await;
    Ok(())
}
