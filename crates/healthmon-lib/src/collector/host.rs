//! Host collector backed by `sysinfo`

use super::{async_trait, Collected, MetricsCollector, NetworkBaseline};
use crate::error::CollectionError;
use crate::models::{ProcessSample, Sample};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// Configuration for the host collector
#[derive(Debug, Clone)]
pub struct HostCollectorConfig {
    /// Number of processes kept in `top_processes` (default: 5)
    pub top_processes: usize,
    /// Mount point whose filesystem is reported as disk usage (default: `/`)
    pub disk_mount: PathBuf,
    /// Delay between the two CPU refreshes that bound a usage measurement
    pub cpu_sample_window: Duration,
}

impl Default for HostCollectorConfig {
    fn default() -> Self {
        Self {
            top_processes: 5,
            disk_mount: PathBuf::from("/"),
            cpu_sample_window: sysinfo::MINIMUM_CPU_UPDATE_INTERVAL,
        }
    }
}

/// Host name as reported by the OS, `localhost` if unknown
pub fn host_name() -> String {
    System::host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Collects CPU, memory, disk, network, uptime and process telemetry
pub struct HostCollector {
    system: System,
    disks: Disks,
    networks: Networks,
    network: NetworkBaseline,
    config: HostCollectorConfig,
    last_timestamp: Option<DateTime<Utc>>,
}

impl HostCollector {
    pub fn new(config: HostCollectorConfig) -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            network: NetworkBaseline::new(),
            config,
            last_timestamp: None,
        }
    }

    /// Current wall clock, clamped so successive samples never go backwards
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    fn read_cpu(&self) -> Result<f64, CollectionError> {
        if self.system.cpus().is_empty() {
            return Err(CollectionError::new("cpu_percent", "no CPUs reported"));
        }
        let usage = self.system.global_cpu_info().cpu_usage() as f64;
        if !usage.is_finite() {
            return Err(CollectionError::new("cpu_percent", "non-finite usage"));
        }
        Ok(usage.clamp(0.0, 100.0))
    }

    fn read_memory(&self) -> Result<(f64, u64, u64), CollectionError> {
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let percent = percent_of(used, total)
            .ok_or_else(|| CollectionError::new("memory_percent", "total memory reported as zero"))?;
        Ok((percent, used, total))
    }

    fn read_disk(&mut self) -> Result<(f64, u64, u64), CollectionError> {
        self.disks.refresh();
        if self.disks.list().is_empty() {
            self.disks.refresh_list();
        }

        let mounts: Vec<(&Path, u64, u64)> = self
            .disks
            .list()
            .iter()
            .map(|d| (d.mount_point(), d.total_space(), d.available_space()))
            .collect();

        let (total, available) = select_mount(&mounts, &self.config.disk_mount).ok_or_else(|| {
            CollectionError::new(
                "disk_percent",
                format!("no filesystem mounted at {}", self.config.disk_mount.display()),
            )
        })?;

        let used = total.saturating_sub(available);
        let percent = percent_of(used, total)
            .ok_or_else(|| CollectionError::new("disk_percent", "filesystem size reported as zero"))?;
        Ok((percent, used, total))
    }

    /// Per-second rates; `Ok(None)` until a baseline reading exists
    fn read_network(&mut self) -> Result<Option<(f64, f64)>, CollectionError> {
        self.networks.refresh();
        if self.networks.list().is_empty() {
            self.network.reset();
            return Err(CollectionError::new("network", "no network interfaces"));
        }

        let (sent, recv) = self.network_totals();
        Ok(self.network.advance(Instant::now(), sent, recv))
    }

    fn network_totals(&self) -> (u64, u64) {
        self.networks
            .list()
            .values()
            .fold((0u64, 0u64), |(sent, recv), data| {
                (
                    sent.saturating_add(data.total_transmitted()),
                    recv.saturating_add(data.total_received()),
                )
            })
    }

    /// Take a first counter reading so the coming sample can report a rate
    fn prime_network(&mut self) {
        if self.network.has_baseline() {
            return;
        }
        self.networks.refresh();
        let (sent, recv) = self.network_totals();
        self.network.advance(Instant::now(), sent, recv);
    }

    fn read_processes(&self) -> Result<Vec<ProcessSample>, CollectionError> {
        let processes = self.system.processes();
        if processes.is_empty() {
            return Err(CollectionError::new(
                "top_processes",
                "process list empty or not readable",
            ));
        }

        let total_memory = self.system.total_memory();
        let samples = processes
            .iter()
            .map(|(pid, process)| ProcessSample {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                cpu_percent: process.cpu_usage() as f64,
                memory_percent: percent_of(process.memory(), total_memory).unwrap_or(0.0),
            })
            .collect();

        Ok(rank_processes(samples, self.config.top_processes))
    }
}

#[async_trait]
impl MetricsCollector for HostCollector {
    async fn collect(&mut self) -> Collected {
        // CPU usage is a delta between two refreshes
        self.system.refresh_cpu();
        self.system.refresh_processes();
        self.prime_network();
        tokio::time::sleep(self.config.cpu_sample_window).await;
        self.system.refresh_cpu();
        self.system.refresh_processes();
        self.system.refresh_memory();

        let mut sample = Sample::empty(self.next_timestamp());
        let mut errors = Vec::new();

        match self.read_cpu() {
            Ok(cpu) => sample.cpu_percent = Some(cpu),
            Err(e) => errors.push(e),
        }

        match self.read_memory() {
            Ok((percent, used, total)) => {
                sample.memory_percent = Some(percent);
                sample.memory_used_bytes = Some(used);
                sample.memory_total_bytes = Some(total);
            }
            Err(e) => errors.push(e),
        }

        match self.read_disk() {
            Ok((percent, used, total)) => {
                sample.disk_percent = Some(percent);
                sample.disk_used_bytes = Some(used);
                sample.disk_total_bytes = Some(total);
            }
            Err(e) => errors.push(e),
        }

        match self.read_network() {
            Ok(Some((sent, recv))) => {
                sample.network_bytes_sent_per_sec = Some(sent);
                sample.network_bytes_recv_per_sec = Some(recv);
            }
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        sample.uptime_seconds = Some(System::uptime());

        match self.read_processes() {
            Ok(top) => sample.top_processes = Some(top),
            Err(e) => errors.push(e),
        }

        for error in &errors {
            debug!(field = error.field, reason = %error.reason, "Metric unavailable");
        }

        Collected { sample, errors }
    }
}

/// `used / total` as a percentage, `None` when total is zero
pub(crate) fn percent_of(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

/// Pick the filesystem holding `target`: an exact mount match, otherwise the
/// longest mount point that is a prefix of `target`.
pub(crate) fn select_mount(mounts: &[(&Path, u64, u64)], target: &Path) -> Option<(u64, u64)> {
    mounts
        .iter()
        .filter(|(mount, _, _)| target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())
        .map(|(_, total, available)| (*total, *available))
}

/// Rank by CPU descending, then memory descending, and keep `limit` entries
pub(crate) fn rank_processes(mut processes: Vec<ProcessSample>, limit: usize) -> Vec<ProcessSample> {
    processes.sort_by(|a, b| {
        b.cpu_percent
            .total_cmp(&a.cpu_percent)
            .then_with(|| b.memory_percent.total_cmp(&a.memory_percent))
    });
    processes.truncate(limit);
    processes
}
