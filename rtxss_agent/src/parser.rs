//! Parses `nvidia-smi` CSV output into a [`Sample`].
//!
//! Strict on shape, permissive on content: a record with the wrong number of
//! fields is a [`ParseError::SchemaMismatch`], but a single unreadable value
//! only turns that one field into `None`.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::error::ParseError;
use crate::types::{ProcessEntry, Sample};

pub const DEVICE_FIELDS: usize = 14;
pub const PROCESS_FIELDS: usize = 3;
pub const GRAPHICS_PROCESS_FIELDS: usize = 2;

const PLACEHOLDERS: &[&str] = &[
    "n/a",
    "[n/a]",
    "[not supported]",
    "[unknown error]",
    "[insufficient permissions]",
    "err!",
];

/// What the host knows about a process, looked up by pid.
#[derive(Debug, Clone, PartialEq)]
pub struct HostProcess {
    pub name: String,
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostMemory {
    pub total_bytes: u64,
    pub processes: HashMap<u32, HostProcess>,
}

/// Everything a single cycle gathered, ready for parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTelemetry {
    pub captured_at: DateTime<Utc>,
    pub device: String,
    pub apps: String,
    /// `pid, used_memory` records; graphics workloads missing from `apps`.
    pub graphics_apps: String,
    pub cuda_version: Option<String>,
    pub host: HostMemory,
}

pub fn parse(raw: &RawTelemetry) -> Result<Sample, ParseError> {
    let line = raw
        .device
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let f = split_fields(line);
    if line.is_empty() || f.len() != DEVICE_FIELDS {
        return Err(ParseError::SchemaMismatch {
            record: "device",
            expected: DEVICE_FIELDS,
            found: if line.is_empty() { 0 } else { f.len() },
        });
    }

    let pcie_gen_current = int(f[10]);
    let pcie_gen_max = int(f[11]);

    Ok(Sample {
        timestamp: raw.captured_at,
        device_name: f[0].to_string(),
        driver_version: f[1].to_string(),
        cuda_version: raw.cuda_version.clone(),
        mem_total_mb: int(f[2]),
        mem_used_mb: int(f[3]),
        gpu_util_percent: percent(f[4]),
        mem_util_percent: percent(f[5]),
        temperature_c: number(f[6]),
        power_watts: number(f[7]),
        power_limit_watts: number(f[8]),
        fan_percent: percent(f[9]),
        pcie_gen_current,
        pcie_gen_max,
        pcie_lanes_current: int(f[12]),
        pcie_lanes_max: int(f[13]),
        pcie_transfer_current: pcie_gen_current.and_then(transfer_rate_gts),
        pcie_transfer_max: pcie_gen_max.and_then(transfer_rate_gts),
        processes: parse_processes(&raw.apps, &raw.graphics_apps, &raw.host)?,
    })
}

/// Pids listed in an apps query; used to look up host data before parsing.
pub fn process_pids(apps: &str) -> Vec<u32> {
    apps.lines()
        .filter_map(|l| l.split(',').next())
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

/// `CUDA Version: 12.4` token from the plain `nvidia-smi` banner.
pub fn parse_cuda_version(banner: &str) -> Option<String> {
    banner.lines().find_map(|l| {
        let (_, rest) = l.split_once("CUDA Version:")?;
        rest.split_whitespace()
            .next()
            .map(|v| v.trim_end_matches('|').to_string())
            .filter(|v| !v.is_empty() && !is_placeholder(v))
    })
}

/// PCIe per-lane transfer rate in GT/s for a link generation.
pub fn transfer_rate_gts(gen: u32) -> Option<f64> {
    match gen {
        1 => Some(2.5),
        2 => Some(5.0),
        3 => Some(8.0),
        4 => Some(16.0),
        5 => Some(32.0),
        6 => Some(64.0),
        _ => None,
    }
}

// Compute records come first and win over graphics records for the same pid.
fn parse_processes(apps: &str, graphics: &str, host: &HostMemory) -> Result<Vec<ProcessEntry>, ParseError> {
    let mut out: Vec<ProcessEntry> = Vec::new();
    let mut seen = HashSet::new();
    let mut keep = |entry: ProcessEntry, out: &mut Vec<ProcessEntry>| {
        if entry.pid == 0 || seen.insert(entry.pid) {
            out.push(entry);
        }
    };

    for line in records(apps) {
        // the name goes last so commas inside it survive
        let f: Vec<&str> = line.splitn(PROCESS_FIELDS, ',').map(str::trim).collect();
        if f.len() != PROCESS_FIELDS {
            return Err(ParseError::SchemaMismatch {
                record: "process",
                expected: PROCESS_FIELDS,
                found: f.len(),
            });
        }
        keep(process_entry(f[0], f[1], f[2], host), &mut out);
    }
    for line in records(graphics) {
        let f = split_fields(line);
        if f.len() != GRAPHICS_PROCESS_FIELDS {
            return Err(ParseError::SchemaMismatch {
                record: "graphics process",
                expected: GRAPHICS_PROCESS_FIELDS,
                found: f.len(),
            });
        }
        keep(process_entry(f[0], f[1], "", host), &mut out);
    }
    Ok(out)
}

fn records(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

fn process_entry(pid: &str, gpu_mem: &str, reported: &str, host: &HostMemory) -> ProcessEntry {
    let pid: Option<u32> = int(pid);
    let known = pid.and_then(|p| host.processes.get(&p));
    let name = match known {
        Some(hp) if !hp.name.is_empty() => hp.name.clone(),
        _ => reported_name(reported),
    };
    let ram_percent = known.and_then(|hp| {
        (host.total_bytes > 0)
            .then(|| (hp.mem_bytes as f64 / host.total_bytes as f64 * 1000.0).round() / 10.0)
    });
    ProcessEntry {
        pid: pid.unwrap_or(0),
        name,
        ram_percent,
        gpu_mem_mb: int(gpu_mem),
    }
}

fn reported_name(raw: &str) -> String {
    if raw.is_empty() || is_placeholder(raw) {
        return "Unknown".to_string();
    }
    raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(raw).to_string()
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

fn is_placeholder(v: &str) -> bool {
    let l = v.trim().to_ascii_lowercase();
    l.is_empty() || PLACEHOLDERS.contains(&l.as_str())
}

fn number(v: &str) -> Option<f64> {
    if is_placeholder(v) {
        return None;
    }
    v.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)
}

fn percent(v: &str) -> Option<f64> {
    number(v).filter(|n| *n <= 100.0)
}

fn int<T: std::str::FromStr>(v: &str) -> Option<T> {
    if is_placeholder(v) {
        return None;
    }
    v.parse::<T>().ok()
}
