//! Background sampler: polls the telemetry tool on a fixed cadence, records
//! chart history and publishes each result to live subscribers.
//!
//! Failures never end the loop. They are published as `status` events while
//! the last good sample stays available to readers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{futures::Notified, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, InvocationError, ParseError};
use crate::host::HostProcesses;
use crate::invoker::{CommandRunner, CommandSpec};
use crate::parser::{self, RawTelemetry};
use crate::state::AppState;
use crate::types::{Event, HistoryEntry, Sample, StatusEvent};

/// Runtime-adjustable poll period. Safe to change from any task.
pub struct PollInterval {
    ms: AtomicU64,
    changed: Notify,
}

impl PollInterval {
    pub fn new(initial: Duration) -> Self {
        Self {
            ms: AtomicU64::new(initial.as_millis() as u64),
            changed: Notify::new(),
        }
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.ms.load(Ordering::Relaxed))
    }

    /// Current interval plus a wake-up for the next change. The wake-up is
    /// registered before the interval is read, so a change landing in
    /// between is not lost.
    pub fn current_armed(&self) -> (Duration, Pin<Box<Notified<'_>>>) {
        let mut changed = Box::pin(self.changed.notified());
        changed.as_mut().enable();
        (self.get(), changed)
    }

    /// Validates and stores a new interval. A cycle already running is not
    /// affected; a sleeping loop recomputes its deadline.
    pub fn set_ms(&self, ms: i64) -> Result<Duration, ConfigError> {
        let d = crate::config::validate_interval_ms(ms)?;
        self.ms.store(d.as_millis() as u64, Ordering::Relaxed);
        self.changed.notify_waiters();
        Ok(d)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SamplerHealth {
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleError {
    Invocation(InvocationError),
    Parse(ParseError),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Invocation(e) => e.kind(),
            CycleError::Parse(e) => e.kind(),
        }
    }
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Invocation(e) => write!(f, "telemetry command failed: {e}"),
            CycleError::Parse(e) => write!(f, "telemetry output unreadable: {e}"),
        }
    }
}

/// One poller instance. Owns the host lookup and the cached CUDA version.
pub struct Sampler {
    state: AppState,
    host: HostProcesses,
    cuda_version: Option<String>,
    // a banner was read once; "CUDA Version: N/A" stays unknown without re-running
    banner_read: bool,
    apps_warned: bool,
    graphics_warned: bool,
}

impl Sampler {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            host: HostProcesses::new(),
            cuda_version: None,
            banner_read: false,
            apps_warned: false,
            graphics_warned: false,
        }
    }

    /// Run one Idle → Running → Success|Failure transition.
    /// No lock is held while the external tool runs.
    pub async fn cycle(&mut self) -> Result<Arc<Sample>, CycleError> {
        let outcome = self.acquire().await;
        let state = &self.state;
        {
            let mut h = state.health.lock().unwrap_or_else(|p| p.into_inner());
            h.cycles += 1;
            match &outcome {
                Ok(s) => {
                    h.consecutive_failures = 0;
                    h.last_error = None;
                    h.last_success = Some(s.timestamp);
                }
                Err(e) => {
                    h.consecutive_failures = h.consecutive_failures.saturating_add(1);
                    h.last_error = Some(e.to_string());
                }
            }
        }
        match outcome {
            Ok(sample) => {
                let sample = Arc::new(sample);
                state.history.append(HistoryEntry::from(&*sample));
                state.broadcaster.publish(Event::Sample(sample.clone()));
                Ok(sample)
            }
            Err(e) => {
                warn!("sampling failed: {e}");
                state
                    .broadcaster
                    .publish(Event::Status(StatusEvent::error(e.kind(), e.to_string())));
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<Sample, CycleError> {
        let runner: &dyn CommandRunner = self.state.runner.as_ref();
        let timeout = self.state.config.command_timeout;
        let captured_at = Utc::now();

        let device = match runner.run(CommandSpec::QueryDevice, timeout).await {
            Ok(out) => out.stdout,
            Err(e @ InvocationError::ProcessFailed { .. }) => salvage(e)?,
            Err(e) => return Err(CycleError::Invocation(e)),
        };

        let apps = match runner.run(CommandSpec::QueryApps, timeout).await {
            Ok(out) => out.stdout,
            Err(e) => {
                if !self.apps_warned {
                    info!("process query unavailable, reporting no processes: {e}");
                    self.apps_warned = true;
                }
                String::new()
            }
        };

        let graphics_apps = match runner.run(CommandSpec::QueryGraphicsApps, timeout).await {
            Ok(out) => out.stdout,
            Err(e) => {
                if !self.graphics_warned {
                    info!("graphics process query not supported, listing compute processes only: {e}");
                    self.graphics_warned = true;
                }
                String::new()
            }
        };

        if !self.banner_read {
            match runner.run(CommandSpec::DriverBanner, timeout).await {
                Ok(out) => {
                    self.banner_read = true;
                    self.cuda_version = parser::parse_cuda_version(&out.stdout);
                    match &self.cuda_version {
                        Some(v) => info!("CUDA version {v}"),
                        None => info!("driver banner shows no CUDA version"),
                    }
                }
                Err(e) => debug!("cuda version probe failed: {e}"),
            }
        }

        let mut pids = parser::process_pids(&apps);
        pids.extend(parser::process_pids(&graphics_apps));
        let host = self.host.lookup(&pids);
        let raw = RawTelemetry {
            captured_at,
            device,
            apps,
            graphics_apps,
            cuda_version: self.cuda_version.clone(),
            host,
        };
        parser::parse(&raw).map_err(CycleError::Parse)
    }
}

// A failed exit whose stdout still parses is accepted; anything else stays a failure.
fn salvage(e: InvocationError) -> Result<String, CycleError> {
    if let InvocationError::ProcessFailed { stdout, exit_code, .. } = &e {
        let probe = RawTelemetry {
            captured_at: Utc::now(),
            device: stdout.clone(),
            apps: String::new(),
            graphics_apps: String::new(),
            cuda_version: None,
            host: Default::default(),
        };
        if !stdout.trim().is_empty() && parser::parse(&probe).is_ok() {
            warn!(?exit_code, "device query exited non-zero but output parsed; using it");
            return Ok(stdout.clone());
        }
    }
    Err(CycleError::Invocation(e))
}

/// Spawn the scheduling loop. Ends when `shutdown` flips to `true`.
/// Cycles never overlap: an overrun cycle is followed immediately by the next.
pub fn spawn_sampler(state: AppState, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = Sampler::new(state.clone());
        info!("sampler started, interval {:?}", state.interval.get());
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            let _ = sampler.cycle().await;

            // Sleep out the rest of the period; an interval change re-arms the deadline.
            loop {
                let (interval, changed) = state.interval.current_armed();
                let deadline = started + interval;
                if Instant::now() >= deadline {
                    break;
                }
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    _ = changed => continue,
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            info!("sampler stopped");
                            return;
                        }
                    }
                }
            }
        }
        info!("sampler stopped");
    })
}
