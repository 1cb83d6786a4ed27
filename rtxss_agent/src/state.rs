//! Shared agent state: the one application context handed to every request
//! handler. Built once at startup; the sampler lifecycle is explicit.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::AgentConfig;
use crate::control::PowerControl;
use crate::history::HistoryStore;
use crate::invoker::{CommandRunner, SmiRunner};
use crate::sampler::{spawn_sampler, PollInterval, SamplerHealth};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub runner: Arc<dyn CommandRunner>,

    // Only these two are mutated concurrently; each has its own lock
    pub history: Arc<HistoryStore>,
    pub broadcaster: Arc<Broadcaster>,

    pub interval: Arc<PollInterval>,
    pub health: Arc<Mutex<SamplerHealth>>,
    pub control: Arc<PowerControl>,

    shutdown: Arc<watch::Sender<bool>>,
    sampler: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// Context backed by the real `nvidia-smi`.
    pub fn new(config: AgentConfig) -> Self {
        let runner = Arc::new(SmiRunner::new(
            config.smi_path.clone(),
            config.gpu_index,
            config.elevate.clone(),
        ));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: AgentConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            history: Arc::new(HistoryStore::new(config.history_capacity)),
            broadcaster: Arc::new(Broadcaster::new(config.queue_capacity)),
            interval: Arc::new(PollInterval::new(config.interval)),
            health: Arc::new(Mutex::new(SamplerHealth::default())),
            control: Arc::new(PowerControl::new(runner.clone(), config.command_timeout)),
            runner,
            config: Arc::new(config),
            shutdown: Arc::new(shutdown),
            sampler: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the sampling loop. No-op if it is already running.
    pub fn start(&self) {
        let mut slot = self.sampler.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shutdown.send_replace(false);
        *slot = Some(spawn_sampler(self.clone(), self.shutdown.subscribe()));
    }

    /// Signal the loop to stop and wait for it. A cycle in flight finishes first.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self
            .sampler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(h) = handle {
            let _ = h.await;
            info!("sampler joined");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sampler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Register a live client; see [`Broadcaster::subscribe`].
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe(&self.history)
    }

    pub fn health(&self) -> SamplerHealth {
        self.health
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}
