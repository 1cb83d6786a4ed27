//! Scripted stand-in for nvidia-smi shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rtxss_agent::config::AgentConfig;
use rtxss_agent::error::InvocationError;
use rtxss_agent::invoker::{CommandRunner, CommandSpec, RawOutput};
use rtxss_agent::state::AppState;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEVICE_LINE: &str =
    "NVIDIA GeForce RTX 5090, 576.02, 32607, 2275, 7, 3, 41, 34.62, 575.00, 30, 1, 5, 16, 16";
pub const BANNER: &str =
    "| NVIDIA-SMI 576.02      Driver Version: 576.02      CUDA Version: 12.9     |";

pub type Reply = Result<RawOutput, InvocationError>;

pub fn out(stdout: &str) -> Reply {
    Ok(RawOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn timeout() -> Reply {
    Err(InvocationError::Timeout { timeout_ms: 50 })
}

pub fn failed(code: i32, stderr: &str, stdout: &str) -> Reply {
    Err(InvocationError::ProcessFailed {
        exit_code: Some(code),
        stderr: stderr.to_string(),
        stdout: stdout.to_string(),
    })
}

/// Device replies are taken from a script, falling back to `DEVICE_LINE`
/// once the script is exhausted. Every call is recorded.
pub struct ScriptedRunner {
    device: Mutex<VecDeque<Reply>>,
    apps: Mutex<Reply>,
    graphics: Mutex<Reply>,
    banner: Mutex<Reply>,
    power: Mutex<Reply>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            device: Mutex::new(VecDeque::new()),
            apps: Mutex::new(out("")),
            graphics: Mutex::new(out("")),
            banner: Mutex::new(out(BANNER)),
            power: Mutex::new(out("Power limit for GPU 00000000:01:00.0 was set to 500.00 W")),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_device(&self, r: Reply) -> &Self {
        self.device.lock().unwrap().push_back(r);
        self
    }

    pub fn set_apps(&self, r: Reply) {
        *self.apps.lock().unwrap() = r;
    }

    pub fn set_graphics(&self, r: Reply) {
        *self.graphics.lock().unwrap() = r;
    }

    pub fn set_banner(&self, r: Reply) {
        *self.banner.lock().unwrap() = r;
    }

    pub fn set_power(&self, r: Reply) {
        *self.power.lock().unwrap() = r;
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&CommandSpec) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| f(c)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec, _timeout: Duration) -> Result<RawOutput, InvocationError> {
        self.calls.lock().unwrap().push(spec);
        match spec {
            CommandSpec::QueryDevice => self
                .device
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| out(DEVICE_LINE)),
            CommandSpec::QueryApps => self.apps.lock().unwrap().clone(),
            CommandSpec::QueryGraphicsApps => self.graphics.lock().unwrap().clone(),
            CommandSpec::DriverBanner => self.banner.lock().unwrap().clone(),
            CommandSpec::Version => out("NVIDIA-SMI version  : 576.02"),
            CommandSpec::SetPowerLimit { .. } => self.power.lock().unwrap().clone(),
        }
    }
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        interval: Duration::from_millis(100),
        history_capacity: 16,
        queue_capacity: 8,
        ..AgentConfig::default()
    }
}

pub fn scripted_state() -> (AppState, Arc<ScriptedRunner>) {
    let runner = Arc::new(ScriptedRunner::new());
    let state = AppState::with_runner(test_config(), runner.clone());
    (state, runner)
}
