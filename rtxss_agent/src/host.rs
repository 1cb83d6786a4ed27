//! Host-side process lookup (short name + resident memory) via sysinfo.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::parser::{HostMemory, HostProcess};

pub struct HostProcesses {
    sys: System,
}

impl HostProcesses {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    /// Refresh only the given pids; unknown or vanished pids are simply absent.
    pub fn lookup(&mut self, pids: &[u32]) -> HostMemory {
        self.sys.refresh_memory();
        let mut out = HostMemory {
            total_bytes: self.sys.total_memory(),
            ..HostMemory::default()
        };
        if pids.is_empty() {
            return out;
        }
        let wanted: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&wanted),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        for pid in &wanted {
            if let Some(p) = self.sys.process(*pid) {
                out.processes.insert(
                    pid.as_u32(),
                    HostProcess {
                        name: p.name().to_string_lossy().into_owned(),
                        mem_bytes: p.memory(),
                    },
                );
            }
        }
        out
    }
}

impl Default for HostProcesses {
    fn default() -> Self {
        Self::new()
    }
}
