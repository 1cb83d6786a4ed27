//! Agent configuration: command-line flags with `RTXSS_*` environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 9876;
pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
// one hour at the default interval
pub const DEFAULT_HISTORY: usize = 3_600;
pub const DEFAULT_QUEUE: usize = 16;

pub const USAGE: &str = "Usage: rtxss_agent [--port PORT|-p PORT] [--interval MS] [--timeout MS] \
[--history N] [--queue N] [--gpu INDEX] [--smi PATH] [--elevate \"CMD ARGS\"] [--enableSSL]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub port: u16,
    pub interval: Duration,
    pub command_timeout: Duration,
    pub history_capacity: usize,
    pub queue_capacity: usize,
    pub gpu_index: u32,
    pub smi_path: PathBuf,
    pub elevate: Vec<String>,
    pub enable_ssl: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            command_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            history_capacity: DEFAULT_HISTORY,
            queue_capacity: DEFAULT_QUEUE,
            gpu_index: 0,
            smi_path: PathBuf::from("nvidia-smi"),
            elevate: Vec::new(),
            enable_ssl: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Run(AgentConfig),
    Help,
}

/// Checks an update interval against the supported range.
pub fn validate_interval_ms(ms: i64) -> Result<Duration, ConfigError> {
    if ms < MIN_INTERVAL_MS as i64 || ms > MAX_INTERVAL_MS as i64 {
        return Err(ConfigError::IntervalOutOfRange {
            got: ms,
            min: MIN_INTERVAL_MS,
            max: MAX_INTERVAL_MS,
        });
    }
    Ok(Duration::from_millis(ms as u64))
}

/// Parse process args (first item is the program name). `env` supplies
/// fallbacks; flags win over environment.
pub fn parse_args<I, E>(args: I, env: E) -> Result<Parsed, ConfigError>
where
    I: IntoIterator<Item = String>,
    E: Fn(&str) -> Option<String>,
{
    let mut flags: Vec<(&'static str, String)> = Vec::new();
    let mut enable_ssl = false;

    let mut it = args.into_iter();
    let _ = it.next(); // program name
    while let Some(a) = it.next() {
        let (flag, inline) = match a.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (a.clone(), None),
        };
        let key = match flag.as_str() {
            "-h" | "--help" => return Ok(Parsed::Help),
            "--enableSSL" | "--enable-ssl" => {
                enable_ssl = true;
                continue;
            }
            "--port" | "-p" => "port",
            "--interval" => "interval",
            "--timeout" => "timeout",
            "--history" => "history",
            "--queue" => "queue",
            "--gpu" => "gpu",
            "--smi" => "smi",
            "--elevate" => "elevate",
            _ => return Err(ConfigError::UnexpectedArgument(a)),
        };
        let value = match inline {
            Some(v) => v,
            None => it.next().ok_or_else(|| ConfigError::MissingValue(flag.clone()))?,
        };
        flags.push((key, value));
    }

    let lookup = |key: &str, var: &str| -> Option<String> {
        flags
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .or_else(|| env(var).filter(|v| !v.is_empty()))
    };

    let mut cfg = AgentConfig::default();
    if let Some(v) = lookup("port", "RTXSS_PORT") {
        cfg.port = number("port", &v)?;
    }
    if let Some(v) = lookup("interval", "RTXSS_INTERVAL_MS") {
        cfg.interval = validate_interval_ms(number("interval", &v)?)?;
    }
    if let Some(v) = lookup("timeout", "RTXSS_TIMEOUT_MS") {
        let ms: u64 = number("timeout", &v)?;
        if ms == 0 {
            return Err(ConfigError::InvalidValue { name: "timeout", value: v });
        }
        cfg.command_timeout = Duration::from_millis(ms);
    }
    if let Some(v) = lookup("history", "RTXSS_HISTORY") {
        cfg.history_capacity = number("history", &v)?;
        if cfg.history_capacity == 0 {
            return Err(ConfigError::InvalidValue { name: "history", value: v });
        }
    }
    if let Some(v) = lookup("queue", "RTXSS_QUEUE") {
        cfg.queue_capacity = number("queue", &v)?;
        if cfg.queue_capacity < 2 {
            return Err(ConfigError::InvalidValue { name: "queue", value: v });
        }
    }
    if let Some(v) = lookup("gpu", "RTXSS_GPU_INDEX") {
        cfg.gpu_index = number("gpu", &v)?;
    }
    if let Some(v) = lookup("smi", "RTXSS_SMI") {
        cfg.smi_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("elevate", "RTXSS_ELEVATE") {
        cfg.elevate = v.split_whitespace().map(str::to_string).collect();
    }
    cfg.enable_ssl = enable_ssl
        || env("RTXSS_ENABLE_SSL")
            .map(|v| v != "0" && !v.is_empty())
            .unwrap_or(false);

    Ok(Parsed::Run(cfg))
}

fn number<T: std::str::FromStr>(name: &'static str, v: &str) -> Result<T, ConfigError> {
    v.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name,
        value: v.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("rtxss_agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn run(v: &[&str]) -> AgentConfig {
        match parse_args(args(v), no_env).expect("valid args") {
            Parsed::Run(c) => c,
            Parsed::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(run(&[]), AgentConfig::default());
        assert_eq!(AgentConfig::default().port, 9876);
    }

    #[test]
    fn port_long_short_and_assign() {
        assert_eq!(run(&["--port", "9001"]).port, 9001);
        assert_eq!(run(&["-p", "9002"]).port, 9002);
        assert_eq!(run(&["--port=9003"]).port, 9003);
    }

    #[test]
    fn interval_bounds() {
        assert_eq!(run(&["--interval", "100"]).interval, Duration::from_millis(100));
        assert_eq!(run(&["--interval=10000"]).interval, Duration::from_secs(10));
        assert!(matches!(
            parse_args(args(&["--interval", "99"]), no_env),
            Err(ConfigError::IntervalOutOfRange { got: 99, .. })
        ));
        assert!(validate_interval_ms(10_001).is_err());
        assert!(validate_interval_ms(-1).is_err());
    }

    #[test]
    fn env_fallback_and_flag_precedence() {
        let env: HashMap<&str, &str> = [
            ("RTXSS_PORT", "7000"),
            ("RTXSS_INTERVAL_MS", "250"),
            ("RTXSS_ELEVATE", "sudo -n"),
            ("RTXSS_ENABLE_SSL", "1"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        let Parsed::Run(cfg) = parse_args(args(&["-p", "7001"]), lookup).unwrap() else {
            panic!("expected config");
        };
        assert_eq!(cfg.port, 7001);
        assert_eq!(cfg.interval, Duration::from_millis(250));
        assert_eq!(cfg.elevate, vec!["sudo", "-n"]);
        assert!(cfg.enable_ssl);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            parse_args(args(&["--bogus"]), no_env),
            Err(ConfigError::UnexpectedArgument(_))
        ));
        assert!(matches!(
            parse_args(args(&["--port"]), no_env),
            Err(ConfigError::MissingValue(_))
        ));
        assert!(matches!(
            parse_args(args(&["--port", "abc"]), no_env),
            Err(ConfigError::InvalidValue { name: "port", .. })
        ));
        assert!(parse_args(args(&["--queue", "1"]), no_env).is_err());
        assert!(parse_args(args(&["--timeout", "0"]), no_env).is_err());
        assert!(parse_args(args(&["--history", "0"]), no_env).is_err());
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(parse_args(args(&["--port", "1", "-h"]), no_env), Ok(Parsed::Help));
    }
}
