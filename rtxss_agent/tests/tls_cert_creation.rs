//! `--enableSSL` against a private XDG_CONFIG_HOME: first start generates the
//! pair, a restart serves the same one.

use assert_cmd::prelude::*;
use std::fs;
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

fn start_agent(config_home: &Path) -> Child {
    Command::cargo_bin("rtxss_agent")
        .expect("binary exists")
        .env("XDG_CONFIG_HOME", config_home)
        .env("RUST_LOG", "warn")
        .args(["--enableSSL", "-p", "0", "--smi", "/nonexistent/nvidia-smi"])
        .spawn()
        .expect("spawn agent")
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn certificate_is_generated_once_and_reused_on_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("rtxss_agent").join("tls");
    let (cert_path, key_path) = (dir.join("cert.pem"), dir.join("key.pem"));

    let agent = start_agent(tmp.path());
    let start = Instant::now();
    // cert is written last
    while !cert_path.exists() && start.elapsed() < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(50));
    }
    std::thread::sleep(Duration::from_millis(200));
    stop(agent);

    let cert = fs::read_to_string(&cert_path).expect("cert generated");
    let key = fs::read_to_string(&key_path).expect("key generated");
    assert!(cert.contains("BEGIN CERTIFICATE"), "cert is not PEM");
    assert!(key.contains("PRIVATE KEY"), "key is not PEM");

    // a fresh keypair would differ, so equality means the pair was reused
    let agent = start_agent(tmp.path());
    std::thread::sleep(Duration::from_millis(800));
    stop(agent);
    assert_eq!(fs::read_to_string(&cert_path).unwrap(), cert);
    assert_eq!(fs::read_to_string(&key_path).unwrap(), key);
}
