//! Self-signed certificate for `--enableSSL`, generated once and reused.

use std::fs;
use std::path::{Path, PathBuf};

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

/// `$XDG_CONFIG_HOME/rtxss_agent/tls`, else `~/.config/rtxss_agent/tls`.
pub fn tls_dir() -> PathBuf {
    let base = match (std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME")) {
        (Some(xdg), _) if !xdg.is_empty() => PathBuf::from(xdg),
        (_, Some(home)) => PathBuf::from(home).join(".config"),
        _ => PathBuf::from("."),
    };
    base.join("rtxss_agent").join("tls")
}

/// Names the certificate is valid for: this host first, then loopback.
pub fn subject_alt_names(hostname: &str) -> Vec<String> {
    let mut sans: Vec<String> = Vec::new();
    for name in [hostname, "localhost", "127.0.0.1", "::1"] {
        let name = name.trim();
        if !name.is_empty() && !sans.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            sans.push(name.to_string());
        }
    }
    sans
}

pub fn ensure_self_signed_cert() -> anyhow::Result<(PathBuf, PathBuf)> {
    let host = hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_default();
    ensure_cert_in(&tls_dir(), &host)
}

/// Returns the cert/key pair under `dir`, generating it only if either file is missing.
pub fn ensure_cert_in(dir: &Path, hostname: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);
    if cert_path.is_file() && key_path.is_file() {
        tracing::debug!("reusing TLS certificate at {}", cert_path.display());
        return Ok((cert_path, key_path));
    }
    fs::create_dir_all(dir)?;

    let certified = rcgen::generate_simple_self_signed(subject_alt_names(hostname))?;
    fs::write(&key_path, certified.key_pair.serialize_pem())?;
    fs::write(&cert_path, certified.cert.pem())?;

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "generated self-signed TLS certificate"
    );
    Ok((cert_path, key_path))
}
