//! Development certificate probe.
//!
//! The refresh endpoint upgrades to `wss://` when a local development
//! certificate is verified available: `DEVLOOP_TLS_CERT` / `DEVLOOP_TLS_KEY`
//! name PEM files that must load and parse within a bounded timeout. Probe
//! failure or timeout falls back to the insecure transport.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rustls::ServerConfig;

/// Bound on the certificate probe.
pub(super) const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe for a usable development certificate.
///
/// Returns the TLS acceptor config when the probe verifies one, `None` for
/// the insecure fallback. Never fails the broker start.
pub(super) fn probe_dev_certificate(timeout: Duration) -> Option<Arc<ServerConfig>> {
    let cert = PathBuf::from(std::env::var_os("DEVLOOP_TLS_CERT")?);
    let key = PathBuf::from(std::env::var_os("DEVLOOP_TLS_KEY")?);

    // Cert material may sit on a slow or wedged mount; the probe is bounded
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(load_server_config(&cert, &key));
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(config)) => {
            crate::debug!("refresh"; "development certificate verified, using wss");
            Some(Arc::new(config))
        }
        Ok(Err(e)) => {
            crate::warn!("refresh"; "development certificate unusable ({}), using ws", e);
            None
        }
        Err(_) => {
            crate::warn!("refresh"; "certificate probe timed out after {}s, using ws", timeout.as_secs());
            None
        }
    }
}

fn load_server_config(cert: &PathBuf, key: &PathBuf) -> Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert).with_context(|| format!("failed to open {}", cert.display()))?,
    ))
    .collect::<std::io::Result<Vec<_>>>()
    .context("failed to parse certificate chain")?;

    if certs.is_empty() {
        anyhow::bail!("no certificates in {}", cert.display());
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key).with_context(|| format!("failed to open {}", key.display()))?,
    ))
    .context("failed to parse private key")?
    .with_context(|| format!("no private key in {}", key.display()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate rejected")
}
