use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;

use crate::SinksConfig;

pub fn check_sinks(cfg: &SinksConfig) -> Result<()> {
    if let Some(cap) = cfg.bus_capacity {
        anyhow::ensure!(cap >= 1, "sinks.bus_capacity must be at least 1");
    }
    if cfg.persistence.enabled {
        check_output_file(&cfg.persistence.path, "sinks.persistence.path")?;
    }
    if cfg.alert.enabled {
        cfg.alert
            .target
            .parse::<SocketAddr>()
            .with_context(|| format!("sinks.alert.target is not host:port: {}", cfg.alert.target))?;
        cfg.alert
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("sinks.alert.bind is not host:port: {}", cfg.alert.bind))?;
    }
    if cfg.live_status.enabled {
        let ttl = cfg.live_status.ttl_s;
        anyhow::ensure!(ttl.is_finite() && ttl > 0.0, "sinks.live_status.ttl_s must be positive");
        if let Some(p) = &cfg.live_status.snapshot_path {
            check_output_file(p, "sinks.live_status.snapshot_path")?;
        }
    }
    Ok(())
}

fn check_output_file(p: &Path, key: &str) -> Result<()> {
    if p.exists() {
        anyhow::ensure!(p.is_file(), "{} is not a file: {}", key, p.display());
    }
    if let Some(dir) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        if dir.exists() {
            anyhow::ensure!(dir.is_dir(), "{} parent is not a dir: {}", key, dir.display());
        }
    }
    Ok(())
}
