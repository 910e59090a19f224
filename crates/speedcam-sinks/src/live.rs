//! Latest reading per vehicle color, for the driver-facing display.
//!
//! The board keeps one [`StatusRecord`] per color and mirrors the entries
//! still within their TTL to a JSON file after every update. The file is
//! replaced atomically so a poller never reads a half-written snapshot.

use anyhow::{Context, Result};
use serde::Serialize;
use speedcam_proto::{SpeedEvent, StatusRecord, VehicleColor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::bus::Sink;

#[derive(Serialize)]
struct Snapshot<'a> {
    written_unix_ms: i64,
    vehicles: Vec<&'a StatusRecord>,
}

#[derive(Debug)]
pub struct LiveStatusBoard {
    entries: BTreeMap<VehicleColor, StatusRecord>,
    snapshot_path: Option<PathBuf>,
    ttl: Duration,
}

impl LiveStatusBoard {
    pub fn new(snapshot_path: Option<PathBuf>, ttl: Duration) -> Self {
        Self { entries: BTreeMap::new(), snapshot_path, ttl }
    }

    pub fn record(&mut self, ev: &SpeedEvent, now_ms: i64) -> &StatusRecord {
        let rec = StatusRecord {
            color: ev.color,
            speed: ev.speed,
            unit: ev.unit,
            status: ev.status().to_string(),
            updated_unix_ms: now_ms,
        };
        self.entries.insert(ev.color, rec);
        &self.entries[&ev.color]
    }

    /// Latest record for `color`, unless it is older than `ttl`.
    pub fn lookup(&self, color: VehicleColor, ttl: Duration, now_ms: i64) -> Option<&StatusRecord> {
        let rec = self.entries.get(&color)?;
        let age_ms = now_ms.saturating_sub(rec.updated_unix_ms);
        (age_ms <= ttl.as_millis() as i64).then_some(rec)
    }

    pub fn records(&self) -> impl Iterator<Item = &StatusRecord> {
        self.entries.values()
    }

    /// Records still within the board's TTL at `now_ms`.
    pub fn fresh(&self, now_ms: i64) -> impl Iterator<Item = &StatusRecord> {
        self.entries.keys().filter_map(move |&c| self.lookup(c, self.ttl, now_ms))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn write_snapshot(&self, now_ms: i64) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let body = serde_json::to_vec_pretty(&Snapshot { written_unix_ms: now_ms, vehicles: self.fresh(now_ms).collect() })?;
        write_replace(path, &body).await
    }
}

async fn write_replace(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.with_context(|| format!("create {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).await.with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).await.with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}

impl Sink for LiveStatusBoard {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn handle(&mut self, ev: &SpeedEvent) -> Result<()> {
        let now = crate::unix_ms();
        let rec = self.record(ev, now);
        debug!("live: {} now {} ({:.1} {})", rec.color, rec.status, rec.speed, rec.unit.label());
        self.write_snapshot(now).await
    }
}
