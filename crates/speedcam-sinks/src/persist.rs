use anyhow::{Context, Result};
use serde::Serialize;
use speedcam_proto::SpeedEvent;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

use crate::bus::Sink;

#[derive(Serialize)]
struct Record<'a> {
    #[serde(flatten)]
    event: &'a SpeedEvent,
    recorded_unix_ms: i64,
}

/// Appends one JSON object per event to a JSON-lines file.
pub struct JsonlSink {
    path: PathBuf,
    file: fs::File,
}

impl JsonlSink {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.with_context(|| format!("create {}", dir.display()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        info!("persist: appending events to {}", path.display());
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, ev: &SpeedEvent, recorded_unix_ms: i64) -> Result<()> {
        let mut line = serde_json::to_vec(&Record { event: ev, recorded_unix_ms })?;
        line.push(b'\n');
        self.file.write_all(&line).await.with_context(|| format!("write {}", self.path.display()))?;
        self.file.flush().await?;
        debug!("persist: track {} written", ev.track_id);
        Ok(())
    }
}

impl Sink for JsonlSink {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn handle(&mut self, ev: &SpeedEvent) -> Result<()> {
        self.append(ev, crate::unix_ms()).await
    }
}
