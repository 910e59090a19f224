use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::FrameRecord;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Address the detector process connects to.
    pub listen: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { listen: "127.0.0.1:5000".into() }
    }
}

/// Line-delimited JSON frames, one `FrameRecord` per line.
pub enum FrameSource {
    File { reader: BufReader<File>, base_dir: PathBuf },
    Tcp { reader: BufReader<TcpStream>, peer: String },
}

impl FrameSource {
    pub async fn file(path: &Path) -> Result<Self> {
        let f = File::open(path).await.with_context(|| format!("open replay file {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::File { reader: BufReader::new(f), base_dir })
    }

    /// Waits for the next detector connection.
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, addr) = listener.accept().await.context("accept detector connection")?;
        info!("source: detector connected from {}", addr);
        Ok(Self::Tcp { reader: BufReader::new(stream), peer: addr.to_string() })
    }

    /// Next parsable frame, or `None` once the stream ends.
    pub async fn next_frame(&mut self) -> Result<Option<FrameRecord>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = match self {
                FrameSource::File { reader, .. } => reader.read_line(&mut line).await?,
                FrameSource::Tcp { reader, .. } => reader.read_line(&mut line).await?,
            };
            if n == 0 {
                if let FrameSource::Tcp { peer, .. } = self {
                    info!("source: detector {} disconnected", peer);
                }
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_frame_line(trimmed) {
                Some(mut rec) => {
                    if let FrameSource::File { base_dir, .. } = self {
                        if let Some(img) = rec.image.take() {
                            rec.image = Some(if img.is_relative() { base_dir.join(img) } else { img });
                        }
                    }
                    return Ok(Some(rec));
                }
                None => continue,
            }
        }
    }
}

pub fn parse_frame_line(line: &str) -> Option<FrameRecord> {
    match serde_json::from_str::<FrameRecord>(line) {
        Ok(rec) => Some(rec),
        Err(e) => {
            warn!("source: skipping malformed frame line: {}", e);
            None
        }
    }
}

/// Decodes a frame image off the async runtime.
pub async fn load_frame_image(path: &Path) -> Result<RgbImage> {
    let p = path.to_path_buf();
    debug!("source: decoding {}", p.display());
    let img = tokio::task::spawn_blocking(move || image::open(&p))
        .await
        .context("join image decode")?
        .with_context(|| format!("decode frame image {}", path.display()))?;
    Ok(img.to_rgb8())
}
