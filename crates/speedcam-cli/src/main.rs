use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use speedcam_engine::{Calibration, CalibrationConfig, EngineConfig, EngineStats, Frame, SpeedEngine};
use speedcam_sinks::{doctor as sinks_doctor, EventBus, JsonlSink, LiveStatusBoard, SinkStats, SinksConfig, UdpAlertSink};
use speedcam_vision::color::MeanHsvClassifier;
use speedcam_vision::source::{load_frame_image, FrameSource, InputConfig};
use speedcam_vision::{prefilter, FrameRecord, VisionConfig};

#[derive(Debug, Parser)]
#[command(name = "speedcam", version, about = "Vehicle speed estimation from detector output")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate calibration, thresholds and sink paths.
    Doctor,
    /// Print the geometry implied by [calibration].
    CheckCalibration,
    /// Run a recorded JSON-lines session through the engine and sinks.
    Replay { input: PathBuf },
    /// Serve detector connections on [input].listen.
    Listen,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    calibration: CalibrationConfig,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    vision: VisionConfig,
    #[serde(default)]
    input: InputConfig,
    #[serde(default)]
    sinks: SinksConfig,
}

fn load_config(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::CheckCalibration => check_calibration(&cfg)?,
        Command::Replay { input } => replay(&cfg, &cli.config, &input).await?,
        Command::Listen => listen(&cfg, &cli.config).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    Calibration::from_config(&cfg.calibration).context("calibration")?;
    cfg.engine.validate()?;

    let v = &cfg.vision;
    anyhow::ensure!((0.0..=1.0).contains(&v.min_confidence), "vision.min_confidence must be in [0, 1]");
    if let Some(th) = v.nms_iou_threshold {
        anyhow::ensure!(th > 0.0 && th <= 1.0, "vision.nms_iou_threshold must be in (0, 1]");
    }
    anyhow::ensure!(v.max_detections > 0, "vision.max_detections must be positive");
    if v.vehicle_classes.is_empty() {
        warn!("doctor: vision.vehicle_classes is empty, every class will be tracked");
    }

    cfg.input
        .listen
        .parse::<SocketAddr>()
        .with_context(|| format!("input.listen is not host:port: {}", cfg.input.listen))?;
    sinks_doctor::check_sinks(&cfg.sinks)?;

    info!("doctor: OK");
    Ok(())
}

fn check_calibration(cfg: &Config) -> Result<()> {
    let cal = Calibration::from_config(&cfg.calibration).context("calibration")?;
    for line in cal.lines() {
        println!(
            "line {:?}: ({:.1}, {:.1}) -> ({:.1}, {:.1}), {:.1}px",
            line.id,
            line.a.x,
            line.a.y,
            line.b.x,
            line.b.y,
            line.length()
        );
    }
    println!("distance: {:.3} m", cal.distance_m());
    println!("separation: {:.1}px", cal.pixel_separation());
    println!("scale: {:.4} m/px", cal.meters_per_pixel());
    println!("bounded: {}", cal.bounded());
    Ok(())
}

async fn replay(cfg: &Config, config_path: &Path, input: &Path) -> Result<()> {
    let src = FrameSource::file(input).await?;
    let mut pipe = Pipeline::start(cfg).await?;
    let mut hup = Hangup::new()?;
    drive(&mut pipe, src, &mut hup, config_path).await?;
    pipe.finish().await.print();
    Ok(())
}

async fn listen(cfg: &Config, config_path: &Path) -> Result<()> {
    let listener = TcpListener::bind(&cfg.input.listen)
        .await
        .with_context(|| format!("bind {}", cfg.input.listen))?;
    info!("listen: waiting for detector on {}", cfg.input.listen);

    let mut pipe = Pipeline::start(cfg).await?;
    let mut hup = Hangup::new()?;
    loop {
        tokio::select! {
            conn = FrameSource::accept(&listener) => {
                match conn {
                    Ok(src) => {
                        if drive(&mut pipe, src, &mut hup, config_path).await? == Ended::Interrupted {
                            break;
                        }
                    }
                    Err(e) => warn!("listen: {:#}", e),
                }
            }
            _ = hup.recv() => pipe.reload(config_path),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    pipe.finish().await.print();
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Ended {
    SourceClosed,
    Interrupted,
}

/// Feeds frames from `src` until it ends or the process is interrupted.
/// A SIGHUP between frames re-reads the calibration.
async fn drive(pipe: &mut Pipeline, src: FrameSource, hup: &mut Hangup, config_path: &Path) -> Result<Ended> {
    let (mut frames, reader) = spawn_reader(src);
    let ended = loop {
        tokio::select! {
            rec = frames.recv() => match rec {
                Some(rec) => pipe.feed(rec).await,
                None => break Ended::SourceClosed,
            },
            _ = hup.recv() => pipe.reload(config_path),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ended::Interrupted;
            }
        }
    };
    if ended == Ended::Interrupted {
        reader.abort();
    } else if let Ok(Err(e)) = reader.await {
        warn!("source: {:#}", e);
    }
    Ok(ended)
}

// line reads are not cancel-safe, so they stay off the select loop
fn spawn_reader(mut src: FrameSource) -> (mpsc::Receiver<FrameRecord>, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move {
        while let Some(rec) = src.next_frame().await? {
            if tx.send(rec).await.is_err() {
                break;
            }
        }
        Ok(())
    });
    (rx, handle)
}

struct Pipeline {
    engine: SpeedEngine,
    vision: VisionConfig,
    bus: EventBus,
    sinks: Vec<(&'static str, JoinHandle<SinkStats>)>,
    events: u64,
    over_speed: u64,
}

impl Pipeline {
    async fn start(cfg: &Config) -> Result<Self> {
        let calibration = Calibration::from_config(&cfg.calibration).context("calibration")?;
        cfg.engine.validate()?;
        let engine = SpeedEngine::new(cfg.engine.clone(), calibration, Box::new(MeanHsvClassifier));

        let s = &cfg.sinks;
        let bus = match s.bus_capacity {
            Some(cap) => EventBus::new(cap),
            None => EventBus::default(),
        };
        let mut sinks = Vec::new();
        if s.persistence.enabled {
            sinks.push(("persist", bus.spawn(JsonlSink::open(&s.persistence.path).await?)));
        }
        if s.alert.enabled {
            match UdpAlertSink::bind(&s.alert.bind, &s.alert.target).await {
                Ok(sink) => sinks.push(("alert", bus.spawn(sink))),
                Err(e) => warn!("alert: disabled: {:#}", e),
            }
        }
        if s.live_status.enabled {
            let ttl = Duration::from_secs_f64(s.live_status.ttl_s.max(0.0));
            sinks.push(("live", bus.spawn(LiveStatusBoard::new(s.live_status.snapshot_path.clone(), ttl))));
        }
        if sinks.is_empty() {
            warn!("no sinks enabled, events are only logged");
        }

        Ok(Self { engine, vision: cfg.vision.clone(), bus, sinks, events: 0, over_speed: 0 })
    }

    async fn feed(&mut self, rec: FrameRecord) {
        let image = match &rec.image {
            Some(p) => match load_frame_image(p).await {
                Ok(img) => Some(Arc::new(img)),
                Err(e) => {
                    warn!("{:#}; no color sample from this frame", e);
                    None
                }
            },
            None => None,
        };
        let mut frame = Frame::new(rec.ts, prefilter(rec.detections, &self.vision));
        frame.image = image;

        match self.engine.process_frame(frame) {
            Ok(report) => {
                for ev in report.events {
                    self.events += 1;
                    if ev.over_speed {
                        self.over_speed += 1;
                    }
                    self.bus.publish(ev);
                }
            }
            Err(e) => warn!("frame rejected: {}", e),
        }
    }

    fn reload(&mut self, config_path: &Path) {
        let cal = match load_config(config_path) {
            Ok(cfg) => cfg.calibration,
            Err(e) => {
                warn!("reload: {:#}; keeping current calibration", e);
                return;
            }
        };
        match self.engine.stage_calibration_config(&cal) {
            Ok(()) => info!("reload: calibration staged for the next frame"),
            Err(e) => warn!("reload: {}; keeping current calibration", e),
        }
    }

    async fn finish(self) -> Summary {
        let Pipeline { engine, bus, sinks, events, over_speed, .. } = self;
        drop(bus);
        let mut per_sink = Vec::with_capacity(sinks.len());
        for (name, handle) in sinks {
            match handle.await {
                Ok(stats) => per_sink.push((name, stats)),
                Err(e) => warn!("{}: task failed: {}", name, e),
            }
        }
        Summary { stats: engine.stats(), live_tracks: engine.live_tracks(), events, over_speed, sinks: per_sink }
    }
}

struct Summary {
    stats: EngineStats,
    live_tracks: usize,
    events: u64,
    over_speed: u64,
    sinks: Vec<(&'static str, SinkStats)>,
}

impl Summary {
    fn print(&self) {
        let s = &self.stats;
        println!("frames: {} processed, {} rejected", s.frames_processed, s.frames_rejected);
        println!("detections dropped: {}", s.detections_dropped);
        println!(
            "tracks: {} created, {} completed, {} lost, {} still live",
            s.tracks_created, s.tracks_completed, s.tracks_lost, self.live_tracks
        );
        println!("events: {} ({} over limit, {} suppressed)", self.events, self.over_speed, s.events_suppressed);
        for (name, st) in &self.sinks {
            println!("sink {}: {} delivered, {} failed, {} skipped", name, st.delivered, st.failed, st.lagged);
        }
    }
}

#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::hangup()).context("install SIGHUP handler")?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
