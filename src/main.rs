use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use glob::glob;
use image::{GrayImage, RgbaImage};
use serde::Serialize;
use serde_json::to_writer_pretty;
use stereo_decode::decoder::StreamInfo;
use stereo_decode::input::{Input, InputMode, StreamSelector};
use stereo_decode::media_object::MediaObject;
use stereo_decode::observability::{MetricsCollector, log_snapshot};
#[cfg(feature = "metrics-server")]
use stereo_decode::observability::server::MetricsServer;
use stereo_decode::parameters::Parameters;
use stereo_decode::session::{Session, SessionOptions};
use stereo_decode::versions::library_versions;
use stereo_decode::video::{PixelLayout, StereoLayout, VideoFrame, stereo_layout_to_string};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
#[cfg(feature = "metrics-server")]
use std::net::SocketAddr;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let otlp_endpoint_for_tracing = match &cli.command {
        Commands::Play { otlp_endpoint, .. } => otlp_endpoint.clone(),
        _ => None,
    };

    configure_tracing(otlp_endpoint_for_tracing.as_deref())?;

    let command_result = match cli.command {
        Commands::Probe { inputs, json } => probe(&inputs, json),
        Commands::Extract {
            source,
            frame,
            output_dir,
            png,
        } => extract(&source, frame, &output_dir, png),
        Commands::Play {
            source,
            audio,
            subtitles,
            max_frames,
            start_at,
            audio_blob_size,
            frame_digests,
            report,
            print_metrics,
            metrics_json,
            metrics_prometheus,
            metrics_listen,
            otlp_endpoint,
        } => {
            let _ = otlp_endpoint; // already handled in tracing configuration
            play(PlayArgs {
                source,
                audio,
                subtitles,
                options: SessionOptions {
                    max_units: max_frames,
                    audio_blob_size,
                    start_at: start_at.map(|seconds| (seconds * 1_000_000.0) as i64),
                    frame_digests,
                },
                report,
                print_metrics,
                metrics_json,
                metrics_prometheus,
                metrics_listen,
            })
        }
        Commands::Params { action } => params_command(action),
        Commands::Versions => {
            for (component, version) in library_versions() {
                println!("{component} {version}");
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut io::stdout());
            Ok(())
        }
    };

    #[cfg(feature = "otel")]
    if otlp_endpoint_for_tracing.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    command_result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer =
                opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                        vec![KeyValue::new("service.name", "stereo-decode")],
                    )))
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint),
                    )
                    .install_simple()?;

            tracing_subscriber::registry()
                .with(filter.clone())
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
        } else {
            tracing_subscriber::registry()
                .with(filter.clone())
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
        }
    }

    #[cfg(not(feature = "otel"))]
    {
        if let Some(endpoint) = otlp_endpoint {
            eprintln!(
                "warning: --otlp-endpoint '{}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel.",
                endpoint
            );
        }

        tracing_subscriber::registry()
            .with(filter.clone())
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    url: String,
    backend: &'static str,
    tags: Vec<(String, String)>,
    streams: Vec<StreamInfo>,
}

fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::new();
    for pattern in patterns {
        let matches =
            glob(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))?;
        let mut found = false;
        for entry in matches {
            let path = entry?;
            if path.is_file() {
                resolved.push(path);
                found = true;
            }
        }
        if !found {
            bail!("No inputs matched pattern: {pattern}");
        }
    }
    Ok(resolved)
}

fn url_of(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("Path is not valid UTF-8: {}", path.display()))
}

fn probe(patterns: &[String], json: bool) -> Result<()> {
    let mut reports = Vec::new();
    for path in expand_inputs(patterns)? {
        let url = url_of(&path)?;
        let media =
            MediaObject::open(url).with_context(|| format!("Failed to open {}", path.display()))?;
        let report = ProbeReport {
            url: url.to_string(),
            backend: media.backend_name(),
            tags: media.tags().to_vec(),
            streams: media.stream_info().to_vec(),
        };
        if !json {
            print_probe(&report);
        }
        reports.push(report);
    }
    if json {
        to_writer_pretty(io::stdout(), &reports).context("Failed to write probe JSON")?;
        println!();
    }
    Ok(())
}

fn print_probe(report: &ProbeReport) {
    println!("{} ({})", report.url, report.backend);
    for (key, value) in &report.tags {
        println!("  tag {key}={value}");
    }
    for (index, stream) in report.streams.iter().enumerate() {
        match stream {
            StreamInfo::Video {
                template,
                frame_rate,
                duration,
            } => println!(
                "  stream {index}: video {} ({}), {}/{} fps, stereo {}, {:.3}s",
                template.format_name(),
                template.format_info(),
                frame_rate.0,
                frame_rate.1,
                stereo_layout_to_string(template.stereo_layout, template.stereo_layout_swap),
                *duration as f64 / 1_000_000.0
            ),
            StreamInfo::Audio { template, duration } => println!(
                "  stream {index}: audio {} ({}), {:.3}s",
                template.format_name(),
                template.format_info(),
                *duration as f64 / 1_000_000.0
            ),
            StreamInfo::Subtitles { template } => println!(
                "  stream {index}: subtitles {} ({}){}",
                template.format_name(),
                template.format_info(),
                if template.language.is_empty() {
                    String::new()
                } else {
                    format!(", language {}", template.language)
                }
            ),
        }
    }
}

#[derive(Debug, clap::Args)]
struct SourceArgs {
    /// Video source (left view in separate mode).
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
    /// Right-view video source; implies separate mode.
    #[arg(long, value_hint = ValueHint::FilePath)]
    right: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = InputMode::Automatic)]
    mode: InputMode,
    #[arg(long)]
    swap_eyes: bool,
}

/// Opens the sources and selects streams the way a player would: the first
/// video stream of each video source, and the first audio stream of the
/// primary source or of `audio`.
fn open_input(
    source: &SourceArgs,
    audio: Option<&Path>,
    metrics: &MetricsCollector,
) -> Result<Input> {
    let open = |path: &Path| -> Result<MediaObject> {
        let media = MediaObject::open(url_of(path)?)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(media.with_metrics(metrics.clone()))
    };

    let mut media = vec![open(&source.input)?];
    let video0 = (media[0].video_streams() > 0).then(|| StreamSelector::new(0, 0));
    let video1 = match &source.right {
        Some(path) => {
            let right = open(path)?;
            if right.video_streams() == 0 {
                bail!("{} has no video stream", path.display());
            }
            media.push(right);
            Some(StreamSelector::new(media.len() - 1, 0))
        }
        None => None,
    };
    let audio = match audio {
        Some(path) => {
            let extra = open(path)?;
            if extra.audio_streams() == 0 {
                bail!("{} has no audio stream", path.display());
            }
            media.push(extra);
            Some(StreamSelector::new(media.len() - 1, 0))
        }
        None => (media[0].audio_streams() > 0).then(|| StreamSelector::new(0, 0)),
    };
    Input::open(media, video0, video1, audio, source.mode, source.swap_eyes)
        .context("Failed to set up input")
}

fn extract(source: &SourceArgs, frame_index: usize, output_dir: &Path, png: bool) -> Result<()> {
    let mut input = open_input(source, None, &MetricsCollector::new())?;
    if !input.has_video() {
        bail!("{} has no video stream", source.input.display());
    }

    let mut frame = None;
    for _ in 0..=frame_index {
        input.start_video_frame_read()?;
        frame = input.finish_video_frame_read()?;
        if frame.is_none() {
            break;
        }
    }
    let frame = frame.ok_or_else(|| {
        anyhow!("{} ends before frame {frame_index}", source.input.display())
    })?;
    input.close();

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    let views = if frame.stereo_layout == StereoLayout::Mono { 1 } else { 2 };
    for view in 0..views {
        let mut planes = Vec::new();
        for plane in 0..frame.layout.plane_count() {
            let geometry = frame.plane_geometry(plane)?;
            let mut buffer = vec![0u8; geometry.size()];
            frame.copy_plane(view, plane, &mut buffer)?;
            let path = output_dir.join(format!("view{view}-plane{plane}.raw"));
            fs::write(&path, &buffer)
                .with_context(|| format!("Failed to write plane: {}", path.display()))?;
            info!(
                path = %path.display(),
                row_width = geometry.row_width,
                row_size = geometry.row_size,
                lines = geometry.lines,
                "Plane written"
            );
            planes.push((geometry, buffer));
        }
        if png {
            let path = output_dir.join(format!("view{view}.png"));
            write_preview(&frame, &planes[0].1, planes[0].0.row_size, &path)?;
            info!(path = %path.display(), "Preview written");
        }
    }
    println!(
        "Extracted {} view(s) of frame {frame_index} ({}) at {} us into {}",
        views,
        frame.format_name(),
        frame.presentation_time,
        output_dir.display()
    );
    Ok(())
}

/// Writes the first plane of a view as PNG: colour for BGRA, luma otherwise.
fn write_preview(frame: &VideoFrame, plane: &[u8], row_size: usize, path: &Path) -> Result<()> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let rows = plane.chunks(row_size).take(height as usize);
    let result = if frame.layout == PixelLayout::Bgra32 {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for row in rows {
            for bgra in row[..width as usize * 4].chunks_exact(4) {
                pixels.extend_from_slice(&[bgra[2], bgra[1], bgra[0], bgra[3]]);
            }
        }
        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("Plane too small for a {width}x{height} image"))?;
        image.save(path)
    } else {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for row in rows {
            pixels.extend_from_slice(&row[..width as usize]);
        }
        let image = GrayImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("Plane too small for a {width}x{height} image"))?;
        image.save(path)
    };
    result.with_context(|| format!("Failed to write preview: {}", path.display()))
}

struct PlayArgs {
    source: SourceArgs,
    audio: Option<PathBuf>,
    subtitles: Option<PathBuf>,
    options: SessionOptions,
    report: Option<PathBuf>,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
    metrics_listen: Option<String>,
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn play(args: PlayArgs) -> Result<()> {
    let metrics = MetricsCollector::new();

    #[cfg(feature = "metrics-server")]
    let metrics_server = if let Some(addr_str) = &args.metrics_listen {
        let addr: SocketAddr = addr_str
            .parse()
            .with_context(|| format!("Invalid metrics listen address: {addr_str}"))?;
        let server = MetricsServer::start(addr, metrics.clone())?;
        info!(address = %server.address(), "Metrics server listening");
        Some(server)
    } else {
        None
    };

    #[cfg(not(feature = "metrics-server"))]
    if let Some(addr_str) = &args.metrics_listen {
        warn!(
            "Metrics server feature not enabled; ignoring --metrics-listen={}.",
            addr_str
        );
    }

    let input = open_input(&args.source, args.audio.as_deref(), &metrics)?;
    let mut session = Session::new(input, metrics.clone(), args.options);
    if let Some(path) = &args.subtitles {
        let source = MediaObject::open(url_of(path)?)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .with_metrics(metrics.clone());
        if source.subtitle_streams() == 0 {
            warn!(path = %path.display(), "Source has no subtitle stream");
        }
        session = session.with_subtitles(source);
    }
    let report = session.run()?;

    println!(
        "{} frame(s), {} audio blob(s), {} subtitle list(s) in {:.1} ms",
        report.video.frames, report.audio.blobs, report.subtitles.lists, report.wall_time_ms
    );
    if report.video.non_monotonic > 0 {
        warn!(
            frames = report.video.non_monotonic,
            "Frames with non-increasing timestamps"
        );
    }

    if let Some(path) = &args.report {
        create_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        to_writer_pretty(file, &report)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
        info!(report = %path.display(), "Session report written");
    }

    let snapshot = metrics.snapshot();
    if args.print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = &args.metrics_json {
        create_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = &args.metrics_prometheus {
        create_parent(path)?;
        fs::write(path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }

    #[cfg(feature = "metrics-server")]
    if let Some(mut server) = metrics_server {
        server.stop();
    }

    Ok(())
}

fn params_command(action: ParamsCommands) -> Result<()> {
    match action {
        ParamsCommands::Show { file } => {
            let params = Parameters::load(&file)?;
            print!("{}", params.to_yaml()?);
            Ok(())
        }
        ParamsCommands::Normalize { file, output } => {
            let mut params = Parameters::load(&file)?;
            params.set_defaults();
            match output {
                Some(path) => {
                    params.save(&path)?;
                    info!(output = %path.display(), "Normalized parameters written");
                }
                None => print!("{}", params.to_yaml()?),
            }
            Ok(())
        }
    }
}

#[derive(Parser)]
#[command(
    name = "stereo-decode",
    version,
    about = "Stereoscopic video decode pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the streams of one or more sources (glob patterns allowed).
    Probe {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Write the per-view planes of one frame.
    Extract {
        #[command(flatten)]
        source: SourceArgs,
        /// Zero-based frame number.
        #[arg(long, default_value_t = 0)]
        frame: usize,
        #[arg(long = "output-dir", value_hint = ValueHint::DirPath)]
        output_dir: PathBuf,
        /// Also write a PNG preview of each view.
        #[arg(long)]
        png: bool,
    },
    /// Decode a source the way a player would and report the result.
    Play {
        #[command(flatten)]
        source: SourceArgs,
        /// Audio from a separate file.
        #[arg(long, value_hint = ValueHint::FilePath)]
        audio: Option<PathBuf>,
        #[arg(long, value_hint = ValueHint::FilePath)]
        subtitles: Option<PathBuf>,
        #[arg(long = "max-frames")]
        max_frames: Option<usize>,
        /// Start position in seconds.
        #[arg(long = "start-at")]
        start_at: Option<f64>,
        #[arg(long = "audio-blob-size", default_value_t = 16 * 1024)]
        audio_blob_size: usize,
        #[arg(long = "frame-digests")]
        frame_digests: bool,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
        #[arg(long = "metrics-listen")]
        metrics_listen: Option<String>,
        #[arg(long = "otlp-endpoint")]
        otlp_endpoint: Option<String>,
    },
    /// Inspect or normalize a parameters file.
    Params {
        #[command(subcommand)]
        action: ParamsCommands,
    },
    /// Print component versions.
    Versions,
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ParamsCommands {
    Show {
        file: PathBuf,
    },
    Normalize {
        file: PathBuf,
        /// Write here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}
