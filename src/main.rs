//! Command-line driver: one upload → generate cycle, then pointer samples.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use dialup::client::{self, GenerateClient, UploadClient};
use dialup::config::{Configuration, ModeKind};
use dialup::events::{PointerSample, SessionCommand, SessionEvent, VariantMatrix};
use dialup::selection::SelectionController;
use dialup::tasks::session;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Drag,
    Orbit,
}

impl From<ModeArg> for ModeKind {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Drag => ModeKind::Drag,
            ModeArg::Orbit => ModeKind::Orbit,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "dialup",
    version,
    about = "Upload a photo, fetch its brightness/contrast variants and steer the selector"
)]
struct Args {
    /// Source image to upload
    #[arg(value_name = "IMAGE")]
    image: PathBuf,
    /// Path to YAML config (defaults apply when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Free-text generation target; the configured default when omitted
    #[arg(long, value_name = "TEXT")]
    target: Option<String>,
    /// Interaction mode used to map pointer samples onto variants
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Pointer sample as `X,Y`; repeatable, applied in order
    #[arg(long = "point", value_name = "X,Y", value_parser = parse_point, allow_hyphen_values = true)]
    points: Vec<PointerSample>,
    /// Write every decoded variant to `DIR/variant-<index>.jpg`
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn parse_point(raw: &str) -> Result<PointerSample, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got {raw:?}"))?;
    let x: f64 = x.trim().parse().map_err(|err| format!("bad X in {raw:?}: {err}"))?;
    let y: f64 = y.trim().parse().map_err(|err| format!("bad Y in {raw:?}: {err}"))?;
    Ok(PointerSample::new(x, y))
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let level = match verbosity {
        0 => None,
        1 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    };
    if let Some(level) = level {
        filter = filter.add_directive(format!("dialup={level}").parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let mut cfg = match &args.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    if let Some(mode) = args.mode {
        cfg.selection.mode = mode.into();
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!(
        endpoint = %cfg.endpoint.base_url,
        upload_timeout = %humantime::format_duration(cfg.upload.timeout),
        generate_timeout = %humantime::format_duration(cfg.generate.timeout),
        "configuration ready"
    );
    tracing::debug!("effective configuration:\n{cfg:#?}");

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let mime_hint = image::ImageFormat::from_path(&args.image)
        .ok()
        .map(|format| format.to_mime_type().to_string());

    let http = client::http_client(&cfg.endpoint)?;
    let upload = UploadClient::from_config(http.clone(), &cfg)?;
    let generate = GenerateClient::from_config(http, &cfg);
    let controller =
        SelectionController::new(cfg.selection.interaction_mode(), cfg.selection.neutral_tolerance);

    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(16);
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(16);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let session_task = tokio::spawn(session::run(
        cmd_rx,
        event_tx,
        cancel.clone(),
        upload,
        generate,
        controller,
    ));

    let outcome = drive(&args, bytes, mime_hint, &cmd_tx, &mut event_rx).await;

    // closing the command channel lets the session drain and stop
    drop(cmd_tx);
    while let Some(event) = event_rx.recv().await {
        print_event(&event);
    }
    cancel.cancel();
    match session_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("session error: {e:?}"),
        Err(e) => tracing::error!("join error: {e}"),
    }
    outcome
}

async fn drive(
    args: &Args,
    bytes: Vec<u8>,
    mime_hint: Option<String>,
    cmd_tx: &Sender<SessionCommand>,
    event_rx: &mut Receiver<SessionEvent>,
) -> Result<()> {
    send(cmd_tx, SessionCommand::Upload { bytes, mime_hint }).await?;
    let handle = loop {
        match next_event(event_rx).await? {
            SessionEvent::Uploaded { handle, preview } => {
                println!(
                    "uploaded {} as {handle} (preview: {})",
                    args.image.display(),
                    if preview.is_some() { "yes" } else { "no" }
                );
                break handle;
            }
            SessionEvent::Failed { kind, message } => bail!("upload failed ({kind:?}): {message}"),
            other => print_event(&other),
        }
    };

    send(
        cmd_tx,
        SessionCommand::Generate {
            target: args.target.clone(),
        },
    )
    .await?;
    let matrix = loop {
        match next_event(event_rx).await? {
            SessionEvent::Populated { matrix, index, .. } => {
                print_matrix(&matrix, index);
                break matrix;
            }
            SessionEvent::Failed { kind, message } => {
                bail!("generate for {handle} failed ({kind:?}): {message}")
            }
            other => print_event(&other),
        }
    };

    if let Some(dir) = &args.output_dir {
        write_variants(dir, &matrix)?;
    }

    if !args.points.is_empty() {
        println!("applying {} pointer samples", args.points.len());
        session::feed_pointer_samples(cmd_tx, event_rx, &args.points, print_event).await?;
    }
    Ok(())
}

async fn send(cmd_tx: &Sender<SessionCommand>, cmd: SessionCommand) -> Result<()> {
    cmd_tx
        .send(cmd)
        .await
        .map_err(|_| anyhow::anyhow!("session stopped unexpectedly"))
}

async fn next_event(event_rx: &mut Receiver<SessionEvent>) -> Result<SessionEvent> {
    match event_rx.recv().await {
        Some(event) => Ok(event),
        None => bail!("session stopped before answering"),
    }
}

fn print_matrix(matrix: &VariantMatrix, initial: usize) {
    println!(
        "{} variants on a {side}x{side} grid",
        matrix.len(),
        side = matrix.grid_side()
    );
    for (index, variant) in matrix.iter().enumerate() {
        let marker = if index == initial { '*' } else { ' ' };
        println!(
            "{marker} {index:>3}  b={:.3}  c={:.3}",
            variant.settings.brightness, variant.settings.contrast
        );
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Selected {
            index, settings, ..
        } => println!(
            "  -> variant {index} (b={:.3}, c={:.3})",
            settings.brightness, settings.contrast
        ),
        SessionEvent::Failed { kind, message } => println!("  !! {kind:?}: {message}"),
        SessionEvent::GenerationStarted { generation } => {
            tracing::debug!(generation, "generate dispatched")
        }
        other => tracing::debug!(?other, "session event"),
    }
}

fn write_variants(dir: &Path, matrix: &VariantMatrix) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    for (index, variant) in matrix.iter().enumerate() {
        let bytes = variant
            .image
            .decode_bytes()
            .with_context(|| format!("variant {index} is not valid base64"))?;
        let path = dir.join(format!("variant-{index}.jpg"));
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    tracing::info!(count = matrix.len(), dir = %dir.display(), "wrote variants");
    Ok(())
}
