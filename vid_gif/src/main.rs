use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::{create_spinner, set_fraction, CancellationToken};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};

use vid_gif::{
    spawn_job, ErrorCategory, MediaDescriptor, PipelineConfig, PipelineContext, PipelineError,
    PipelineOutput, PipelinePlan, RotationPolicy, Session, TrimRange, Upload,
};

#[derive(Parser)]
#[command(name = "vid-gif")]
#[command(version, about = "Orientation-aware video trimmer and GIF exporter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args)]
struct PipelineArgs {
    /// JSON file with pipeline settings
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Maximum GIF width in pixels
    #[arg(long, global = true)]
    max_width: Option<u32>,
    /// GIF frame rate
    #[arg(long, global = true)]
    fps: Option<u32>,
    /// GIF palette size (2-256)
    #[arg(long, global = true)]
    colors: Option<u32>,
    /// Let ffmpeg autorotate instead of applying an explicit rotation filter
    #[arg(long, global = true)]
    no_rotate_filter: bool,
    /// Keep the first audio track in MP4 outputs
    #[arg(long, global = true)]
    keep_audio: bool,
    /// Fail on rotation hints that are not a multiple of 90 degrees
    #[arg(long, global = true)]
    strict_rotation: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the metadata of a video
    Probe {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Render the whole clip with corrected orientation
    Preview {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(short, long, default_value = "preview.mp4")]
        output: PathBuf,
    },

    /// Render the selected range as an orientation-corrected MP4
    Subclip {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
        #[arg(short, long, default_value = "subclip.mp4")]
        output: PathBuf,
    },

    /// Export the selected range as a GIF
    Export {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Defaults to 0
        #[arg(long)]
        start: Option<f64>,
        /// Defaults to the clip length or the maximum range, whichever is shorter
        #[arg(long)]
        end: Option<f64>,
        #[arg(short, long, default_value = vid_gif::GIF_FILE_NAME)]
        output: PathBuf,
    },
}

impl PipelineArgs {
    fn to_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(width) = self.max_width {
            config.max_width = width;
        }
        if let Some(fps) = self.fps {
            config.target_fps = fps;
        }
        if let Some(colors) = self.colors {
            config.max_colors = colors;
        }
        if self.no_rotate_filter {
            config.use_external_rotate_filter = false;
        }
        if self.keep_audio {
            config.keep_audio = true;
        }
        if self.strict_rotation {
            config.rotation_policy = RotationPolicy::Strict;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let log_config = if cli.pipeline.verbose {
        LogConfig::default()
            .with_level(Level::DEBUG)
            .with_stderr_level(Level::INFO)
    } else {
        LogConfig::default()
    };
    if let Err(e) = init_logging("vid_gif", log_config) {
        eprintln!("{} could not initialize logging: {:#}", style("warning:").yellow(), e);
    }

    if let Err(e) = run(cli) {
        let code = report(&e);
        std::process::exit(code);
    }
}

fn report(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<PipelineError>() {
        Some(pipeline_error) => {
            error!(
                error = %pipeline_error,
                category = %pipeline_error.category(),
                "Pipeline error"
            );
            eprintln!("{} {}", style("error:").red().bold(), pipeline_error.user_message());
            if !pipeline_error.is_validation() {
                eprintln!("       {}", style(pipeline_error).dim());
            }
            if let Some(hint) = pipeline_error.suggestion() {
                eprintln!("  {} {}", style("hint:").cyan(), hint);
            }
            match pipeline_error.category() {
                ErrorCategory::Recoverable => 1,
                ErrorCategory::Fatal => 2,
            }
        }
        None => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            2
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.pipeline.to_config()?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let ctx = PipelineContext::detect(config)?.with_token(token);
    let mut session = Session::new(ctx.config.clone())?;

    match cli.command {
        Commands::Probe { input, json } => {
            let descriptor = load(&mut session, &ctx, &input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&descriptor)?);
            } else {
                print_descriptor(&input, &descriptor);
            }
        }

        Commands::Preview { input, output } => {
            load(&mut session, &ctx, &input)?;
            let plan = session.plan_preview()?;
            let result = run_with_spinner(&ctx, &plan, "Rendering oriented preview");
            let rendered = session.complete(&plan, result)?;
            deliver(&rendered, &output)?;
        }

        Commands::Subclip {
            input,
            start,
            end,
            output,
        } => {
            load(&mut session, &ctx, &input)?;
            session.select_range(TrimRange::new(start, end))?;
            let plan = session.plan_subclip()?;
            let result = run_with_spinner(&ctx, &plan, "Rendering subclip");
            let rendered = session.complete(&plan, result)?;
            deliver(&rendered, &output)?;
        }

        Commands::Export {
            input,
            start,
            end,
            output,
        } => {
            load(&mut session, &ctx, &input)?;
            let default = session
                .default_range()
                .unwrap_or_else(|| TrimRange::new(0.0, 0.0));
            let range = TrimRange::new(start.unwrap_or(default.start), end.unwrap_or(default.end));
            session.select_range(range)?;
            let plan = session.plan_export(&ctx)?;
            let result = run_with_spinner(&ctx, &plan, "Exporting GIF");
            let exported = session.complete(&plan, result)?;
            if let PipelineOutput::Gif(gif) = &exported {
                info!(width = gif.width, height = gif.height, "GIF exported");
                println!(
                    "{} {}x{} {}",
                    style("GIF").green().bold(),
                    gif.width,
                    gif.height,
                    gif.mime_type
                );
            }
            deliver(&exported, &output)?;
        }
    }

    session.clear();
    Ok(())
}

fn load(session: &mut Session, ctx: &PipelineContext, input: &Path) -> Result<MediaDescriptor> {
    let upload = Upload::from_path(input, ctx.config.max_upload_size())
        .with_context(|| format!("Failed to read input: {}", input.display()))?;
    Ok(session.load(ctx, upload)?.clone())
}

fn run_with_spinner(
    ctx: &PipelineContext,
    plan: &PipelinePlan,
    message: &str,
) -> vid_gif::Result<PipelineOutput> {
    let quiet = !console::user_attended_stderr();
    let spinner = create_spinner(message, quiet);
    let bar = spinner.clone();
    let job_ctx = ctx
        .clone()
        .with_progress(Arc::new(move |fraction: f64| set_fraction(&bar, fraction)));

    let result = spawn_job(plan.clone(), job_ctx).and_then(|handle| handle.join());
    spinner.finish_and_clear();
    result
}

fn deliver(output: &PipelineOutput, destination: &Path) -> Result<()> {
    let artifact = output.artifact();
    std::fs::copy(&artifact.path, destination).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            artifact.path.display(),
            destination.display()
        )
    })?;
    println!(
        "{} {} ({})",
        style("Saved").green().bold(),
        destination.display(),
        shared_utils::FileSize::new(artifact.size_bytes())
    );
    Ok(())
}

fn print_descriptor(input: &Path, d: &MediaDescriptor) {
    let (display_w, display_h) = d.display_dimensions();
    println!("{}", style(input.display()).bold());
    println!("  Duration : {:.2}s", d.duration_seconds);
    println!("  Stored   : {}x{}", d.width, d.height);
    println!("  Rotation : {}", d.rotation);
    println!("  Displayed: {}x{}", display_w, display_h);
    if let Some(fps) = d.frame_rate {
        println!("  Frame rate: {:.2} fps", fps);
    }
    println!(
        "  Device   : {}",
        if d.device_label.is_empty() {
            "unknown"
        } else {
            d.device_label.as_str()
        }
    );
    println!("  Size     : {}", shared_utils::FileSize::new(d.size_bytes));
    println!("  Audio    : {}", if d.has_audio { "yes" } else { "no" });
}
