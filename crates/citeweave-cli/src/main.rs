use citeweave_common::telemetry::{self, TelemetryConfig};
use citeweave_common::{Config, FileStore, ReferenceTable};
use citeweave_renderer::Renderer;
use citeweave_renderer::normalize::normalize;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(version, about = "Citeweave - render model answers with resolved citations", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true, env = "CITEWEAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level when RUST_LOG is not set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an answer to HTML or a JSON document tree
    Render {
        /// Answer text file, or `-` for stdin
        answer: PathBuf,

        /// Reference table (JSON with `chunks` and `doc_aggs`)
        #[arg(long, short)]
        references: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Format::Html)]
        format: Format,
    },
    /// Print the normalized answer text
    Normalize {
        /// Answer text file, or `-` for stdin
        answer: PathBuf,
    },
    /// Re-render growing prefixes of an answer like a streaming client does
    Stream {
        /// Answer text file, or `-` for stdin
        answer: PathBuf,

        #[arg(long, short)]
        references: Option<PathBuf>,

        /// Characters added per frame
        #[arg(long, default_value = "32")]
        step: NonZeroUsize,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write the default configuration
    Init {
        /// Destination, defaults to the user config directory
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration in effect
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Html,
    Json,
}

fn main() -> Result<()> {
    init_miette();

    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env("citeweave");
    if cli.verbose {
        telemetry_config = telemetry_config.with_level(tracing::Level::DEBUG);
    }
    telemetry::init(telemetry_config);

    match cli.command {
        Commands::Render {
            answer,
            references,
            format,
        } => {
            let config = load_config(cli.config.as_deref())?;
            render(&answer, references.as_deref(), format, config)?;
        }
        Commands::Normalize { answer } => {
            print!("{}", normalize(&read_input(&answer)?));
        }
        Commands::Stream {
            answer,
            references,
            step,
        } => {
            let config = load_config(cli.config.as_deref())?;
            stream(&answer, references.as_deref(), step.get(), config)?;
        }
        Commands::Config {
            command: ConfigCommand::Init { path, force },
        } => {
            let path = path
                .or(cli.config)
                .or_else(default_config_path)
                .ok_or_else(|| miette::miette!("No config directory found; pass a path"))?;
            init_config(&path, force)?;
            println!("✓ Wrote configuration to {}", path.display());
        }
        Commands::Config {
            command: ConfigCommand::Show,
        } => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config).into_diagnostic()?);
        }
    }

    Ok(())
}

fn render(answer: &Path, references: Option<&Path>, format: Format, config: Config) -> Result<()> {
    let text = read_input(answer)?;
    let table = load_references(references)?;
    let renderer = Renderer::new(config);
    let rendered = renderer.render(&text, &table);
    tracing::info!(
        annotated = rendered.annotated,
        unresolved = rendered.unresolved,
        "rendered {}",
        answer.display()
    );
    match format {
        Format::Html => print!("{}", renderer.to_html(&rendered)),
        Format::Json => println!("{}", serde_json::to_string_pretty(&rendered).into_diagnostic()?),
    }
    Ok(())
}

fn stream(answer: &Path, references: Option<&Path>, step: usize, config: Config) -> Result<()> {
    let text = read_input(answer)?;
    let table = load_references(references)?;
    let renderer = Renderer::new(config);

    let mut html = String::new();
    for (frame, end) in frame_ends(&text, step).into_iter().enumerate() {
        let rendered = renderer.render(&text[..end], &table);
        tracing::info!(
            frame,
            bytes = end,
            annotated = rendered.annotated,
            unresolved = rendered.unresolved,
            "frame"
        );
        html = renderer.to_html(&rendered);
    }
    print!("{html}");
    Ok(())
}

/// Prefix lengths, in bytes, of each streaming frame. The last frame is the
/// whole text.
fn frame_ends(text: &str, step: usize) -> Vec<usize> {
    let mut ends: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .skip(step)
        .step_by(step)
        .collect();
    ends.push(text.len());
    ends
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .into_diagnostic()
            .wrap_err("Failed to read answer from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", path.display()))
}

fn load_references(path: Option<&Path>) -> Result<ReferenceTable> {
    let Some(path) = path else {
        tracing::debug!("no reference table given, markers stay unresolved");
        return Ok(ReferenceTable::default());
    };
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    Ok(ReferenceTable::from_json(path.display().to_string(), &text)?)
}

/// An explicit path must load; the default location is optional.
fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Ok(Config::load(&FileStore::new(path))?);
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "loading configuration");
            Ok(Config::load(&FileStore::new(path))?)
        }
        _ => Ok(Config::default()),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(miette::miette!(
            help = "pass --force to overwrite it",
            "Configuration already exists at {}",
            path.display()
        ));
    }
    Config::default().save(&FileStore::new(path))?;
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("citeweave").join("config.json"))
}

fn init_miette() {
    let hook = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }));
    if hook.is_err() {
        eprintln!("couldn't set the miette hook");
    }
    miette::set_panic_hook();
}
