use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use keepsake_core::catalog::{MusicCatalog, TemplateCatalog};
use keepsake_core::config::ExportConfig;
use keepsake_core::export::{spawn_movie_export, spawn_scrapbook_export, ExportOutcome};
use keepsake_core::systems::assets::PhotoLibrary;
use keepsake_core::video_wrapper::DefaultBackend;
use keepsake_core::{AudioRef, DefaultResolver, PhotoRef};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file (falls back to $KEEPSAKE_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding bundled backgrounds and music
    #[arg(long, global = true, default_value = "assets")]
    assets: PathBuf,

    /// JSON template catalog replacing the built-in one
    #[arg(long, global = true, value_name = "FILE")]
    templates: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lay out photos into a PDF scrapbook
    Scrapbook {
        /// Template id (unknown ids use the default template)
        #[arg(long, short, default_value = "floral")]
        template: String,

        /// Output PDF path
        #[arg(long, short, default_value = "scrapbook.pdf")]
        output: PathBuf,

        /// Photos, in page order
        #[arg(value_name = "PHOTO", required = true)]
        photos: Vec<String>,
    },
    /// Encode photos into a slideshow movie
    Movie {
        /// Bundled music clip id
        #[arg(long, conflicts_with = "audio")]
        music: Option<String>,

        /// Audio file, or res://<name> for a bundled resource
        #[arg(long)]
        audio: Option<String>,

        /// Output movie path
        #[arg(long, short, default_value = "movie.mp4")]
        output: PathBuf,

        /// Photos, in playback order
        #[arg(value_name = "PHOTO", required = true)]
        photos: Vec<String>,
    },
    /// List scrapbook templates
    Templates,
    /// List bundled music clips
    Music,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_logging(level: LogLevel, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.to_string().parse()?)
        .from_env_lossy();

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => ExportConfig::from_env().context("Failed to load config from environment"),
    }
}

fn load_templates(path: Option<&PathBuf>) -> Result<TemplateCatalog> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            TemplateCatalog::from_json_str(&json)
                .with_context(|| format!("Invalid template catalog {}", path.display()))
        }
        None => Ok(TemplateCatalog::default()),
    }
}

fn report(outcome: ExportOutcome) -> Result<()> {
    match outcome {
        ExportOutcome::Succeeded(path) => {
            info!("Export complete: {}", path.display());
            println!("{}", path.display());
            Ok(())
        }
        ExportOutcome::Failed(message) => {
            error!("Export failed: {}", message);
            bail!("export failed: {}", message)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_format)?;

    let config = load_config(cli.config.as_ref())?;
    let library = PhotoLibrary::new(Arc::new(DefaultResolver::new(&cli.assets)))
        .with_decode_budget(config.decode_budget_bytes);

    match cli.command {
        Command::Scrapbook {
            template,
            output,
            photos,
        } => {
            let catalog = load_templates(cli.templates.as_ref())?;
            let template = catalog.find_by_id(&template).clone();
            info!(template = %template.id, photos = photos.len(), "Building scrapbook");

            let photos = photos.into_iter().map(PhotoRef::from).collect();
            let job = spawn_scrapbook_export(library, photos, template, config.page, output);
            report(job.wait())
        }
        Command::Movie {
            music,
            audio,
            output,
            photos,
        } => {
            let audio = match (music, audio) {
                (Some(id), _) => {
                    let catalog = MusicCatalog::default();
                    let clip = catalog
                        .find_by_id(&id)
                        .with_context(|| format!("Unknown music clip '{}'", id))?;
                    Some(clip.audio_ref())
                }
                (None, Some(reference)) => Some(AudioRef::parse(&reference)),
                (None, None) => None,
            };
            info!(photos = photos.len(), audio = ?audio, "Building movie");

            let photos = photos.into_iter().map(PhotoRef::from).collect();
            let job = spawn_movie_export(
                DefaultBackend::default(),
                library,
                photos,
                audio,
                config.video,
                output,
            );
            report(job.wait())
        }
        Command::Templates => {
            let catalog = load_templates(cli.templates.as_ref())?;
            for t in catalog.templates() {
                println!(
                    "{:<8} {:<8} columns={} rotations={:?}",
                    t.id, t.label, t.columns, t.rotation_pattern
                );
            }
            Ok(())
        }
        Command::Music => {
            for clip in &MusicCatalog::default().clips {
                println!("{:<9} {:<9} {}", clip.id, clip.name, clip.description);
            }
            Ok(())
        }
    }
}
