use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use template_overlay::state::storage::{FallbackStore, JsonFileStore, RecordStore, SqliteStore};
use template_overlay::tiles::key::{TemplateCoords, TileCoords};
use template_overlay::{ColorKey, EngineConfig, Result, TemplateId, TemplateLibrary};

/// Headless driver for the template overlay engine
#[derive(Parser, Debug)]
#[command(name = "template-overlay", version, about)]
struct Cli {
    /// Where the record store lives (overrides OVERLAY_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a template from an image file
    Import {
        name: String,
        /// Origin as "tileX,tileY,pixelX,pixelY"
        coords: TemplateCoords,
        image: PathBuf,
    },
    /// List templates with their pixel counts
    List,
    /// Delete one template by its "<sortID> <authorID>" key
    Delete { id: TemplateId },
    /// Delete every template
    DeleteAll,
    /// Change a template's color filter
    Color {
        action: ColorAction,
        id: TemplateId,
        /// Color as "r,g,b"
        color: ColorKey,
    },
    /// Composite a live tile and print progress
    Render {
        /// Tile as "x,y"
        tile: TileCoords,
        /// Raw live tile image
        live: PathBuf,
        /// Where to write the composite PNG
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ColorAction {
    Disable,
    Enable,
    Enhance,
    Unenhance,
}

/// SQLite first, JSON file second. A database that won't open leaves the
/// JSON file on its own.
fn open_store(config: &EngineConfig) -> Box<dyn RecordStore> {
    let dir = config.data_dir();
    let json = JsonFileStore::new(dir.join("overlay.json"));
    match SqliteStore::open(dir.join("overlay.db")) {
        Ok(sqlite) => Box::new(FallbackStore::new(Box::new(sqlite), Box::new(json))),
        Err(e) => {
            warn!("⚠️  SQLite store unavailable, using {} only: {}", json.path().display(), e);
            Box::new(json)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = EngineConfig::from_env();
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir;
    }

    let mut library = TemplateLibrary::open(&config, open_store(&config))?;

    match cli.command {
        Command::Import { name, coords, image } => {
            let bytes = tokio::fs::read(&image).await?;
            let id = library.create_template(&name, coords, &bytes)?;
            let tiles = library.template(&id).map(|t| t.tiles().len()).unwrap_or(0);
            println!("Imported '{}' as \"{}\" ({} tiles)", name, id, tiles);
        }
        Command::List => {
            if library.is_empty() {
                println!("No templates");
            }
            for template in library.templates() {
                println!(
                    "\"{}\"  {}  at {}  {}  {} tiles, {} pixels, {} required",
                    template.id,
                    template.name,
                    template.coords,
                    if template.enabled { "enabled" } else { "disabled" },
                    template.tiles().len(),
                    template.pixel_count,
                    template.required_pixel_count()
                );
                for (color, count) in template.color_counts() {
                    let flag = if template.filter().is_enhanced(&color) { "enhanced" } else { "" };
                    println!("    {:>11}  {:>8}  {}", color.to_string(), count, flag);
                }
                for color in template.filter().disabled_colors() {
                    println!("    {:>11}  {:>8}  disabled", color.to_string(), "-");
                }
            }
        }
        Command::Delete { id } => {
            library.delete_template(&id)?;
            println!("Deleted \"{}\"", id);
        }
        Command::DeleteAll => {
            library.delete_all()?;
            println!("Deleted all templates");
        }
        Command::Color { action, id, color } => {
            let token = match action {
                ColorAction::Disable => library.disable_color(&id, color)?,
                ColorAction::Enable => library.enable_color(&id, color)?,
                ColorAction::Enhance => library.enhance_color(&id, color)?,
                ColorAction::Unenhance => library.unenhance_color(&id, color)?,
            };
            if token.changed {
                println!("{:?} {} on \"{}\"", action, color, id);
            } else {
                println!("Nothing to change");
            }
        }
        Command::Render { tile, live, output } => {
            let raw = tokio::fs::read(&live).await?;
            let composite = library.handle_tile_fetch(tile, &raw).await?;
            tokio::fs::write(&output, &composite).await?;
            info!("🖼️  Wrote tile {} to {}", tile, output.display());

            for template in library.templates() {
                let report = library.progress(&template.id)?;
                if report.tiles_analyzed == 0 {
                    continue;
                }
                println!("\"{}\" {}", template.id, template.name);
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_fatal() {
                error!("❌ {}", e);
            } else {
                warn!("⚠️  {}", e);
            }
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
