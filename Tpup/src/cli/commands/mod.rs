use clap::Subcommand;
use std::path::PathBuf;

use crate::format::PixelFormat;

pub mod convert;
pub mod list;
pub mod restore;
pub mod run;

#[derive(Subcommand)]
pub enum Commands {
    /// Dump all of the game's textures to the output directory
    Unpack {
        /// Directory with the game executable
        #[arg(short, long = "game-dir")]
        game_dir: PathBuf,

        /// Dump output directory
        #[arg(short, long = "output-dir")]
        output_dir: PathBuf,

        /// Delete an existing output directory without asking
        #[arg(short = 'y', long = "confirm-delete")]
        confirm_delete: bool,

        /// Number of worker threads (0 = one per core)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,

        /// Suppress the progress bar and per-texture lines
        #[arg(short, long)]
        quiet: bool,
    },

    /// Inject every texture in the override directory into the game's containers
    Repack {
        /// Directory with the game executable
        #[arg(short, long = "game-dir")]
        game_dir: PathBuf,

        /// File overrides directory
        #[arg(short, long = "override-dir")]
        override_dir: PathBuf,

        /// Keep automatically converted textures instead of cleaning them up
        #[arg(short, long = "preserve-converted")]
        preserve_converted: bool,

        /// Number of worker threads (0 = one per core)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,

        /// texconv executable (defaults to $TPUP_TEXCONV, then texconv on PATH)
        #[arg(long)]
        texconv: Option<PathBuf>,

        /// Suppress the progress bar and per-texture lines
        #[arg(short, long)]
        quiet: bool,
    },

    /// Restore all backups in the game directory
    Restore {
        /// Directory with the game executable
        #[arg(short, long = "game-dir")]
        game_dir: PathBuf,
    },

    /// Convert a file to another pixel format in place
    Convert {
        /// File to be converted
        file: PathBuf,

        /// Output format (BC1_UNORM, BC7, DXT5, ...)
        #[arg(short, long)]
        format: PixelFormat,

        /// texconv executable (defaults to $TPUP_TEXCONV, then texconv on PATH)
        #[arg(long)]
        texconv: Option<PathBuf>,
    },

    /// List the entries of a texture pack
    List {
        /// Container file
        container: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Execute the selected command.
    ///
    /// Returns `Ok(false)` when the command ran but reported failures.
    ///
    /// # Errors
    /// Returns an error if the command could not be carried out at all.
    pub fn execute(&self) -> anyhow::Result<bool> {
        match self {
            Commands::Unpack {
                game_dir,
                output_dir,
                confirm_delete,
                jobs,
                quiet,
            } => run::unpack(game_dir, output_dir, *confirm_delete, *jobs, *quiet),
            Commands::Repack {
                game_dir,
                override_dir,
                preserve_converted,
                jobs,
                texconv,
                quiet,
            } => run::repack(
                game_dir,
                override_dir,
                *preserve_converted,
                *jobs,
                texconv.as_deref(),
                *quiet,
            ),
            Commands::Restore { game_dir } => restore::execute(game_dir),
            Commands::Convert {
                file,
                format,
                texconv,
            } => convert::execute(file, *format, texconv.as_deref()),
            Commands::List { container, json } => list::execute(container, *json),
        }
    }
}
