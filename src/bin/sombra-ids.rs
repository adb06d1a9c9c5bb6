//! Inspection and maintenance CLI for record store id files.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sombra_ids::{
    idgen::file::IdFileImage,
    logging::init_logging,
    primitives::io::{FileSystem, StdFileSystem},
    IdGenerator, IdType, RebuildMode, RecordFormat, RecordStore, RecordStores, StoreConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "sombra-ids",
    version,
    about = "Inspect and rebuild Sombra record store id files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SOMBRA_LOG",
        default_value = "warn",
        help = "Tracing filter directive (e.g. info, sombra_ids=debug)"
    )]
    log_level: String,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Store config TOML (grab sizes, rebuild mode)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the marker, high id and every free id of an id file
    Dump {
        #[arg(value_name = "ID_FILE")]
        path: PathBuf,
    },
    /// Print the high id stored in an id file
    HighId {
        #[arg(value_name = "ID_FILE")]
        path: PathBuf,
    },
    /// Create every record store in a directory
    Create {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Delete the id files in a directory and rebuild them from the stores
    Rebuild {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, help = "Use chunked bulk reads instead of per-record probes")]
        fast: bool,
    },
    /// Summarize the id files of every store in a directory
    Info {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let fs: Arc<dyn FileSystem> = Arc::new(StdFileSystem);

    match cli.command {
        Command::Dump { path } => {
            let image = IdGenerator::read_image(&*fs, &path)?;
            print_image(&path, &image);
        }
        Command::HighId { path } => {
            println!("{}", IdGenerator::read_high_id(&*fs, &path)?);
        }
        Command::Create { dir } => {
            let stores = RecordStores::create(Arc::clone(&fs), &dir, &config)?;
            stores.close()?;
            println!("created {} stores in {}", IdType::ALL.len(), dir.display());
        }
        Command::Rebuild { dir, fast } => {
            let mode = if fast {
                RebuildMode::Fast
            } else {
                config.rebuild_mode
            };
            let config = config.rebuild_mode(mode).read_only(false);
            rebuild_dir(&fs, &dir, &config)?;
        }
        Command::Info { dir } => info_dir(&*fs, &dir)?,
    }
    Ok(())
}

fn rebuild_dir(fs: &Arc<dyn FileSystem>, dir: &Path, config: &StoreConfig) -> Result<(), Box<dyn Error>> {
    for id_type in IdType::ALL {
        let format = RecordFormat::of(id_type);
        if !fs.exists(&dir.join(format.store_file_name())) {
            continue;
        }
        let id_path = dir.join(format.id_file_name());
        if fs.exists(&id_path) {
            fs.delete(&id_path)?;
        }
        let store = RecordStore::open(Arc::clone(fs), dir, id_type, config)?;
        let high_id = store.high_id()?;
        let in_use = store.number_of_ids_in_use()?;
        store.close()?;
        println!("{:<28} high id {high_id:>12}  in use {in_use:>12}", id_type.name());
    }
    Ok(())
}

fn info_dir(fs: &dyn FileSystem, dir: &Path) -> Result<(), Box<dyn Error>> {
    println!(
        "{:<28} {:>12} {:>10} {:>8} {:>14}",
        "store", "high id", "free", "state", "max id"
    );
    for id_type in IdType::ALL {
        let format = RecordFormat::of(id_type);
        let id_path = dir.join(format.id_file_name());
        if !fs.exists(&id_path) {
            println!("{:<28} {:>12}", id_type.name(), "missing");
            continue;
        }
        let image = IdGenerator::read_image(fs, &id_path)?;
        println!(
            "{:<28} {:>12} {:>10} {:>8} {:>14}",
            id_type.name(),
            image.header.high_id,
            image.free_ids.len(),
            state(&image),
            format.max_id()
        );
    }
    Ok(())
}

fn print_image(path: &Path, image: &IdFileImage) {
    print_field("File", path.display());
    print_field("State", state(image));
    print_field("High Id", image.header.high_id);
    print_field("Free Ids", image.free_ids.len());
    for chunk in image.free_ids.chunks(8) {
        let line: Vec<String> = chunk.iter().map(u64::to_string).collect();
        println!("    {}", line.join(" "));
    }
}

fn state(image: &IdFileImage) -> &'static str {
    if image.header.sticky {
        "sticky"
    } else {
        "clean"
    }
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {:.<20} {}", name, value);
}
