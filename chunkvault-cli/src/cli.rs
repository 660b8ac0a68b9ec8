use std::io::{self, Write};
use std::path::PathBuf;

use chunkvault::config::{Config, MetadataBackend, ObjectBackend};
use chunkvault::manager::AnyStorageManager;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(ValueEnum, Deserialize, Debug, Copy, Clone)]
#[serde(rename_all(deserialize = "kebab-case"))]
enum MetadataBackendArg {
    Memory,
    Sqlite,
}

#[derive(ValueEnum, Deserialize, Debug, Copy, Clone)]
#[serde(rename_all(deserialize = "kebab-case"))]
enum ObjectBackendArg {
    Memory,
    Local,
}

#[derive(Args, Deserialize, Clone, Debug)]
#[serde(rename_all(deserialize = "kebab-case"))]
struct StoreArgs {
    /// Which metadata backend to open
    #[arg(long, value_enum, default_value = "memory")]
    metadata_backend: MetadataBackendArg,

    /// SQLite database path, required when `--metadata-backend sqlite`
    #[arg(long)]
    metadata_path: Option<PathBuf>,

    /// Which object-store backend to open
    #[arg(long, value_enum, default_value = "memory")]
    object_backend: ObjectBackendArg,

    /// Local filesystem directory, required when `--object-backend local`
    #[arg(long)]
    object_directory: Option<PathBuf>,

    /// Payloads below this size (in bytes) are stored inline
    #[arg(long, default_value_t = 256)]
    inline_threshold: usize,
}

impl StoreArgs {
    fn into_config(self) -> io::Result<Config> {
        let metadata = match self.metadata_backend {
            MetadataBackendArg::Memory => MetadataBackend::Memory,
            MetadataBackendArg::Sqlite => MetadataBackend::Sqlite {
                path: self
                    .metadata_path
                    .ok_or_else(|| invalid("--metadata-path is required for the sqlite backend"))?,
            },
        };

        let objects = match self.object_backend {
            ObjectBackendArg::Memory => ObjectBackend::Memory,
            ObjectBackendArg::Local => ObjectBackend::Local {
                directory: self.object_directory.ok_or_else(|| {
                    invalid("--object-directory is required for the local object backend")
                })?,
            },
        };

        Ok(Config {
            metadata,
            objects,
            inline_threshold: self.inline_threshold,
        })
    }
}

#[derive(Subcommand, Deserialize, Debug, Clone)]
#[serde(rename_all(deserialize = "kebab-case"))]
#[serde(rename_all_fields(deserialize = "kebab-case"))]
enum Command {
    /// Write data at an offset, optionally zero-filling any gap first
    Write {
        #[arg(long)]
        file: String,
        #[arg(long)]
        offset: u64,
        #[arg(long)]
        data: String,
        #[arg(long)]
        allow_beyond_size: bool,
    },

    /// Read a byte range, optionally at a checkpointed version
    Read {
        #[arg(long)]
        file: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Defaults to the whole tail of the file from `offset`
        #[arg(long)]
        size: Option<u64>,
        #[arg(long)]
        version: Option<String>,
        /// Write the bytes to stdout raw, rather than as lossy UTF-8 text
        #[arg(long)]
        raw: bool,
    },

    /// Seal the active layer under a version tag
    Checkpoint {
        #[arg(long)]
        file: String,
        #[arg(long)]
        tag: String,
    },

    /// List every file
    Ls,

    /// Print a file's virtual size
    Size {
        #[arg(long)]
        file: String,
        #[arg(long)]
        version: Option<String>,
    },
}

#[derive(Parser, Debug)]
#[command(version, about = "A versioned differential storage engine")]
pub struct Cli {
    /// Path to a TOML config file describing the store and the command to run
    #[arg(long, exclusive = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    store: Option<StoreArgs>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Deserialize)]
struct FileConfig {
    store: Config,
    command: Command,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

fn to_io<T>(result: chunkvault::Result<T>) -> io::Result<T> {
    result.map_err(|err| invalid(&err.to_string()))
}

impl Cli {
    pub fn start(&self) -> io::Result<()> {
        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)?;
            let config: FileConfig =
                toml::from_str(&text).map_err(|err| invalid(&err.to_string()))?;
            let manager = to_io(config.store.build())?;
            return run(&manager, &config.command);
        }

        let store = self.store.clone().ok_or_else(|| {
            invalid("either --config or the store flags (--metadata-backend, ...) are required")
        })?;
        let command = self
            .command
            .clone()
            .ok_or_else(|| invalid("a subcommand is required"))?;

        let config = store.into_config()?;
        let manager = to_io(config.build())?;
        run(&manager, &command)
    }
}

fn run(manager: &AnyStorageManager, command: &Command) -> io::Result<()> {
    match command {
        Command::Write {
            file,
            offset,
            data,
            allow_beyond_size,
        } => write(manager, file, *offset, data.as_bytes(), *allow_beyond_size),
        Command::Read {
            file,
            offset,
            size,
            version,
            raw,
        } => read(manager, file, *offset, *size, version.as_deref(), *raw),
        Command::Checkpoint { file, tag } => to_io(manager.checkpoint(file, tag)),
        Command::Ls => ls(manager),
        Command::Size { file, version } => size(manager, file, version.as_deref()),
    }
}

/// Implements `--allow-beyond-size`: the core itself rejects writes whose
/// offset is past the current size, so the gap is filled with a zero-fill
/// write before the real one. There is no separate `insert` subcommand, so
/// `write` creates the file on first use.
fn write(
    manager: &AnyStorageManager,
    file: &str,
    offset: u64,
    data: &[u8],
    allow_beyond_size: bool,
) -> io::Result<()> {
    if to_io(manager.get_file_id_by_name(file))?.is_none() {
        to_io(manager.insert_file(file))?;
    }

    if allow_beyond_size {
        let size = to_io(manager.size_of(file, None))?;
        if offset > size {
            let padding = vec![0u8; (offset - size) as usize];
            to_io(manager.write_file(file, &padding, size))?;
        }
    }

    to_io(manager.write_file(file, data, offset))
}

fn read(
    manager: &AnyStorageManager,
    file: &str,
    offset: u64,
    size: Option<u64>,
    version: Option<&str>,
    raw: bool,
) -> io::Result<()> {
    let size = match size {
        Some(size) => size,
        None => {
            let total = to_io(manager.size_of(file, version))?;
            total.saturating_sub(offset)
        }
    };

    let bytes = to_io(manager.read_file(file, offset, size, version))?;

    if raw {
        io::stdout().write_all(&bytes)?;
    } else {
        println!("{}", String::from_utf8_lossy(&bytes));
    }
    Ok(())
}

fn ls(manager: &AnyStorageManager) -> io::Result<()> {
    let files = to_io(manager.get_all_files())?;
    for file in files {
        println!("{}\t{}", file.id, file.name);
    }
    Ok(())
}

fn size(manager: &AnyStorageManager, file: &str, version: Option<&str>) -> io::Result<()> {
    let size = to_io(manager.size_of(file, version))?;
    println!("{size}");
    Ok(())
}
