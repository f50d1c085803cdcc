//! TierKV CLI
//!
//! Opens a storage on a data directory and runs one command against it, or
//! reads commands from stdin in `repl` mode.

use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use tierkv::{ByteArray, Config, Key, ShrinkableStorage, TierError};
use tracing_subscriber::{fmt, EnvFilter};

/// Key width used by the CLI, in bytes
const KEY_LEN: usize = 32;

/// Value width used by the CLI, in bytes
const VALUE_LEN: usize = 128;

type Storage = ShrinkableStorage<KEY_LEN, VALUE_LEN>;

/// TierKV CLI
#[derive(Parser, Debug)]
#[command(name = "tierkv-cli")]
#[command(about = "CLI for the TierKV storage engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tierkv_data")]
    data_dir: String,

    /// Max records per sorted segment written by shrink
    #[arg(short, long, default_value = "65536")]
    batch_size: u64,

    /// Disable Bloom filters on sorted storages
    #[arg(long)]
    no_filter: bool,

    /// Shrink automatically once the head reaches this share of all records
    #[arg(long)]
    max_head_ratio: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Store a key-value pair
    Put {
        /// The key to store
        key: String,

        /// The value to store
        value: String,
    },

    /// Remove a key
    Remove {
        /// The key to remove
        key: String,
    },

    /// Merge the head and every generation into sorted storage
    Shrink,

    /// Seal the head as the newest generation
    Flush,

    /// Print storage counters
    Stats,

    /// Read commands from stdin until EOF or `quit`
    Repl,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .batch_size(args.batch_size)
        .use_filter(!args.no_filter);
    if let Some(ratio) = args.max_head_ratio {
        builder = builder.max_head_ratio(ratio);
    }

    let storage = match Storage::open(builder.build()) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Commands::Repl => repl(&storage),
        command => run(&storage, command).map(|output| {
            if let Some(line) = output {
                println!("{}", line);
            }
        }),
    };

    if let Err(e) = result.and_then(|_| storage.close()) {
        tracing::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// Execute one command; returns the line to print, if any
fn run(storage: &Storage, command: Commands) -> tierkv::Result<Option<String>> {
    match command {
        Commands::Get { key } => Ok(Some(match storage.get(&parse_key(&key)?)? {
            Some(value) => value.to_string(),
            None => "(nil)".to_string(),
        })),
        Commands::Put { key, value } => {
            storage.put(parse_key(&key)?, ByteArray::from_padded(value.as_bytes())?)?;
            Ok(Some("OK".to_string()))
        }
        Commands::Remove { key } => {
            storage.remove(parse_key(&key)?)?;
            Ok(Some("OK".to_string()))
        }
        Commands::Shrink => {
            storage.shrink()?;
            Ok(Some("OK".to_string()))
        }
        Commands::Flush => {
            storage.flush()?;
            Ok(Some("OK".to_string()))
        }
        Commands::Stats => {
            let stats = storage.stats();
            Ok(Some(format!(
                "head={} generations={} sorted={} upper_bound={}",
                stats.head_len, stats.generation_count, stats.sorted_len, stats.upper_size_bound
            )))
        }
        Commands::Repl => Err(TierError::InvalidArgument(
            "repl cannot be nested".to_string(),
        )),
    }
}

fn repl(storage: &Storage) -> tierkv::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "tierkv> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            [] => continue,
            ["quit"] | ["exit"] => return Ok(()),
            ["get", key] => Commands::Get { key: key.to_string() },
            ["put", key, value] => Commands::Put {
                key: key.to_string(),
                value: value.to_string(),
            },
            ["remove", key] => Commands::Remove { key: key.to_string() },
            ["shrink"] => Commands::Shrink,
            ["flush"] => Commands::Flush,
            ["stats"] => Commands::Stats,
            _ => {
                writeln!(
                    stdout,
                    "commands: get <key> | put <key> <value> | remove <key> | shrink | flush | stats | quit"
                )?;
                continue;
            }
        };

        match run(storage, command) {
            Ok(Some(output)) => writeln!(stdout, "{}", output)?,
            Ok(None) => {}
            Err(e) => writeln!(stdout, "error: {}", e)?,
        }
    }
}

fn parse_key(key: &str) -> tierkv::Result<Key<KEY_LEN>> {
    Key::from_padded(key.as_bytes())
}
