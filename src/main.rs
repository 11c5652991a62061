use clap::{Parser, Subcommand};
use cunchuqi::{
    Dictionary, DictionaryBuilder, Entry, EntryFilter, Error, Record, Result, StudyLog,
};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_DB_PATH: &str = "/usr/local/share/ccq/db.bin";

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Lookup(args) => run_lookup(args),
        Command::Info(args) => run_info(args),
        Command::Build(args) => run_build(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", error_message(&e, cli.verbose));
            ExitCode::FAILURE
        }
    }
}

/// Misses print a bare "not found" unless `verbose`, which names the cause.
fn error_message(err: &Error, verbose: bool) -> String {
    match (err.is_not_found(), verbose) {
        (true, false) => "not found".to_string(),
        (true, true) => format!("not found: {err}"),
        (false, false) => format!("error: {err}"),
        (false, true) => format!("error: {err:?}"),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "ccq: look up words in a memory-mapped dictionary file",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Print the detailed cause of a failed command
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up a key and print its definitions
    Lookup(LookupArgs),
    /// Inspect a dictionary file and print its layout
    Info(InfoArgs),
    /// Build a dictionary file from a JSON description
    Build(BuildArgs),
}

#[derive(clap::Args)]
struct LookupArgs {
    /// Key to look up
    key: String,

    /// Path to the dictionary file
    #[arg(long, env = "CCQ_DB", value_name = "FILE", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Which definitions to show
    #[arg(short, long, value_enum, default_value_t = EntryFilter::All)]
    filter: EntryFilter,

    /// Print the definitions as JSON
    #[arg(long)]
    json: bool,

    /// Append the N-th shown definition (1-based) to the study log
    #[arg(short, long, value_name = "N")]
    save: Option<usize>,

    /// Path to the study log, defaults to ~/.local/share/ccq/zh
    #[arg(long, env = "CCQ_STUDY_LOG", value_name = "FILE")]
    study_log: Option<PathBuf>,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the dictionary file
    #[arg(long, env = "CCQ_DB", value_name = "FILE", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Optional slot to print
    #[arg(short, long)]
    slot: Option<u32>,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Path to the source JSON file
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Path to the dictionary file to produce
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Seed for the perfect-hash displacements
    #[arg(long, value_name = "SEED", default_value_t = 0)]
    hash_seed: u64,

    /// Average number of keys per perfect-hash bucket
    #[arg(long, value_name = "COUNT", default_value_t = 2)]
    keys_per_bucket: usize,

    /// Writer buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 16 << 20)]
    buffer_size: usize,
}

fn run_lookup(args: LookupArgs) -> Result<()> {
    let dict = Dictionary::open(&args.db)?;
    let entries = dict.lookup(&args.key)?;
    if entries.is_empty() {
        return Err(Error::NotFound(args.key));
    }
    let shown = args.filter.apply(&entries);

    if args.json {
        let json = serde_json::to_string_pretty(&shown)
            .map_err(|e| Error::InvalidInput(format!("Failed to format JSON: {e}")))?;
        println!("{json}");
    } else {
        for (i, entry) in shown.iter().enumerate() {
            println!("[{}] [{}] {}", i + 1, entry.dict, entry.def);
        }
    }

    if let Some(n) = args.save {
        let entry: &Entry = n
            .checked_sub(1)
            .and_then(|i| shown.get(i).copied())
            .ok_or_else(|| {
                Error::InvalidInput(format!("no definition {n}, {} shown", shown.len()))
            })?;
        let log = match args.study_log {
            Some(path) => StudyLog::new(path),
            None => StudyLog::in_home()
                .ok_or_else(|| Error::InvalidInput("HOME is not set".to_string()))?,
        };
        log.append(&args.key, entry)?;
        eprintln!("saved to {}", log.path().display());
    }
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let dict = Dictionary::open(&args.db)?;

    let json = serde_json::to_string_pretty(&dict.info())
        .map_err(|e| Error::InvalidInput(format!("Failed to format JSON: {e}")))?;
    println!("{json}");

    if let Some(idx) = args.slot {
        let slot = dict.slot(idx)?;
        let json = serde_json::to_string_pretty(&slot)
            .map_err(|e| Error::InvalidInput(format!("Failed to format JSON: {e}")))?;
        println!("Slot {idx}:\n{json}");
    }
    Ok(())
}

fn run_build(args: BuildArgs) -> Result<()> {
    let entries = load_entries_from_json(&args.input)?;
    let writer = File::create(&args.output)?;

    let info = DictionaryBuilder::default()
        .with_hash_seed(args.hash_seed)
        .with_keys_per_bucket(args.keys_per_bucket)
        .with_writer_buffer_size(args.buffer_size)
        .build(&writer, entries.iter().map(|(k, v)| (k.as_str(), v)))?;

    let json = serde_json::to_string_pretty(&info)
        .map_err(|e| Error::InvalidInput(format!("Failed to format JSON: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Accepts `{"key": [record, ...]}` or `[{"key": ..., "records": [...]}]`,
/// where a record is either `"tag|dict|def"` or `{"tag", "dict", "def"}`.
fn load_entries_from_json(path: &Path) -> Result<Vec<(String, Vec<Record>)>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let value: Value = serde_json::from_reader(reader)
        .map_err(|e| invalid_json(format!("Failed to parse JSON input: {e}")))?;
    extract_entries(value)
}

fn extract_entries(value: Value) -> Result<Vec<(String, Vec<Record>)>> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, records)| {
                let records = extract_records(records, &key)?;
                Ok((key, records))
            })
            .collect(),
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let Value::Object(mut obj) = item else {
                    return Err(invalid_json(format!(
                        "unsupported entry format at index {index}"
                    )));
                };
                let key = match obj.remove("key") {
                    Some(Value::String(key)) => key,
                    _ => {
                        return Err(invalid_json(format!(
                            "entry {index} missing string 'key' field"
                        )))
                    }
                };
                let records = obj.remove("records").ok_or_else(|| {
                    invalid_json(format!("entry {index} missing 'records' field"))
                })?;
                let records = extract_records(records, &key)?;
                entries.push((key, records));
            }
            Ok(entries)
        }
        other => Err(invalid_json(format!(
            "unsupported JSON top-level type: {other}"
        ))),
    }
}

fn extract_records(value: Value, key: &str) -> Result<Vec<Record>> {
    let Value::Array(items) = value else {
        return Err(invalid_json(format!("records of {key:?} must be an array")));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(line) => {
                let mut parts = line.splitn(3, '|');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(tag), Some(dict), Some(def)) => Ok(Record::new(tag, dict, def)),
                    _ => Err(invalid_json(format!(
                        "record {line:?} of {key:?} needs three '|' separated fields"
                    ))),
                }
            }
            other => serde_json::from_value(other)
                .map_err(|e| invalid_json(format!("invalid record of {key:?}: {e}"))),
        })
        .collect()
}

fn invalid_json(message: String) -> Error {
    Error::InvalidInput(message)
}
