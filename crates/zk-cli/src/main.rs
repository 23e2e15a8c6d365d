//! zk CLI: a Zettelkasten of markdown notes with a rebuildable SQLite index.
//!
//! Commands: init, add, get, edit, rm, link, unlink, search, linked,
//! similar, central, orphans, by-date, tags, notes, rebuild, status,
//! graph, watch, completions
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zk_core::link::LinkType;
use zk_core::note::NoteType;
use zk_core::{ErrorKind, ZkError};
use zk_graph::Direction;
use zk_index::{DateField, NoteFilter};
use zk_service::{Config, NewNote, NoteUpdate, Overrides, ZettelService};
use zk_vault::{NoteEvent, NoteWatcher};

#[derive(Parser)]
#[command(name = "zk")]
#[command(version)]
#[command(about = "Zettelkasten of markdown notes with a rebuildable SQLite index")]
struct Cli {
    /// Config file (default: zk.toml in the base directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Notes directory
    #[arg(long, global = true)]
    notes_dir: Option<PathBuf>,

    /// Index database: a path, sqlite://<path>, or :memory:
    #[arg(long, global = true)]
    database: Option<String>,

    /// Log filter, e.g. info or zk_service=debug
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Compare content hashes, not just counts, when checking the index
    #[arg(long, global = true)]
    deep_check: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create the notes directory and index
    Init,
    /// Create a note
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, short, default_value = "")]
        content: String,
        /// fleeting, literature, permanent, structure or hub
        #[arg(long = "type", default_value = "permanent")]
        note_type: NoteType,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Show a note by id or exact title
    Get { id: String },
    /// Change a note's title, content, type or tags
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, short)]
        content: Option<String>,
        #[arg(long = "type")]
        note_type: Option<NoteType>,
        /// Replace all tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
    /// Delete a note and every link touching it
    #[command(alias = "delete")]
    Rm { id: String },
    /// Link two notes; the target records the inverse link
    Link {
        source: String,
        target: String,
        #[arg(long = "type", default_value = "reference")]
        link_type: LinkType,
        #[arg(long, short)]
        description: Option<String>,
    },
    /// Remove links between two notes
    Unlink {
        source: String,
        target: String,
        /// Only this type (default: every type)
        #[arg(long = "type")]
        link_type: Option<LinkType>,
    },
    /// Search by text, tags and type
    #[command(alias = "s")]
    Search {
        /// Case-insensitive text in title or content
        query: Option<String>,
        /// Required tag (repeatable)
        #[arg(long = "tag", short)]
        tags: Vec<String>,
        #[arg(long = "type")]
        note_type: Option<NoteType>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Notes linked to a note
    Linked {
        id: String,
        /// outgoing, incoming or both
        #[arg(long, default_value = "both")]
        direction: Direction,
        #[arg(long = "type")]
        link_type: Option<LinkType>,
    },
    /// Notes sharing tags or neighbours with a note
    Similar {
        id: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Most connected notes
    Central {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Notes without links
    Orphans,
    /// Notes created or updated within a date range
    ByDate {
        /// Inclusive start (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_start)]
        start: Option<DateTime<Utc>>,
        /// Inclusive end (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_end)]
        end: Option<DateTime<Utc>>,
        #[arg(long, value_enum, default_value_t = DateFieldArg::Created)]
        field: DateFieldArg,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Every tag with its usage count
    Tags,
    /// Every note
    Notes,
    /// Rebuild the index from the note documents
    Rebuild,
    /// File and index counts
    Status,
    /// Export the graph around a note
    Graph {
        id: String,
        #[arg(long, default_value_t = 1)]
        depth: u32,
        #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
    },
    /// Reindex notes as their documents change on disk
    Watch,
    /// Generate shell completions
    #[command(hide = true)]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DateFieldArg {
    Created,
    Updated,
}

impl From<DateFieldArg> for DateField {
    fn from(arg: DateFieldArg) -> Self {
        match arg {
            DateFieldArg::Created => Self::Created,
            DateFieldArg::Updated => Self::Updated,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Dot,
    Mermaid,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ZkError>().map(ZkError::kind) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::NotFound) => 3,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "zk", &mut io::stdout());
        return Ok(());
    }

    let overrides = Overrides {
        config_file: cli.config,
        notes_dir: cli.notes_dir,
        database: cli.database,
        log_level: cli.log_level,
        deep_check: cli.deep_check.then_some(true),
        ..Overrides::default()
    };
    let config = Config::load(&overrides)?;
    init_logging(&config.log_level);

    let service = ZettelService::open(&config)?;

    match cli.command {
        Commands::Init => {
            info!(notes_dir = %config.notes_path().display(), "initialized knowledge base");
            print_json(&service.status()?)
        }
        Commands::Add {
            title,
            content,
            note_type,
            tags,
        } => {
            let note = service.create_note(NewNote {
                title,
                content,
                note_type,
                tags,
            })?;
            print_json(&note)
        }
        Commands::Get { id } => print_json(&service.get_note(&id)?),
        Commands::Edit {
            id,
            title,
            content,
            note_type,
            tags,
        } => {
            let note = service.update_note(
                &id,
                NoteUpdate {
                    title,
                    content,
                    note_type,
                    tags,
                },
            )?;
            print_json(&note)
        }
        Commands::Rm { id } => {
            service.delete_note(&id)?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        Commands::Link {
            source,
            target,
            link_type,
            description,
        } => {
            service.create_link(&source, &target, link_type, description.as_deref())?;
            print_json(&serde_json::json!({
                "source": source,
                "target": target,
                "link_type": link_type,
                "inverse": link_type.inverse(),
            }))
        }
        Commands::Unlink {
            source,
            target,
            link_type,
        } => {
            let removed = service.remove_link(&source, &target, link_type)?;
            print_json(&serde_json::json!({
                "source": source,
                "target": target,
                "removed": removed,
            }))
        }
        Commands::Search {
            query,
            tags,
            note_type,
            limit,
        } => {
            let filter = NoteFilter {
                text: query,
                tags,
                note_type,
                limit,
            };
            print_json(&service.search_notes(&filter)?)
        }
        Commands::Linked {
            id,
            direction,
            link_type,
        } => print_json(&service.linked_notes(&id, direction, link_type)?),
        Commands::Similar { id, limit } => print_json(&service.find_similar(&id, limit)?),
        Commands::Central { limit } => print_json(&service.find_central(limit)?),
        Commands::Orphans => print_json(&service.find_orphaned()?),
        Commands::ByDate {
            start,
            end,
            field,
            limit,
        } => print_json(&service.list_by_date(field.into(), start, end, limit)?),
        Commands::Tags => print_json(&service.all_tags()?),
        Commands::Notes => print_json(&service.all_notes()?),
        Commands::Rebuild => print_json(&service.rebuild_index()?),
        Commands::Status => print_json(&service.status()?),
        Commands::Graph { id, depth, format } => {
            let graph = service.neighborhood(&id, depth)?;
            match format {
                GraphFormat::Dot => print!("{}", graph.format_dot()),
                GraphFormat::Mermaid => print!("{}", graph.format_mermaid()),
                GraphFormat::Json => println!("{}", graph.format_json()),
            }
            Ok(())
        }
        Commands::Watch => watch(&service, &config),
        Commands::Completions { .. } => Ok(()),
    }
}

fn watch(service: &ZettelService, config: &Config) -> Result<()> {
    let notes_dir = config.notes_path();
    let watcher = NoteWatcher::start(&notes_dir)
        .with_context(|| format!("cannot watch {}", notes_dir.display()))?;
    info!(notes_dir = %notes_dir.display(), "watching for note changes");

    let sync = service.synchronizer();
    loop {
        let Some(event) = watcher.recv_timeout(Duration::from_secs(1)) else {
            continue;
        };
        let result = match &event {
            NoteEvent::Changed(id) => sync.reindex_note(id),
            NoteEvent::Removed(id) => sync.forget_note(id),
        };
        match result {
            Ok(()) => info!(id = event.id(), ?event, "reindexed"),
            Err(e) => warn!(id = event.id(), error = %e, "could not reindex note"),
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_start(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_date(s, NaiveTime::MIN)
}

fn parse_end(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
    parse_date(s, end_of_day)
}

/// RFC 3339, or a bare date at `time_of_day` UTC.
fn parse_date(s: &str, time_of_day: NaiveTime) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(time_of_day).and_utc())
        .map_err(|_| format!("invalid date '{s}': expected YYYY-MM-DD or RFC 3339"))
}
