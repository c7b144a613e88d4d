//! # Docline CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create an empty store
//! - `status` - Show store statistics
//! - `add` - Register a document
//! - `derive` - Record a derivation between two documents
//! - `show` - Print a document's lineage record
//! - `chain` / `ancestors` / `descendants` - Walk the graph
//! - `history` - List a document's transformations
//! - `delete` - Remove a document and unlink it
//! - `validate` - Audit the whole store
//! - `migrate` - Bump schema versions
//! - `export` / `import` - Verifiable snapshots

mod commands;

use crate::config::{Backend, DoclineConfig};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use docline_core::{LineageError, TransformationType};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Docline - document lineage tracking
///
/// Records which documents were derived from which, how, and under which
/// metadata schema version.
#[derive(Parser, Debug)]
#[command(name = "docline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress confirmation messages
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store location (directory for "file", database file for "redb")
    #[arg(short = 'D', long, global = true)]
    pub data: Option<PathBuf>,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty store
    Init,

    /// Show store statistics
    Status,

    /// Register a new document
    Add {
        /// Document id
        id: String,

        /// Parent document id (repeatable)
        #[arg(short, long = "parent")]
        parents: Vec<String>,

        /// Metadata as an inline JSON object
        #[arg(short, long, conflicts_with = "meta_file")]
        meta: Option<String>,

        /// Read metadata from a JSON file
        #[arg(long)]
        meta_file: Option<PathBuf>,
    },

    /// Record that DERIVED was produced from PARENT
    Derive {
        /// Source document id
        parent: String,

        /// Derived document id
        derived: String,

        /// Transformation type (conversion, extraction, merge, split, update)
        #[arg(short = 't', long = "type", value_parser = parse_transformation_type)]
        kind: TransformationType,

        /// Human-readable description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Transformation parameter as key=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Print a document's lineage record
    Show {
        /// Document id
        id: String,
    },

    /// Follow derived_from links, newest first
    Chain {
        /// Document id
        id: String,

        /// Maximum number of documents returned
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// List documents reachable through parent links
    Ancestors {
        /// Document id
        id: String,

        /// Maximum number of hops
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// List documents reachable through child links
    Descendants {
        /// Document id
        id: String,

        /// Maximum number of hops
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// List a document's transformations, oldest first
    History {
        /// Document id
        id: String,

        /// Only this transformation type
        #[arg(short = 't', long = "type", value_parser = parse_transformation_type)]
        kind: Option<TransformationType>,

        /// Only entries at or after this RFC 3339 time
        #[arg(long, value_parser = parse_timestamp)]
        since: Option<DateTime<Utc>>,

        /// Only entries before this RFC 3339 time
        #[arg(long, value_parser = parse_timestamp)]
        until: Option<DateTime<Utc>>,
    },

    /// Delete a document and remove every reference to it
    Delete {
        /// Document id
        id: String,
    },

    /// Check the whole store for broken or cyclic relationships
    Validate,

    /// Migrate documents to a new schema version
    Migrate {
        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Target schema version
        #[arg(long)]
        to: u32,

        /// Metadata field to set as key=value (repeatable)
        #[arg(short, long = "set")]
        sets: Vec<String>,
    },

    /// Export the store as a checksummed snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a snapshot into the store
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn parse_transformation_type(s: &str) -> Result<TransformationType, String> {
    s.parse().map_err(|e: LineageError| e.to_string())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), LineageError> {
    let config = DoclineConfig::load(cli.config.as_deref())?.with_overrides(cli.data, cli.backend);
    let out = Output {
        json: cli.json_mode,
        quiet: cli.quiet,
    };
    let depth = |requested: Option<usize>| requested.unwrap_or(config.query.default_chain_depth);

    match cli.command {
        Some(Commands::Init) => cmd_init(&config, out),
        Some(Commands::Status) | None => cmd_status(&config, out),
        Some(Commands::Add {
            id,
            parents,
            meta,
            meta_file,
        }) => cmd_add(&config, out, &id, &parents, meta.as_deref(), meta_file.as_deref()),
        Some(Commands::Derive {
            parent,
            derived,
            kind,
            description,
            params,
        }) => cmd_derive(&config, out, &parent, &derived, kind, &description, &params),
        Some(Commands::Show { id }) => cmd_show(&config, out, &id),
        Some(Commands::Chain { id, depth: d }) => cmd_chain(&config, out, &id, depth(d)),
        Some(Commands::Ancestors { id, depth: d }) => {
            cmd_walk(&config, out, &id, depth(d), WalkDirection::Ancestors)
        }
        Some(Commands::Descendants { id, depth: d }) => {
            cmd_walk(&config, out, &id, depth(d), WalkDirection::Descendants)
        }
        Some(Commands::History {
            id,
            kind,
            since,
            until,
        }) => cmd_history(&config, out, &id, kind, since, until),
        Some(Commands::Delete { id }) => cmd_delete(&config, out, &id),
        Some(Commands::Validate) => cmd_validate(&config, out),
        Some(Commands::Migrate { ids, to, sets }) => cmd_migrate(&config, out, &ids, to, &sets),
        Some(Commands::Export { output }) => cmd_export(&config, out, &output),
        Some(Commands::Import { input }) => cmd_import(&config, out, &input),
    }
}
