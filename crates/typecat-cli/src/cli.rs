//! CLI argument parsing with clap.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use typecat_core::{MemberKind, TypeKind};

const CLI_AFTER_HELP: &str = "\
Patterns accept * and ? wildcards; without them they match as substrings.
A pattern containing '.' is matched against full type names.

The catalog defaults to catalog.db in $TYPECAT_HOME (or ~/.typecat).";

/// typecat - catalog .NET assembly metadata into SQLite and query it
#[derive(Parser, Debug)]
#[command(
    name = "typecat",
    version,
    about = "Catalog .NET assembly metadata into SQLite and query it",
    after_help = CLI_AFTER_HELP
)]
pub struct Cli {
    /// Catalog database to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Config file to use instead of $TYPECAT_HOME/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Catalog one or more module files
    Catalog {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
        /// Re-catalog even when the file is unchanged
        #[arg(long)]
        force: bool,
        /// Attach the modules to a product group
        #[arg(long, value_name = "TAG")]
        group: Option<String>,
    },

    /// Search types by name
    Types {
        pattern: Option<String>,
        #[arg(long, value_parser = parse_type_kind)]
        kind: Option<TypeKind>,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        module: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Search members by name
    Members {
        pattern: Option<String>,
        #[arg(long, value_parser = parse_member_kind)]
        kind: Option<MemberKind>,
        /// Declaring type, by full or simple name
        #[arg(long = "type", value_name = "TYPE")]
        declaring_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// List the types in a namespace
    Namespace {
        name: String,
        #[arg(long)]
        module: Option<String>,
    },

    /// List namespaces
    Namespaces {
        #[arg(long)]
        module: Option<String>,
    },

    /// Show a type with its members, parameters and enum values
    Show {
        #[arg(value_name = "TYPE")]
        type_name: String,
    },

    /// Show the inheritance chain of a type
    Inherits {
        #[arg(value_name = "TYPE")]
        type_name: String,
    },

    /// List types implementing an interface
    Implementors {
        #[arg(value_name = "INTERFACE")]
        interface: String,
    },

    /// List direct subclasses of a type
    Derived {
        #[arg(value_name = "TYPE")]
        type_name: String,
    },

    /// Full-text search over member names and documentation
    Docs {
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// List cataloged modules
    Modules {
        #[arg(long, value_name = "TAG")]
        group: Option<String>,
    },

    /// List product groups
    Groups,

    /// Remove a module by name, identity or path
    Remove { module: String },

    /// Show catalog status
    Status,
}

fn parse_type_kind(s: &str) -> Result<TypeKind, String> {
    s.parse().map_err(|_| {
        format!("unknown type kind '{s}' (expected class, interface, enum, struct or delegate)")
    })
}

fn parse_member_kind(s: &str) -> Result<MemberKind, String> {
    s.parse().map_err(|_| {
        format!(
            "unknown member kind '{s}' (expected constructor, method, property, field or event)"
        )
    })
}

impl Cli {
    /// `env_logger` filter implied by `-v`; `RUST_LOG` still wins.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}
