use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use keep_types::EntityId;

#[derive(Parser)]
#[command(
    name = "keep",
    about = "keep -- single-file entity stores with automatic schema migration",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding `<name>.schema.toml` resources
    #[arg(long, global = true, default_value = "schemas")]
    pub schemas: PathBuf,

    /// Directory for backing files (default: the per-user data directory)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Explicit backing file, overriding the resolved location
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the schemas in the schema directory
    Schemas,
    /// Open (creating or migrating) the store for a schema
    Open(SchemaArgs),
    /// Show the fingerprint of a schema
    Fingerprint(SchemaArgs),
    /// Create an entity and save it
    Create(CreateArgs),
    /// List the entities of a kind
    List(ListArgs),
    /// Show one entity
    Show(ShowArgs),
    /// Delete an entity and save
    Delete(ShowArgs),
}

#[derive(Args)]
pub struct SchemaArgs {
    pub schema: String,
}

#[derive(Args)]
pub struct CreateArgs {
    pub schema: String,
    pub kind: String,
    /// Attribute values as `name=value`
    pub values: Vec<String>,
    /// Relationship targets as `name=#id`
    #[arg(long = "link")]
    pub links: Vec<String>,
}

#[derive(Args)]
pub struct ListArgs {
    pub schema: String,
    pub kind: String,
}

#[derive(Args)]
pub struct ShowArgs {
    pub schema: String,
    pub id: EntityId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_open() {
        let cli = Cli::try_parse_from(["keep", "open", "MyModel"]).unwrap();
        if let Command::Open(args) = cli.command {
            assert_eq!(args.schema, "MyModel");
        } else {
            panic!("wrong command");
        }
        assert_eq!(cli.schemas, PathBuf::from("schemas"));
    }

    #[test]
    fn parse_create_with_values_and_links() {
        let cli = Cli::try_parse_from([
            "keep", "create", "MyModel", "Pet", "name=Rex", "--link", "owner=#1",
        ])
        .unwrap();
        if let Command::Create(args) = cli.command {
            assert_eq!(args.kind, "Pet");
            assert_eq!(args.values, vec!["name=Rex"]);
            assert_eq!(args.links, vec!["owner=#1"]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_show_accepts_hash_ids() {
        let cli = Cli::try_parse_from(["keep", "show", "MyModel", "#7"]).unwrap();
        if let Command::Show(args) = cli.command {
            assert_eq!(args.id, EntityId::new(7));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_options() {
        let cli = Cli::try_parse_from([
            "keep",
            "--schemas",
            "/tmp/s",
            "--store",
            "/tmp/x.sqlite",
            "--format",
            "json",
            "list",
            "MyModel",
            "Person",
        ])
        .unwrap();
        assert_eq!(cli.schemas, PathBuf::from("/tmp/s"));
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/x.sqlite")));
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(matches!(cli.command, Command::List(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["keep", "--verbose", "schemas"]).unwrap();
        assert!(cli.verbose);
    }
}
