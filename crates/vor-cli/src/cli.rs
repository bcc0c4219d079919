use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vor_types::{ItemId, Version};

#[derive(Parser)]
#[command(
    name = "vor",
    about = "Versioned object repository -- snapshot inspection and maintenance",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Repository configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show a snapshot's header and table sizes
    Inspect(SnapshotArgs),
    /// List the items live at a version
    Items(ItemsArgs),
    /// List the versions an item was written at
    Versions(VersionsArgs),
    /// Dump an item record and its value records
    Describe(DescribeArgs),
    /// Check a snapshot's integrity
    Verify(SnapshotArgs),
    /// Remove records no version at or after a cutoff can see
    Purge(PurgeArgs),
    /// Find items by indexed text
    Search(SearchArgs),
    /// Show the effective repository configuration
    Config,
}

#[derive(Args)]
pub struct SnapshotArgs {
    pub snapshot: PathBuf,
}

#[derive(Args)]
pub struct ItemsArgs {
    pub snapshot: PathBuf,
    /// Defaults to the snapshot's current version
    #[arg(long)]
    pub version: Option<Version>,
}

#[derive(Args)]
pub struct VersionsArgs {
    pub snapshot: PathBuf,
    pub item: ItemId,
}

#[derive(Args)]
pub struct DescribeArgs {
    pub snapshot: PathBuf,
    pub item: ItemId,
    #[arg(long)]
    pub version: Option<Version>,
    /// Only this attribute
    #[arg(long)]
    pub attr: Option<String>,
}

#[derive(Args)]
pub struct PurgeArgs {
    pub snapshot: PathBuf,
    #[arg(long)]
    pub keep_from: Version,
    /// Write the purged snapshot here instead of in place
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct SearchArgs {
    pub snapshot: PathBuf,
    pub term: String,
    #[arg(long)]
    pub version: Option<Version>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from(["vor", "inspect", "repo.vors", "--format", "json", "-v"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Inspect(args) => assert_eq!(args.snapshot, PathBuf::from("repo.vors")),
            _ => panic!("expected inspect"),
        }
    }

    #[test]
    fn item_ids_parse_with_or_without_prefix() {
        let id = ItemId::from_u128(7);
        for arg in [id.to_string(), format!("item:{id}")] {
            let cli = Cli::try_parse_from(["vor", "versions", "repo.vors", &arg]).unwrap();
            match cli.command {
                Command::Versions(args) => assert_eq!(args.item, id),
                _ => panic!("expected versions"),
            }
        }
    }

    #[test]
    fn purge_requires_a_cutoff() {
        assert!(Cli::try_parse_from(["vor", "purge", "repo.vors"]).is_err());
        let cli = Cli::try_parse_from(["vor", "purge", "repo.vors", "--keep-from", "4", "-o", "out.vors"])
            .unwrap();
        match cli.command {
            Command::Purge(args) => {
                assert_eq!(args.keep_from, 4);
                assert_eq!(args.output, Some(PathBuf::from("out.vors")));
            }
            _ => panic!("expected purge"),
        }
    }

    #[test]
    fn bad_item_ids_are_rejected() {
        assert!(Cli::try_parse_from(["vor", "versions", "repo.vors", "not-a-uuid"]).is_err());
    }
}
