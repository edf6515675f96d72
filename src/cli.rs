use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

/// Builds a changelog from the tags, closed issues and merged changes of a hosted project
///
/// Every issue and merge request is attributed to the first tag created after it was closed or merged, the ones
/// newer than the latest tag can be collected under a new release with `--new-release`.
#[derive(Parser)]
#[cfg_attr(debug_assertions, derive(Debug))]
#[command(author, version, verbatim_doc_comment)]
pub struct Cli {
    /// Path of the config file to use (defaults to the user's config dir)
    #[arg(long, env = "LEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Changelog generation options
    #[command(flatten)]
    pub process: GenerateProcess,
}

/// Generates the changelog of a project
#[derive(Args, Clone)]
#[cfg_attr(debug_assertions, derive(Debug))]
pub struct GenerateProcess {
    /// Path of the project on the provider, like `owner/name`
    pub repository: String,

    /// Provider hosting the project
    #[arg(short, long, value_enum, default_value_t = Provider::Github)]
    pub provider: Provider,

    /// Name of a new release collecting the changes after the latest tag
    #[arg(short, long, value_name = "NAME")]
    pub new_release: Option<String>,

    /// File to write the changelog to, or '-' for stdout (defaults to the configured path)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<String>,

    /// Whether to hide the progress
    #[arg(short, long)]
    pub quiet: bool,

    /// Overrides the maximum number of seconds the retrieval can take
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Overrides the number of concurrent workers per entity type
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,
}

/// Supported project-hosting providers
#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum Provider {
    Github,
    Gitlab,
}
