use clap::Parser;
use libreap::{CleanupConfig, RunSummary, parse_interval};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};


/// Reap - Container Registry Cleanup
///
/// Deletes image versions and tags from GHCR container packages according
/// to a declarative policy, preserving multi-architecture images and
/// attached attestations, signatures and SBOMs.
#[derive(Parser, Debug)]
#[command(name = "reap")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Owner (user or organisation) of the target packages
    #[arg(long, env = "GITHUB_REPOSITORY_OWNER")]
    owner: String,

    /// Package name(s), comma separated. Patterns need --expand-packages
    #[arg(long = "package", value_name = "NAMES")]
    packages: String,

    /// GitHub token with package read/write/delete permission
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// Expand package patterns against the owner's package listing
    #[arg(long)]
    expand_packages: bool,

    /// Tags to delete: comma-separated wildcards, or a regex with --use-regex
    #[arg(long, value_name = "PATTERNS")]
    delete_tags: Option<String>,

    /// Tags to protect from every deletion stage
    #[arg(long, value_name = "PATTERNS")]
    exclude_tags: Option<String>,

    /// Interpret tag and package patterns as regular expressions
    #[arg(long)]
    use_regex: bool,

    /// Delete untagged versions. Defaults to true when no other selection
    /// option is configured
    #[arg(long, value_name = "BOOL")]
    delete_untagged: Option<bool>,

    /// Delete multi-arch images all of whose children are missing
    #[arg(long)]
    delete_ghost_images: bool,

    /// Delete multi-arch images with at least one missing child
    #[arg(long)]
    delete_partial_images: bool,

    /// Delete referrer images whose subject no longer exists
    #[arg(long)]
    delete_orphaned_images: bool,

    /// Keep only the N most recent tagged versions
    #[arg(long, value_name = "N")]
    keep_n_tagged: Option<usize>,

    /// Keep only the N most recent untagged versions
    #[arg(long, value_name = "N")]
    keep_n_untagged: Option<usize>,

    /// Only consider versions older than this interval (e.g. "30 days")
    #[arg(long, value_name = "INTERVAL")]
    older_than: Option<String>,

    /// Log intended deletions without performing them
    #[arg(long)]
    dry_run: bool,

    /// Scan the package for inconsistencies after cleaning
    #[arg(long)]
    validate: bool,
}

impl Cli {
    fn into_config(self) -> libreap::Result<CleanupConfig> {
        let older_than = self
            .older_than
            .as_deref()
            .map(parse_interval)
            .transpose()?;

        Ok(CleanupConfig {
            owner: self.owner,
            packages: self
                .packages
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            expand_packages: self.expand_packages,
            token: self.token,
            delete_tags: self.delete_tags,
            exclude_tags: self.exclude_tags,
            use_regex: self.use_regex,
            delete_untagged: self.delete_untagged,
            delete_ghost_images: self.delete_ghost_images,
            delete_partial_images: self.delete_partial_images,
            delete_orphaned_images: self.delete_orphaned_images,
            keep_n_tagged: self.keep_n_tagged,
            keep_n_untagged: self.keep_n_untagged,
            older_than,
            dry_run: self.dry_run,
            validate: self.validate,
        })
    }
}

fn execute(cli: Cli) -> libreap::Result<RunSummary> {
    let config = cli.into_config()?;
    libreap::run(&config)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reap=info,libreap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let dry_run = cli.dry_run;

    match execute(cli) {
        Ok(summary) => {
            let suffix = if dry_run { " (dry-run)" } else { "" };
            println!(
                "Cleaned {} package(s): {} version(s) deleted ({} multi-arch), {} tag(s) untagged{}",
                summary.packages_cleaned,
                summary.stats.deleted_versions,
                summary.stats.deleted_multiarch,
                summary.tags_untagged,
                suffix
            );
            if summary.warnings > 0 {
                println!("Validation reported {} warning(s)", summary.warnings);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("cleanup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
