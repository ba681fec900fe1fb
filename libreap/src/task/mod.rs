//! Run orchestration.
//!
//! A run resolves the target package set, then cleans each package
//! strictly in sequence: load the index, build the graph, apply policy,
//! execute deletions, optionally validate. Packages are never processed
//! concurrently; interleaving two cleanups of the same package would race
//! the reloads the untag protocol depends on.

use crate::client::{GhcrClient, RegistryClient};
use crate::config::CleanupConfig;
use crate::error::{ReapError, Result};
use crate::executor::{CleanupStats, Executor};
use crate::graph::ImageGraph;
use crate::index::PackageIndex;
use crate::packages::{GithubPackages, PackageClient};
use crate::pattern::{self, Matcher};
use crate::policy::FilterPipeline;
use crate::validate::validate_package;
use tracing::{info, info_span};


/// Result of cleaning one package.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PackageOutcome {
    pub stats: CleanupStats,
    /// Validation warnings, when the scan ran.
    pub warnings: u32,
    /// Tags removed through the untag protocol.
    pub tags_untagged: usize,
}

/// Aggregate over all packages of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub packages_cleaned: usize,
    pub stats: CleanupStats,
    pub warnings: u32,
    pub tags_untagged: usize,
}

impl RunSummary {
    fn absorb(&mut self, outcome: PackageOutcome) {
        self.packages_cleaned += 1;
        self.stats.deleted_versions += outcome.stats.deleted_versions;
        self.stats.deleted_multiarch += outcome.stats.deleted_multiarch;
        self.warnings += outcome.warnings;
        self.tags_untagged += outcome.tags_untagged;
    }
}

/// Expands the configured package names against the owner's packages.
///
/// Literal names pass through untouched. Patterns (always, in regex mode;
/// wildcard-bearing names otherwise) are matched against the owner's
/// package listing, which requires a token able to list packages.
/// Resolving to nothing is a configuration error: a cleanup that silently
/// does nothing is worse than one that refuses to start.
pub fn resolve_packages(
    config: &CleanupConfig,
    client: &mut dyn PackageClient,
) -> Result<Vec<String>> {
    let mut resolved: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !resolved.contains(&name) {
            resolved.push(name);
        }
    };

    if config.expand_packages {
        let available = client.list_packages()?;
        for entry in &config.packages {
            if config.use_regex || pattern::is_wildcard(entry) {
                let matcher = Matcher::new(entry, config.use_regex)?;
                for name in available.iter().filter(|n| matcher.matches(n)) {
                    push(name.clone());
                }
            } else {
                push(entry.clone());
            }
        }
    } else {
        for entry in &config.packages {
            push(entry.clone());
        }
    }

    if resolved.is_empty() {
        return Err(ReapError::bad_config(format!(
            "no packages resolve from '{}'",
            config.packages.join(",")
        )));
    }
    Ok(resolved)
}

/// Cleans one package end to end.
pub fn cleanup_package(
    config: &CleanupConfig,
    registry: &mut dyn RegistryClient,
    packages: &mut dyn PackageClient,
    package: &str,
) -> Result<PackageOutcome> {
    let mut index = PackageIndex::load(packages, package)?;
    if index.is_empty() {
        info!(package, "package has no versions, nothing to do");
        return Ok(PackageOutcome::default());
    }

    let mut graph = ImageGraph::build(registry, &index)?;

    let pipeline = FilterPipeline::new(config);
    let outcome = pipeline.run(registry, packages, &mut index, &graph)?;

    let executor = Executor::new(config.dry_run);
    let stats = executor.execute(registry, packages, &index, &mut graph, &outcome)?;

    let mut warnings = 0;
    if config.validate {
        index.reload(packages)?;
        warnings = validate_package(registry, &index)?;
    }

    info!(
        package,
        deleted = stats.deleted_versions,
        multiarch = stats.deleted_multiarch,
        untagged = outcome.untagged.len(),
        "package cleanup finished"
    );

    Ok(PackageOutcome {
        stats,
        warnings,
        tags_untagged: outcome.untagged.len(),
    })
}

/// Runs a full cleanup with production clients.
///
/// Fails fast on configuration errors, then cleans each resolved package
/// sequentially. Any non-recoverable API error aborts the run.
pub fn run(config: &CleanupConfig) -> Result<RunSummary> {
    config.validate()?;

    let mut hub = GithubPackages::new(&config.owner, &config.token, config.dry_run)?;
    let targets = resolve_packages(config, &mut hub)?;
    info!(count = targets.len(), "resolved target packages");

    let mut summary = RunSummary::default();
    for package in &targets {
        let span = info_span!("cleanup", package = %package);
        let _enter = span.enter();

        let mut registry = GhcrClient::new(&config.owner, package, &config.token)?;
        let outcome = cleanup_package(config, &mut registry, &mut hub, package)?;
        summary.absorb(outcome);
    }

    {
        let span = info_span!("cleanup statistics");
        let _enter = span.enter();
        info!(
            packages = summary.packages_cleaned,
            deleted_versions = summary.stats.deleted_versions,
            deleted_multiarch = summary.stats.deleted_multiarch,
            tags_untagged = summary.tags_untagged,
            warnings = summary.warnings,
            dry_run = config.dry_run,
            "cleanup complete"
        );
    }

    Ok(summary)
}
