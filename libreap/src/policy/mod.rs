//! The policy pipeline.
//!
//! Policy runs as an ordered sequence of stages over a mutable candidate
//! set. Every top-level digest starts as a candidate; each stage either
//! protects candidates (exclude, age) or moves them into the delete set
//! (tag deletion, structural cleanup, keep counts). The ordering is part
//! of the contract:
//!
//! - exclusion runs first and dominates: an excluded digest is never
//!   deleted by a later stage;
//! - the age filter narrows scope before anything selects;
//! - tag deletion mutates the package (untagging) and therefore runs
//!   before the count-based stages, which re-read tag state;
//! - ghost/partial/orphan cleanup precedes the keep counts so broken
//!   images do not consume keep slots;
//! - tagged and untagged keep counts are independent of each other.

use crate::client::RegistryClient;
use crate::config::CleanupConfig;
use crate::digest;
use crate::error::Result;
use crate::executor;
use crate::graph::ImageGraph;
use crate::index::PackageIndex;
use crate::packages::PackageClient;
use crate::pattern::Matcher;
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{info, info_span, warn};


/// What the pipeline decided, handed to the executor.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Digests to delete, in stage order.
    pub delete_order: Vec<String>,
    /// The same digests as a set, for membership checks.
    pub delete_set: BTreeSet<String>,
    /// Tags matched by the exclude patterns; referrers published under
    /// these names survive the cascade.
    pub excluded_tags: BTreeSet<String>,
    /// Tags removed through the untag protocol during the run.
    pub untagged: Vec<String>,
}

/// Applies the configured policy over one package.
pub struct FilterPipeline<'a> {
    config: &'a CleanupConfig,
    filter_set: BTreeSet<String>,
    delete_set: BTreeSet<String>,
    delete_order: Vec<String>,
    excluded_digests: BTreeSet<String>,
    excluded_tags: BTreeSet<String>,
    untagged: Vec<String>,
    /// Tags whose untag upload failed; they are not retried this run.
    failed_untags: BTreeSet<String>,
}

impl<'a> FilterPipeline<'a> {
    pub fn new(config: &'a CleanupConfig) -> Self {
        Self {
            config,
            filter_set: BTreeSet::new(),
            delete_set: BTreeSet::new(),
            delete_order: Vec::new(),
            excluded_digests: BTreeSet::new(),
            excluded_tags: BTreeSet::new(),
            untagged: Vec::new(),
            failed_untags: BTreeSet::new(),
        }
    }

    /// Runs every stage and returns the selection.
    ///
    /// The index is reloaded whenever the untag protocol mutates the
    /// package; the graph is not, because untagging never changes parent
    /// and child relations of surviving digests.
    pub fn run(
        mut self,
        registry: &mut dyn RegistryClient,
        packages: &mut dyn PackageClient,
        index: &mut PackageIndex,
        graph: &ImageGraph,
    ) -> Result<PipelineOutcome> {
        self.filter_set = graph.top_level_digests().clone();

        self.stage_exclude(index)?;
        self.stage_age(index);
        self.stage_delete_tags(registry, packages, index)?;
        self.stage_structural(registry, index)?;
        self.stage_keep_n_tagged(index);
        self.stage_untagged(index);

        Ok(PipelineOutcome {
            delete_order: self.delete_order,
            delete_set: self.delete_set,
            excluded_tags: self.excluded_tags,
            untagged: self.untagged,
        })
    }

    /// Moves a digest into the delete set unless it is excluded.
    fn mark_delete(&mut self, digest: &str, reason: &str) {
        if self.excluded_digests.contains(digest) {
            return;
        }
        self.filter_set.remove(digest);
        if self.delete_set.insert(digest.to_string()) {
            info!(digest, reason, "selected for deletion");
            self.delete_order.push(digest.to_string());
        }
    }

    /// Stage A: resolve exclude patterns and pull their digests out of the
    /// candidate set. Re-run after every index reload so tags that appear
    /// mid-run (or digests whose tag set changed) stay protected.
    fn stage_exclude(&mut self, index: &PackageIndex) -> Result<()> {
        let Some(selection) = &self.config.exclude_tags else {
            return Ok(());
        };
        let span = info_span!("excluding tags");
        let _enter = span.enter();

        let matcher = Matcher::new(selection, self.config.use_regex)?;
        let mut matched: Vec<(String, Option<String>)> = Vec::new();
        for tag in index.tags() {
            if matcher.matches(tag) {
                matched.push((tag.to_string(), index.digest_by_tag(tag).map(str::to_string)));
            }
        }

        for (tag, target) in matched {
            if self.excluded_tags.insert(tag.clone()) {
                info!(tag = %tag, "excluding tag");
            }
            if let Some(digest) = target {
                self.excluded_digests.insert(digest.clone());
                self.filter_set.remove(&digest);
            }
        }
        Ok(())
    }

    /// Stage B: drop candidates newer than the cutoff.
    fn stage_age(&mut self, index: &PackageIndex) {
        let Some(older_than) = self.config.older_than else {
            return;
        };
        let cutoff = Utc::now() - older_than;

        let before = self.filter_set.len();
        self.filter_set.retain(|digest| {
            index
                .version_by_digest(digest)
                .is_some_and(|v| v.updated_at < cutoff)
        });
        info!(
            cutoff = %cutoff,
            retained = self.filter_set.len(),
            skipped = before - self.filter_set.len(),
            "applied age filter"
        );
    }

    /// Stage C: two-phase tag deletion.
    ///
    /// Matched tags on single-tag versions delete the version outright.
    /// Matched tags on multi-tag versions go through the untag protocol,
    /// which mutates the package; after each round the index is reloaded
    /// and matching is re-evaluated, so a tag that became the version's
    /// last tag graduates to a standard delete.
    fn stage_delete_tags(
        &mut self,
        registry: &mut dyn RegistryClient,
        packages: &mut dyn PackageClient,
        index: &mut PackageIndex,
    ) -> Result<()> {
        let Some(selection) = &self.config.delete_tags else {
            return Ok(());
        };
        let matcher = Matcher::new(selection, self.config.use_regex)?;

        loop {
            let mut standard: Vec<(String, String)> = Vec::new();
            let mut multi: Vec<(String, String)> = Vec::new();

            for tag in index.tags() {
                if self.excluded_tags.contains(tag)
                    || self.failed_untags.contains(tag)
                    || !matcher.matches(tag)
                {
                    continue;
                }
                let Some(target) = index.digest_by_tag(tag) else {
                    continue;
                };
                if !self.filter_set.contains(target) {
                    continue;
                }
                let Some(version) = index.version_by_digest(target) else {
                    continue;
                };
                if version.tags.len() >= 2 {
                    multi.push((tag.to_string(), target.to_string()));
                } else {
                    standard.push((tag.to_string(), target.to_string()));
                }
            }

            for (tag, target) in &standard {
                self.mark_delete(target, &format!("tag '{}' matched delete pattern", tag));
            }

            if multi.is_empty() {
                return Ok(());
            }

            if self.config.dry_run {
                for (tag, target) in &multi {
                    info!(tag = %tag, digest = %target, "dry-run: would untag");
                }
                return Ok(());
            }

            let span = info_span!("untagging images");
            let _enter = span.enter();
            let mut progressed = false;
            for (tag, target) in &multi {
                // earlier untags in this round may have changed the version
                let still_multi = index
                    .version_by_digest(target)
                    .is_some_and(|v| v.tags.iter().any(|t| t == tag) && v.tags.len() >= 2);
                if !still_multi {
                    continue;
                }
                match executor::untag_image(registry, packages, index, tag, target) {
                    Ok(()) => {
                        info!(tag = %tag, digest = %target, "untagged");
                        self.untagged.push(tag.clone());
                        progressed = true;
                    }
                    Err(e) => {
                        // a failed upload aborts this tag only
                        warn!(tag = %tag, error = %e, "failed to untag, skipping tag");
                        self.failed_untags.insert(tag.clone());
                    }
                }
            }

            // the package changed; re-resolve exclusions before matching
            // again
            self.stage_exclude(index)?;

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Stage D: structural cleanup of ghost and partial indexes and of
    /// orphaned referrers.
    fn stage_structural(
        &mut self,
        registry: &mut dyn RegistryClient,
        index: &PackageIndex,
    ) -> Result<()> {
        if self.config.delete_ghost_images || self.config.delete_partial_images {
            let span = info_span!("finding ghost images to delete");
            let _enter = span.enter();

            for digest in self.filter_set.clone() {
                let manifest = match registry.manifest_by_digest(&digest) {
                    Ok(manifest) => manifest,
                    Err(e) if e.is_missing() => continue,
                    Err(e) => return Err(e),
                };
                if !manifest.is_index() {
                    continue;
                }
                let children = manifest.child_digests();
                if children.is_empty() {
                    continue;
                }
                let absent = children
                    .iter()
                    .filter(|c| !index.contains_digest(c))
                    .count();
                let matches = if self.config.delete_partial_images {
                    absent > 0
                } else {
                    absent == children.len()
                };
                if matches {
                    let kind = if absent == children.len() { "ghost" } else { "partial" };
                    self.mark_delete(&digest, &format!("{} image, {} children missing", kind, absent));
                }
            }
        }

        if self.config.delete_orphaned_images {
            let span = info_span!("finding orphaned referrers to delete");
            let _enter = span.enter();

            let tags: Vec<String> = index.tags().map(str::to_string).collect();
            for tag in tags {
                if self.excluded_tags.contains(&tag) {
                    continue;
                }
                let Some(subject) = digest::referrer_subject_digest(&tag) else {
                    continue;
                };
                if index.contains_digest(&subject) {
                    continue;
                }
                let Some(target) = index.digest_by_tag(&tag).map(str::to_string) else {
                    continue;
                };
                self.mark_delete(&target, &format!("referrer tag '{}' has no subject", tag));
            }
        }

        Ok(())
    }

    /// Stage E: keep the N most recently updated tagged candidates.
    fn stage_keep_n_tagged(&mut self, index: &PackageIndex) {
        let Some(keep) = self.config.keep_n_tagged else {
            return;
        };

        let mut tagged = self.collect_by_recency(index, true);
        let evicted = tagged.split_off(keep.min(tagged.len()));
        info!(
            keep,
            kept = tagged.len(),
            evicted = evicted.len(),
            "keeping most recent tagged images"
        );
        for digest in evicted {
            self.mark_delete(&digest, "exceeds keep-n-tagged");
        }
    }

    /// Stage F: keep the N most recently updated untagged candidates, or
    /// delete all of them.
    fn stage_untagged(&mut self, index: &PackageIndex) {
        if let Some(keep) = self.config.keep_n_untagged {
            let mut untagged = self.collect_by_recency(index, false);
            let evicted = untagged.split_off(keep.min(untagged.len()));
            info!(
                keep,
                kept = untagged.len(),
                evicted = evicted.len(),
                "keeping most recent untagged images"
            );
            for digest in evicted {
                self.mark_delete(&digest, "exceeds keep-n-untagged");
            }
        } else if self.config.delete_untagged_effective() {
            for digest in self.filter_set.clone() {
                let untagged = index
                    .version_by_digest(&digest)
                    .is_some_and(|v| !v.is_tagged());
                if untagged {
                    self.mark_delete(&digest, "untagged");
                }
            }
        }
    }

    /// Candidates with the requested tag state, newest first. Ties break on
    /// the digest so runs are deterministic.
    fn collect_by_recency(&self, index: &PackageIndex, tagged: bool) -> Vec<String> {
        let mut versions: Vec<(String, chrono::DateTime<Utc>)> = self
            .filter_set
            .iter()
            .filter_map(|digest| {
                let version = index.version_by_digest(digest)?;
                (version.is_tagged() == tagged).then(|| (digest.clone(), version.updated_at))
            })
            .collect();
        versions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        versions.into_iter().map(|(digest, _)| digest).collect()
    }
}
