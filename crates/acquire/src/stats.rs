use std::collections::BTreeMap;

use models::Environment;

/// Failure classification and totals for one acquisition run.
///
/// Acquisition never surfaces exceptions for individual apps; it surfaces
/// these counts, plus warning lists naming the clusters and deployments
/// whose previous state was preserved because discovery failed.
#[derive(Debug, Default)]
pub struct SyncStats {
    /// The orgs document itself could not be fetched; the whole previous
    /// lock was carried over.
    pub orgs_fetch_failed: bool,
    /// Orgs with at least one environment tag.
    pub orgs: usize,
    pub clusters: usize,
    pub deployments: usize,
    /// Deployments resolved to a concrete release this run.
    pub releases_resolved: usize,

    /// Archives downloaded this run.
    pub updated: usize,
    /// Downloads that failed and were recorded as `failed`.
    pub failed: usize,
    /// Deployments whose version matched the previous successful entry.
    pub up_to_date: usize,
    /// Skipped because the previous attempt failed and retry is off.
    pub skipped_prior_failure: usize,
    /// No studio host had a release matching the deployed version.
    pub no_matching_release: usize,
    /// Keys dropped from the lock; their archives were deleted.
    pub removed: usize,

    /// `{env}/{org}` clusters whose deployments listing failed but whose
    /// previously-acquired apps were kept.
    pub clusters_stale: Vec<String>,
    /// `{env}/{org}/{app}` deployments kept from the previous lock because
    /// no matching release could be found this run.
    pub deployments_stale: Vec<String>,

    /// Successful apps per environment after the lock was written.
    pub apps_per_env: BTreeMap<Environment, usize>,
    pub total_apps: usize,
}

impl SyncStats {
    /// One-line-per-item run summary, in the order users read them.
    pub fn summary(&self) -> Vec<String> {
        let mut out = vec![
            format!("{} updated", self.updated),
            format!("{} failed", self.failed),
        ];
        if self.up_to_date > 0 {
            out.push(format!("{} already up to date", self.up_to_date));
        }
        if self.skipped_prior_failure > 0 {
            out.push(format!(
                "{} skipped due to previous failure",
                self.skipped_prior_failure
            ));
        }
        if self.no_matching_release > 0 {
            out.push(format!(
                "{} skipped due to no matching releases",
                self.no_matching_release
            ));
        }
        if self.removed > 0 {
            out.push(format!("{} apps removed", self.removed));
        }
        out
    }

    pub fn per_env_summary(&self) -> Vec<String> {
        self.apps_per_env
            .iter()
            .map(|(env, count)| format!("{count} apps in {env}"))
            .collect()
    }
}
