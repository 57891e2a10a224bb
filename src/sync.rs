//! Bulk membership syncer
//!
//! Re-grants a role to every member a snapshot recorded as holding it.
//! Members already holding the role live are skipped. The rest are split
//! into fixed-size batches; up to `concurrency` batches run together, and
//! every grant inside a batch is joined without short-circuiting, so one
//! member's failure never cancels its siblings. A fixed pause separates
//! batch groups. Failed grants are counted, never retried.

use crate::config::SyncSettings;
use crate::error::Result;
use crate::provider::Platform;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome of one membership sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub role_id: String,
    /// Distinct members the snapshot recorded
    pub targeted: usize,
    /// Members skipped because they already hold the role
    pub already_held: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
    /// Successful grants per second
    pub throughput: f64,
}

impl SyncReport {
    /// Members a grant was attempted for
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct MembershipSyncer {
    platform: Arc<dyn Platform>,
    settings: SyncSettings,
}

impl MembershipSyncer {
    pub fn new(platform: Arc<dyn Platform>, settings: SyncSettings) -> Self {
        Self { platform, settings }
    }

    /// Grant `role_id` to each of `members` that does not hold it yet
    pub async fn sync(
        &self,
        space_id: &str,
        role_id: &str,
        members: &[String],
    ) -> Result<SyncReport> {
        let started = Instant::now();

        let mut seen = HashSet::new();
        let targets: Vec<&str> = members
            .iter()
            .map(String::as_str)
            .filter(|m| seen.insert(*m))
            .collect();

        let holding: HashSet<String> = self
            .platform
            .role_members(space_id, role_id)
            .await?
            .into_iter()
            .collect();
        let pending: Vec<&str> = targets
            .iter()
            .copied()
            .filter(|m| !holding.contains(*m))
            .collect();

        let mut report = SyncReport {
            role_id: role_id.to_string(),
            targeted: targets.len(),
            already_held: targets.len() - pending.len(),
            ..SyncReport::default()
        };

        let batch_size = self.settings.batch_size.max(1);
        let concurrency = self.settings.concurrency.max(1);
        let batches: Vec<&[&str]> = pending.chunks(batch_size).collect();
        report.batches = batches.len();

        tracing::info!(
            space = %space_id,
            role = %role_id,
            targeted = report.targeted,
            already_held = report.already_held,
            batches = report.batches,
            "Starting role membership sync"
        );

        let groups: Vec<&[&[&str]]> = batches.chunks(concurrency).collect();
        let group_count = groups.len();
        for (index, group) in groups.into_iter().enumerate() {
            let results = join_all(
                group
                    .iter()
                    .map(|batch| self.grant_batch(space_id, role_id, batch)),
            )
            .await;
            for (ok, failed) in results {
                report.succeeded += ok;
                report.failed += failed;
            }

            if index + 1 < group_count {
                tokio::time::sleep(self.settings.batch_pause()).await;
            }
        }

        let elapsed = started.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64();
        report.throughput = if secs > 0.0 {
            report.succeeded as f64 / secs
        } else {
            report.succeeded as f64
        };

        tracing::info!(
            space = %space_id,
            role = %role_id,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "Role membership sync finished"
        );
        Ok(report)
    }

    /// Grant to every member of a batch; returns (succeeded, failed)
    async fn grant_batch(&self, space_id: &str, role_id: &str, batch: &[&str]) -> (usize, usize) {
        let results = join_all(
            batch
                .iter()
                .map(|member| self.platform.grant_role(space_id, member, role_id)),
        )
        .await;

        let mut ok = 0;
        let mut failed = 0;
        for (member, result) in batch.iter().zip(results) {
            match result {
                Ok(()) => ok += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        space = %space_id,
                        role = %role_id,
                        member = %member,
                        error = %e,
                        "Role grant failed"
                    );
                }
            }
        }
        (ok, failed)
    }
}
