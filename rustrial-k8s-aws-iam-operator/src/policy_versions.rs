use std::{cmp::Reverse, sync::Arc, time::Duration};

use crate::{
    env_var,
    provider::{IamApi, IamError, PolicyVersion},
};
use kube::{api::ListParams, Api};
use log::{debug, info, warn};
use metrics::gauge;
use rustrial_k8s_aws_iam_operator_apis::{AwsObjectStatusResource, Policy};

/// Number of versions kept when pruning. AWS allows 5 versions per managed policy,
/// so one slot stays free for the next update.
pub const MAX_POLICY_VERSIONS: usize = 4;

/// Versions which exceed the retention limit, oldest first.
///
/// Versions are ranked by creation date (newest first). The default version is
/// always retained, as AWS refuses to delete it. Versions without creation date
/// rank as oldest, and the list order breaks ties.
fn expired_versions(mut versions: Vec<PolicyVersion>, keep: usize) -> Vec<PolicyVersion> {
    if versions.len() <= keep {
        return vec![];
    }
    versions.sort_by_key(|v| (!v.is_default_version, Reverse(v.create_date)));
    let mut expired = versions.split_off(keep);
    expired.reverse();
    expired
}

/// Delete all but the newest [`MAX_POLICY_VERSIONS`] versions of a managed policy.
///
/// Stops at the first failed deletion; whatever has been deleted stays deleted and
/// the next pass takes care of the remainder.
pub async fn clean_up_policy_versions(
    client: &dyn IamApi,
    policy_arn: &str,
) -> Result<(), IamError> {
    let versions = client.list_policy_versions(policy_arn).await?;
    for version in expired_versions(versions, MAX_POLICY_VERSIONS) {
        debug!(
            "Delete version {} of AWS IAM Policy {}",
            version.version_id, policy_arn
        );
        client
            .delete_policy_version(policy_arn, version.version_id.as_str())
            .await?;
    }
    Ok(())
}

/// Periodically prunes the versions of all managed policies owned by `Policy` objects.
pub struct PolicyVersionPruner {
    pub iam: Arc<dyn IamApi>,
    pub policies: Api<Policy>,
}

impl PolicyVersionPruner {
    async fn run(&self) -> anyhow::Result<()> {
        let policies = self.policies.list(&ListParams::default()).await?;
        let mut scanned = 0usize;
        let mut failed = 0usize;
        for policy in policies.items {
            if let Some(arn) = policy.recorded_arn() {
                scanned += 1;
                if let Err(e) = clean_up_policy_versions(self.iam.as_ref(), arn).await {
                    failed += 1;
                    warn!("Pruning versions of AWS IAM Policy {} failed: {}", arn, e);
                }
            }
        }
        info!(
            "PolicyVersion pruning: scanned {} policies, {} failed",
            scanned, failed
        );
        gauge!("awsiamoperator_prune_scanned_policies").set(scanned as f64);
        gauge!("awsiamoperator_prune_failed_policies").set(failed as f64);
        Ok(())
    }

    pub async fn start(self) {
        let ival: u64 = env_var("POLICY_VERSION_PRUNE_INTERVAL_SECONDS")
            .map(|i| i.parse::<u64>().ok())
            .flatten()
            // Prune once per hour by default
            .unwrap_or(60 * 60);
        let mut interval = tokio::time::interval(Duration::from_secs(ival));
        let disabled = env_var("DISABLE_POLICY_VERSION_PRUNING");
        loop {
            interval.tick().await;
            if disabled.is_none() {
                match self.run().await {
                    Ok(_) => (),
                    Err(e) => warn!("PolicyVersion pruning error: {}", e),
                }
            }
        }
    }
}
