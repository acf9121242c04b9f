use std::fmt::Debug;

use crate::{error::Error, instance::AwsInstance};
use async_trait::async_trait;
use chrono::Local;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use log::error;
use rustrial_k8s_aws_iam_operator_apis::{AwsObjectStatusResource, SyncState, API_GROUP};
use serde::{de::DeserializeOwned, Serialize};

pub const SUCCESS_MESSAGE: &'static str = "Succesfully reconciled";

/// Format of `lastSyncAttempt`, e.g. `19 Oct 26 14:03:07 +0200`.
pub const LAST_SYNC_ATTEMPT_FORMAT: &'static str = "%d %b %y %H:%M:%S %z";

fn now() -> String {
    Local::now().format(LAST_SYNC_ATTEMPT_FORMAT).to_string()
}

/// Persists the status of a resource.
#[async_trait]
pub trait StatusWriter<K: Send + Sync>: Send + Sync {
    async fn update(&self, obj: &K) -> Result<(), Error>;
}

/// Writes the status subresource through the Kubernetes API.
pub struct KubeStatusWriter<K> {
    api: Api<K>,
}

impl<K> KubeStatusWriter<K> {
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<K> StatusWriter<K> for KubeStatusWriter<K>
where
    K: Resource<Scope = NamespaceResourceScope>
        + AwsObjectStatusResource
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync,
    K::DynamicType: Default,
{
    async fn update(&self, obj: &K) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": obj.aws_object_status() });
        self.api
            .patch_status(
                obj.name_any().as_str(),
                &PatchParams {
                    field_manager: Some(API_GROUP.to_string()),
                    dry_run: false,
                    force: false,
                    field_validation: None,
                },
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Status transition to apply once an operation on an [`AwsInstance`] completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusUpdater {
    Success,
    Error { reason: String },
    /// Leaves the status untouched and persists nothing.
    NoOp,
}

impl StatusUpdater {
    pub fn error<S: ToString>(reason: S) -> Self {
        StatusUpdater::Error {
            reason: reason.to_string(),
        }
    }

    /// Mutate the status of `obj` and persist it with `writer`.
    ///
    /// Persistence failures are only logged, the next reconciliation writes the
    /// status again.
    pub async fn apply<I, K, W>(self, instance: &I, obj: &mut K, writer: &W)
    where
        I: AwsInstance + ?Sized,
        K: AwsObjectStatusResource + Send + Sync,
        W: StatusWriter<K> + ?Sized,
    {
        let (arn, message, state) = match self {
            StatusUpdater::Success => (
                instance.arn().map(|arn| arn.to_string()),
                SUCCESS_MESSAGE.to_string(),
                SyncState::Ok,
            ),
            StatusUpdater::Error { reason } => (None, reason, SyncState::Error),
            StatusUpdater::NoOp => return,
        };
        {
            let status = obj.aws_object_status_mut();
            if let Some(arn) = arn {
                status.arn = arn;
            }
            status.message = message;
            status.state = Some(state);
            status.last_sync_attempt = now();
        }
        if let Err(e) = writer.update(obj).await {
            error!("unable to write status to resource: {}", e);
        }
    }
}

/// Record `err` in the status of `obj`.
///
/// Returns the persistence error if the status can not be written, `err` otherwise.
pub async fn err_with_status<K, W>(obj: &mut K, err: Error, writer: &W) -> Error
where
    K: AwsObjectStatusResource + Send + Sync,
    W: StatusWriter<K> + ?Sized,
{
    {
        let status = obj.aws_object_status_mut();
        status.message = err.to_string();
        status.state = Some(SyncState::Error);
    }
    match writer.update(obj).await {
        Err(e) => e,
        Ok(_) => err,
    }
}
