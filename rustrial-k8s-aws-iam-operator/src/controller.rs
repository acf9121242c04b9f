use crate::{
    error::Error,
    lifecycle::{create_aws_object, delete_aws_object, do_nothing_pre_check, update_aws_object},
    objects::IamObject,
    provider::IamApi,
    status::{
        err_with_status, KubeStatusWriter, StatusUpdater, StatusWriter, LAST_SYNC_ATTEMPT_FORMAT,
    },
};
use chrono::{DateTime, FixedOffset, Local};
use futures::{Future, StreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::{
    controller::{Action, Controller},
    finalizer::{self, Event},
    watcher::Config,
};
use log::{debug, error, info, warn};
use metrics::{counter, histogram};
use rustrial_k8s_aws_iam_operator_apis::{AwsObjectStatusResource, SyncState, API_GROUP};
use std::{sync::Arc, time::Instant};
use tokio::time::Duration;

const FINALIZER: &'static str = API_GROUP;

/// Periodic resync of objects which reconciled successfully.
const RESYNC_INTERVAL: Duration = Duration::from_secs(900);

/// What an apply pass has to do with the AWS IAM entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    Create,
    Update,
    /// The entity was synced for the current generation recently, e.g. the
    /// event is our own status write.
    Skip { resync_in: Duration },
}

pub(crate) fn next_operation<K>(obj: &K, now: DateTime<FixedOffset>) -> Operation
where
    K: Resource + AwsObjectStatusResource,
{
    let status = match obj.aws_object_status().filter(|s| s.has_arn()) {
        Some(status) => status,
        None => return Operation::Create,
    };
    let in_sync = status.state == Some(SyncState::Ok)
        && status.observed_generation.is_some()
        && status.observed_generation == obj.meta().generation;
    if in_sync {
        let last = DateTime::parse_from_str(&status.last_sync_attempt, LAST_SYNC_ATTEMPT_FORMAT);
        if let Some(age) = last.ok().and_then(|last| (now - last).to_std().ok()) {
            if age < RESYNC_INTERVAL {
                return Operation::Skip {
                    resync_in: RESYNC_INTERVAL - age,
                };
            }
        }
    }
    Operation::Update
}

/// Run `operation` and record its outcome in the status of `obj`.
pub(crate) async fn sync_object<K, W>(
    iam: &dyn IamApi,
    obj: &mut K,
    operation: Operation,
    instance: Result<K::Instance, Error>,
    writer: &W,
) -> Result<Action, Error>
where
    K: IamObject,
    W: StatusWriter<K> + ?Sized,
{
    let mut instance = match instance {
        Ok(instance) => instance,
        Err(e) => return Err(err_with_status(obj, e, writer).await),
    };
    let desired = instance.clone();
    let (updater, result) = match operation {
        Operation::Create => {
            create_aws_object(iam, &mut instance, || obj.pre_check(&desired)).await
        }
        Operation::Update => {
            update_aws_object(iam, &mut instance, || obj.pre_check(&desired)).await
        }
        Operation::Skip { resync_in } => return Ok(Action::requeue(resync_in)),
    };
    if updater == StatusUpdater::Success {
        let generation = obj.meta().generation;
        obj.aws_object_status_mut().observed_generation = generation;
    }
    updater.apply(&instance, obj, writer).await;
    result?;
    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Delete the AWS IAM entity of `obj`, which is about to go away.
pub(crate) async fn remove_object<K, W>(
    iam: &dyn IamApi,
    obj: &mut K,
    instance: Result<K::Instance, Error>,
    writer: &W,
) -> Result<Action, Error>
where
    K: IamObject,
    W: StatusWriter<K> + ?Sized,
{
    let mut instance = match instance {
        Ok(instance) => instance,
        Err(e) => return Err(err_with_status(obj, e, writer).await),
    };
    let (updater, result) = delete_aws_object(iam, &mut instance, do_nothing_pre_check).await;
    updater.apply(&instance, obj, writer).await;
    result?;
    Ok(Action::await_change())
}

/// Controller which keeps one AWS IAM entity per object of kind `K` in sync.
pub(crate) struct AwsObjectController<K: IamObject> {
    pub client: Client,
    /// Objects to watch, either in one or in all namespaces.
    pub objects: Api<K>,
    pub iam: Arc<dyn IamApi>,
}

impl<K: IamObject> AwsObjectController<K> {
    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn status_writer(&self, namespace: &str) -> KubeStatusWriter<K> {
        KubeStatusWriter::new(Api::<K>::namespaced(self.client.clone(), namespace))
    }

    async fn apply(&self, obj: Arc<K>, namespace: &str) -> Result<Action, Error> {
        let operation = next_operation(obj.as_ref(), Local::now().fixed_offset());
        if let Operation::Skip { resync_in } = operation {
            debug!(
                "{} {}/{} is in sync, next resync in {}s",
                Self::kind(),
                namespace,
                obj.name_any(),
                resync_in.as_secs()
            );
            return Ok(Action::requeue(resync_in));
        }
        let writer = self.status_writer(namespace);
        let mut obj = obj.as_ref().clone();
        let instance = obj.instance(&self.client).await;
        sync_object(self.iam.as_ref(), &mut obj, operation, instance, &writer).await
    }

    async fn cleanup(&self, obj: Arc<K>, namespace: &str) -> Result<Action, Error> {
        let writer = self.status_writer(namespace);
        let mut obj = obj.as_ref().clone();
        let instance = obj.instance(&self.client).await;
        remove_object(self.iam.as_ref(), &mut obj, instance, &writer).await
    }

    /// Controller triggers this whenever one of our objects changed
    async fn reconcile(obj: Arc<K>, ctx: Arc<Self>) -> Result<Action, finalizer::Error<Error>> {
        let kind = Self::kind();
        let log_prefix = format!(
            "reconciliation of {} {}/{}",
            kind,
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        );
        if let Some(ns) = obj.namespace() {
            let api = Api::<K>::namespaced(ctx.client.clone(), ns.as_str());
            let start = Instant::now();
            let result = finalizer::finalizer(&api, FINALIZER, obj, |e| {
                Self::reconcile_with_finalizer(e, ctx, ns.clone())
            })
            .await;
            let duration = Instant::now() - start;
            histogram!("reconcile_aws_iam_object_duration_ns", "kind" => kind)
                .record(duration.as_nanos() as f64);
            match &result {
                Ok(_) => info!("{} succeeded", log_prefix),
                Err(e) => error!("{} failed: {}", log_prefix, e),
            }
            result
        } else {
            let msg = format!("{} failed: object has no namespace", log_prefix);
            Err(finalizer::Error::ApplyFailed(Error::Any(msg)))
        }
    }

    async fn reconcile_with_finalizer(
        event: Event<K>,
        ctx: Arc<Self>,
        namespace: String,
    ) -> Result<Action, Error> {
        match event {
            Event::Apply(obj) => ctx.apply(obj, namespace.as_str()).await,
            Event::Cleanup(obj) => ctx.cleanup(obj, namespace.as_str()).await,
        }
    }

    /// The controller triggers this on reconcile errors
    fn error_policy(_obj: Arc<K>, _error: &finalizer::Error<Error>, _ctx: Arc<Self>) -> Action {
        Action::requeue(Duration::from_secs(10))
    }

    pub fn start(self) -> impl Future<Output = ()> {
        let kind = Self::kind();
        info!("Starting {} controller", kind);
        Controller::new(self.objects.clone(), Config::default())
            .run(Self::reconcile, Self::error_policy, Arc::new(self))
            .for_each(move |res| {
                let kind = kind.clone();
                async move {
                    match res {
                        Ok(o) => {
                            counter!("reconcile_aws_iam_object_success", "kind" => kind)
                                .increment(1);
                            info!("reconciled {:?}", o)
                        }
                        Err(e) => {
                            counter!("reconcile_aws_iam_object_failure", "kind" => kind)
                                .increment(1);
                            warn!("reconcile failed: {}", e)
                        }
                    }
                }
            })
    }
}
