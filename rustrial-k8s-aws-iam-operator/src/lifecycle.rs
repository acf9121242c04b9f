//! Create, update and delete dispatch for [`AwsInstance`]s.
//!
//! Each dispatch is a single attempt: run the pre-check, run the operation and
//! describe the outcome as a [`StatusUpdater`]. Retrying is left to the next
//! reconciliation.

use crate::{
    error::{Error, ErrorCode, Result},
    instance::AwsInstance,
    provider::IamApi,
    status::StatusUpdater,
};

/// Pre-check which always passes.
pub fn do_nothing_pre_check() -> anyhow::Result<()> {
    Ok(())
}

fn failed(e: Error) -> (StatusUpdater, Result<()>) {
    (StatusUpdater::error(&e), Err(e))
}

pub async fn create_aws_object<I, F>(
    client: &dyn IamApi,
    instance: &mut I,
    pre_check: F,
) -> (StatusUpdater, Result<()>)
where
    I: AwsInstance + ?Sized,
    F: FnOnce() -> anyhow::Result<()>,
{
    if let Err(e) = pre_check() {
        return failed(Error::PreCheck(e));
    }
    if let Err(e) = instance.create(client).await {
        return failed(e.into());
    }
    (StatusUpdater::Success, Ok(()))
}

pub async fn update_aws_object<I, F>(
    client: &dyn IamApi,
    instance: &mut I,
    pre_check: F,
) -> (StatusUpdater, Result<()>)
where
    I: AwsInstance + ?Sized,
    F: FnOnce() -> anyhow::Result<()>,
{
    if let Err(e) = pre_check() {
        return failed(Error::PreCheck(e));
    }
    if let Err(e) = instance.update(client).await {
        return failed(e.into());
    }
    (StatusUpdater::Success, Ok(()))
}

/// Deleting an entity which does not exist counts as success. As the object
/// itself goes away, there is no status to write on success.
pub async fn delete_aws_object<I, F>(
    client: &dyn IamApi,
    instance: &mut I,
    pre_check: F,
) -> (StatusUpdater, Result<()>)
where
    I: AwsInstance + ?Sized,
    F: FnOnce() -> anyhow::Result<()>,
{
    if let Err(e) = pre_check() {
        return failed(Error::PreCheck(e));
    }
    let result = instance.delete(client).await.map_err(Error::from);
    if let Err(e) = ignore_does_not_exist_error(result) {
        return failed(e);
    }
    (StatusUpdater::NoOp, Ok(()))
}

/// Treat "not yet created" instance errors as success.
pub fn ignore_does_not_exist_error(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Instance(e)) if e.is_of_error_code(ErrorCode::NotYetCreated) => Ok(()),
        other => other,
    }
}
