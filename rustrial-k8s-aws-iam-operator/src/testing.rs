//! In-memory stand-ins for AWS IAM and the Kubernetes status subresource.

use std::{collections::HashMap, sync::Mutex};

use crate::{
    arn::Arn,
    error::{Error, ErrorCode, InstanceError},
    instance::AwsInstance,
    provider::{
        ExistingEntity, IamApi, IamError, PolicyDefinition, PolicyTarget, PolicyVersion,
        RoleDefinition,
    },
    status::StatusWriter,
};
use async_trait::async_trait;
use rustrial_k8s_aws_iam_operator_apis::{
    AwsObjectStatus, AwsObjectStatusResource, Effect, PolicyStatement, Role, RoleSpec,
};

const ACCOUNT: &str = "000000000000";

pub(crate) fn role() -> Role {
    let mut role = Role::new(
        "name",
        RoleSpec {
            description: None,
            max_session_duration: None,
            assume_role_policy: vec![PolicyStatement {
                sid: None,
                effect: Effect::Allow,
                principal: None,
                action: vec!["sts:AssumeRole".to_string()],
                resource: vec![],
                condition: None,
            }],
        },
    );
    role.metadata.namespace = Some("ns".to_string());
    role.metadata.generation = Some(1);
    role
}

/// Records every call and answers like a well-behaved IAM account.
#[derive(Default)]
pub(crate) struct FakeIam {
    calls: Mutex<Vec<String>>,
    versions: Mutex<Vec<PolicyVersion>>,
    failures: Mutex<HashMap<&'static str, IamError>>,
    existing: Mutex<HashMap<String, ExistingEntity>>,
}

impl FakeIam {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_versions(&self, versions: Vec<PolicyVersion>) {
        *self.versions.lock().unwrap() = versions;
    }

    /// Register an entity which the Get* lookups find by name.
    pub fn exists(&self, name: &str, arn: &str, path: &str) {
        self.existing.lock().unwrap().insert(
            name.to_string(),
            ExistingEntity {
                arn: arn.to_string(),
                path: path.to_string(),
            },
        );
    }

    fn lookup(&self, name: &str) -> Result<ExistingEntity, IamError> {
        self.existing
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| IamError::NoSuchEntity(format!("{} not found", name)))
    }

    /// Make the next call of `operation` fail with `err`.
    pub fn fail(&self, operation: &'static str, err: IamError) {
        self.failures.lock().unwrap().insert(operation, err);
    }

    fn call(&self, operation: &'static str, args: String) -> Result<(), IamError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, args));
        match self.failures.lock().unwrap().remove(operation) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IamApi for FakeIam {
    async fn create_role(&self, role: &RoleDefinition) -> Result<String, IamError> {
        self.call("CreateRole", role.name.clone())?;
        Ok(format!("arn:aws:iam::{}:role{}{}", ACCOUNT, role.path, role.name))
    }

    async fn update_role(&self, role: &RoleDefinition) -> Result<(), IamError> {
        self.call("UpdateRole", role.name.clone())
    }

    async fn delete_role(&self, name: &str) -> Result<(), IamError> {
        self.call("DeleteRole", name.to_string())
    }

    async fn get_role(&self, name: &str) -> Result<ExistingEntity, IamError> {
        self.call("GetRole", name.to_string())?;
        self.lookup(name)
    }

    async fn create_policy(&self, policy: &PolicyDefinition) -> Result<String, IamError> {
        self.call("CreatePolicy", policy.name.clone())?;
        Ok(format!(
            "arn:aws:iam::{}:policy{}{}",
            ACCOUNT, policy.path, policy.name
        ))
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        _document: &str,
    ) -> Result<(), IamError> {
        self.call("CreatePolicyVersion", policy_arn.to_string())
    }

    async fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>, IamError> {
        self.call("ListPolicyVersions", policy_arn.to_string())?;
        Ok(self.versions.lock().unwrap().clone())
    }

    async fn delete_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<(), IamError> {
        self.call(
            "DeletePolicyVersion",
            format!("{} {}", policy_arn, version_id),
        )?;
        self.versions
            .lock()
            .unwrap()
            .retain(|v| v.version_id != version_id);
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), IamError> {
        self.call("DeletePolicy", policy_arn.to_string())
    }

    async fn get_policy(&self, path: &str, name: &str) -> Result<ExistingEntity, IamError> {
        self.call("GetPolicy", format!("{}{}", path, name))?;
        self.lookup(name)
    }

    async fn create_user(&self, name: &str, path: &str) -> Result<String, IamError> {
        self.call("CreateUser", name.to_string())?;
        Ok(format!("arn:aws:iam::{}:user{}{}", ACCOUNT, path, name))
    }

    async fn update_user(&self, name: &str, _path: &str) -> Result<(), IamError> {
        self.call("UpdateUser", name.to_string())
    }

    async fn delete_user(&self, name: &str) -> Result<(), IamError> {
        self.call("DeleteUser", name.to_string())
    }

    async fn get_user(&self, name: &str) -> Result<ExistingEntity, IamError> {
        self.call("GetUser", name.to_string())?;
        self.lookup(name)
    }

    async fn attach_policy(&self, target: &PolicyTarget, policy_arn: &str) -> Result<(), IamError> {
        self.call("AttachPolicy", format!("{} {}", target, policy_arn))
    }

    async fn detach_policy(&self, target: &PolicyTarget, policy_arn: &str) -> Result<(), IamError> {
        self.call("DetachPolicy", format!("{} {}", target, policy_arn))
    }
}

/// Instance which only records which operations were invoked.
pub(crate) struct FakeInstance {
    arn: Option<Arn>,
    failure: Option<(ErrorCode, String)>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeInstance {
    pub fn with_arn(arn: &str) -> Self {
        Self {
            arn: arn.parse().ok(),
            failure: None,
            calls: Mutex::new(vec![]),
        }
    }

    /// Make every operation fail.
    pub fn fail_with(&mut self, code: ErrorCode, message: &str) {
        self.failure = Some((code, message.to_string()));
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, operation: &'static str) -> Result<(), InstanceError> {
        self.calls.lock().unwrap().push(operation);
        match &self.failure {
            Some((code, message)) => Err(InstanceError::new(*code, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AwsInstance for FakeInstance {
    async fn create(&mut self, _client: &dyn IamApi) -> Result<(), InstanceError> {
        self.call("create")
    }

    async fn update(&mut self, _client: &dyn IamApi) -> Result<(), InstanceError> {
        self.call("update")
    }

    async fn delete(&mut self, _client: &dyn IamApi) -> Result<(), InstanceError> {
        self.call("delete")
    }

    fn arn(&self) -> Option<&Arn> {
        self.arn.as_ref()
    }
}

/// Keeps every persisted status in memory.
#[derive(Default)]
pub(crate) struct MemoryStatusWriter {
    fail: bool,
    written: Mutex<Vec<AwsObjectStatus>>,
}

impl MemoryStatusWriter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn written(&self) -> Vec<AwsObjectStatus> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl<K> StatusWriter<K> for MemoryStatusWriter
where
    K: AwsObjectStatusResource + Send + Sync,
{
    async fn update(&self, obj: &K) -> Result<(), Error> {
        if self.fail {
            return Err(Error::Any("status write failed".to_string()));
        }
        self.written
            .lock()
            .unwrap()
            .push(obj.aws_object_status().cloned().unwrap_or_default());
        Ok(())
    }
}
