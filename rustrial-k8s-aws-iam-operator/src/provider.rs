use async_trait::async_trait;
use aws_config::{timeout::TimeoutConfig, BehaviorVersion};
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::types::PolicyScopeType;
use aws_types::{region::Region, SdkConfig};
use std::{sync::Arc, time::Duration};

/// IAM is a global service, any commercial region will do.
pub const DEFAULT_REGION: &'static str = "us-east-1";

/// Failure reported by AWS IAM, classified by its error code.
#[derive(thiserror::Error, Debug)]
pub enum IamError {
    #[error("{0}")]
    NoSuchEntity(String),
    #[error("{0}")]
    EntityAlreadyExists(String),
    #[error("{0}")]
    DeleteConflict(String),
    #[error("{0}")]
    LimitExceeded(String),
    #[error("{0}")]
    Other(String),
}

impl IamError {
    fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let code = err
            .as_service_error()
            .and_then(|e| e.code())
            .map(|c| c.to_string());
        let message = format!("iam:{} failed: {}", operation, DisplayErrorContext(&err));
        match code.as_deref() {
            Some("NoSuchEntity") => IamError::NoSuchEntity(message),
            Some("EntityAlreadyExists") => IamError::EntityAlreadyExists(message),
            Some("DeleteConflict") => IamError::DeleteConflict(message),
            Some("LimitExceeded") => IamError::LimitExceeded(message),
            _ => IamError::Other(message),
        }
    }
}

/// Desired state of an AWS IAM Role.
#[derive(Clone, Debug, PartialEq)]
pub struct RoleDefinition {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub assume_role_policy_document: String,
    pub max_session_duration: Option<i32>,
}

/// Desired state of an AWS IAM customer managed Policy.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyDefinition {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub document: String,
}

/// Identity a managed policy is attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyTarget {
    Role(String),
    User(String),
}

impl std::fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyTarget::Role(name) => write!(f, "role {}", name),
            PolicyTarget::User(name) => write!(f, "user {}", name),
        }
    }
}

/// An entity which already exists in AWS IAM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistingEntity {
    pub arn: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyVersion {
    pub version_id: String,
    pub is_default_version: bool,
    /// Creation time in seconds since the epoch.
    pub create_date: Option<i64>,
}

/// The subset of the AWS IAM API used by the operator.
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Returns the ARN of the new role.
    async fn create_role(&self, role: &RoleDefinition) -> Result<String, IamError>;

    /// Updates trust policy, description and maximum session duration.
    async fn update_role(&self, role: &RoleDefinition) -> Result<(), IamError>;

    async fn delete_role(&self, name: &str) -> Result<(), IamError>;

    async fn get_role(&self, name: &str) -> Result<ExistingEntity, IamError>;

    /// Returns the ARN of the new policy.
    async fn create_policy(&self, policy: &PolicyDefinition) -> Result<String, IamError>;

    /// Creates a new version and makes it the default one.
    async fn create_policy_version(&self, policy_arn: &str, document: &str)
        -> Result<(), IamError>;

    async fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>, IamError>;

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str)
        -> Result<(), IamError>;

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), IamError>;

    /// Looks up a customer managed policy by path and name, as its ARN depends
    /// on the account.
    async fn get_policy(&self, path: &str, name: &str) -> Result<ExistingEntity, IamError>;

    /// Returns the ARN of the new user.
    async fn create_user(&self, name: &str, path: &str) -> Result<String, IamError>;

    async fn update_user(&self, name: &str, path: &str) -> Result<(), IamError>;

    async fn delete_user(&self, name: &str) -> Result<(), IamError>;

    async fn get_user(&self, name: &str) -> Result<ExistingEntity, IamError>;

    async fn attach_policy(&self, target: &PolicyTarget, policy_arn: &str) -> Result<(), IamError>;

    async fn detach_policy(&self, target: &PolicyTarget, policy_arn: &str) -> Result<(), IamError>;
}

#[async_trait]
impl IamApi for aws_sdk_iam::Client {
    async fn create_role(&self, role: &RoleDefinition) -> Result<String, IamError> {
        let response = self
            .create_role()
            .role_name(&role.name)
            .path(&role.path)
            .set_description(role.description.clone())
            .assume_role_policy_document(&role.assume_role_policy_document)
            .set_max_session_duration(role.max_session_duration)
            .send()
            .await
            .map_err(|e| IamError::classify("CreateRole", e))?;
        response
            .role()
            .map(|r| r.arn().to_string())
            .ok_or_else(|| IamError::Other(format!("CreateRole returned no role for {}", role.name)))
    }

    async fn update_role(&self, role: &RoleDefinition) -> Result<(), IamError> {
        self.update_assume_role_policy()
            .role_name(&role.name)
            .policy_document(&role.assume_role_policy_document)
            .send()
            .await
            .map_err(|e| IamError::classify("UpdateAssumeRolePolicy", e))?;
        self.update_role()
            .role_name(&role.name)
            .set_description(role.description.clone())
            .set_max_session_duration(role.max_session_duration)
            .send()
            .await
            .map_err(|e| IamError::classify("UpdateRole", e))?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<(), IamError> {
        self.delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| IamError::classify("DeleteRole", e))?;
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<ExistingEntity, IamError> {
        let response = self
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| IamError::classify("GetRole", e))?;
        response
            .role()
            .map(|r| ExistingEntity {
                arn: r.arn().to_string(),
                path: r.path().to_string(),
            })
            .ok_or_else(|| IamError::NoSuchEntity(format!("Role {} not found", name)))
    }

    async fn create_policy(&self, policy: &PolicyDefinition) -> Result<String, IamError> {
        let response = self
            .create_policy()
            .policy_name(&policy.name)
            .path(&policy.path)
            .set_description(policy.description.clone())
            .policy_document(&policy.document)
            .send()
            .await
            .map_err(|e| IamError::classify("CreatePolicy", e))?;
        response
            .policy()
            .and_then(|p| p.arn())
            .map(|arn| arn.to_string())
            .ok_or_else(|| {
                IamError::Other(format!("CreatePolicy returned no ARN for {}", policy.name))
            })
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
    ) -> Result<(), IamError> {
        self.create_policy_version()
            .policy_arn(policy_arn)
            .policy_document(document)
            .set_as_default(true)
            .send()
            .await
            .map_err(|e| IamError::classify("CreatePolicyVersion", e))?;
        Ok(())
    }

    async fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>, IamError> {
        let mut versions = vec![];
        let mut marker = None;
        loop {
            let response = self
                .list_policy_versions()
                .policy_arn(policy_arn)
                .set_marker(marker)
                .send()
                .await
                .map_err(|e| IamError::classify("ListPolicyVersions", e))?;
            for v in response.versions() {
                if let Some(version_id) = v.version_id() {
                    versions.push(PolicyVersion {
                        version_id: version_id.to_string(),
                        is_default_version: v.is_default_version(),
                        create_date: v.create_date().map(|d| d.secs()),
                    });
                }
            }
            marker = response.marker().map(|m| m.to_string());
            if !response.is_truncated() || marker.is_none() {
                break;
            }
        }
        Ok(versions)
    }

    async fn delete_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<(), IamError> {
        self.delete_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| IamError::classify("DeletePolicyVersion", e))?;
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), IamError> {
        self.delete_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| IamError::classify("DeletePolicy", e))?;
        Ok(())
    }

    async fn get_policy(&self, path: &str, name: &str) -> Result<ExistingEntity, IamError> {
        let mut marker = None;
        loop {
            let response = self
                .list_policies()
                .scope(PolicyScopeType::Local)
                .path_prefix(path)
                .set_marker(marker)
                .send()
                .await
                .map_err(|e| IamError::classify("ListPolicies", e))?;
            let found = response
                .policies()
                .iter()
                .find(|p| p.policy_name() == Some(name) && p.path() == Some(path));
            if let Some(policy) = found {
                return Ok(ExistingEntity {
                    arn: policy.arn().unwrap_or_default().to_string(),
                    path: path.to_string(),
                });
            }
            marker = response.marker().map(|m| m.to_string());
            if !response.is_truncated() || marker.is_none() {
                break;
            }
        }
        Err(IamError::NoSuchEntity(format!(
            "Policy {}{} not found",
            path, name
        )))
    }

    async fn create_user(&self, name: &str, path: &str) -> Result<String, IamError> {
        let response = self
            .create_user()
            .user_name(name)
            .path(path)
            .send()
            .await
            .map_err(|e| IamError::classify("CreateUser", e))?;
        response
            .user()
            .map(|u| u.arn().to_string())
            .ok_or_else(|| IamError::Other(format!("CreateUser returned no user for {}", name)))
    }

    async fn update_user(&self, name: &str, path: &str) -> Result<(), IamError> {
        self.update_user()
            .user_name(name)
            .new_path(path)
            .send()
            .await
            .map_err(|e| IamError::classify("UpdateUser", e))?;
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<(), IamError> {
        self.delete_user()
            .user_name(name)
            .send()
            .await
            .map_err(|e| IamError::classify("DeleteUser", e))?;
        Ok(())
    }

    async fn get_user(&self, name: &str) -> Result<ExistingEntity, IamError> {
        let response = self
            .get_user()
            .user_name(name)
            .send()
            .await
            .map_err(|e| IamError::classify("GetUser", e))?;
        response
            .user()
            .map(|u| ExistingEntity {
                arn: u.arn().to_string(),
                path: u.path().to_string(),
            })
            .ok_or_else(|| IamError::NoSuchEntity(format!("User {} not found", name)))
    }

    async fn attach_policy(&self, target: &PolicyTarget, policy_arn: &str) -> Result<(), IamError> {
        match target {
            PolicyTarget::Role(name) => {
                self.attach_role_policy()
                    .role_name(name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|e| IamError::classify("AttachRolePolicy", e))?;
            }
            PolicyTarget::User(name) => {
                self.attach_user_policy()
                    .user_name(name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|e| IamError::classify("AttachUserPolicy", e))?;
            }
        }
        Ok(())
    }

    async fn detach_policy(&self, target: &PolicyTarget, policy_arn: &str) -> Result<(), IamError> {
        match target {
            PolicyTarget::Role(name) => {
                self.detach_role_policy()
                    .role_name(name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|e| IamError::classify("DetachRolePolicy", e))?;
            }
            PolicyTarget::User(name) => {
                self.detach_user_policy()
                    .user_name(name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|e| IamError::classify("DetachUserPolicy", e))?;
            }
        }
        Ok(())
    }
}

/// Load the shared AWS configuration for `region`.
///
/// Every AWS call is bounded by `operation_timeout`, so a hanging request can not
/// block a reconciliation forever.
pub async fn sdk_config(region: &str, operation_timeout: Duration) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(operation_timeout)
                .build(),
        )
        .load()
        .await
}

/// IAM client sharing credentials, region and timeouts of `config`.
pub fn iam_service(config: &SdkConfig) -> Arc<dyn IamApi> {
    Arc::new(aws_sdk_iam::Client::new(config))
}
