use crate::{
    arn::Arn,
    error::{ErrorCode, InstanceError},
    policy_versions::clean_up_policy_versions,
    provider::{ExistingEntity, IamApi, IamError, PolicyDefinition, PolicyTarget, RoleDefinition},
};
use async_trait::async_trait;
use log::{debug, info};

/// One remote AWS IAM entity.
#[async_trait]
pub trait AwsInstance: Send + Sync {
    async fn create(&mut self, client: &dyn IamApi) -> Result<(), InstanceError>;

    async fn update(&mut self, client: &dyn IamApi) -> Result<(), InstanceError>;

    async fn delete(&mut self, client: &dyn IamApi) -> Result<(), InstanceError>;

    /// Identifier of the entity, available once it exists.
    fn arn(&self) -> Option<&Arn>;
}

fn parse_arn(arn: String) -> Result<Arn, InstanceError> {
    arn.parse()
        .map_err(|e| InstanceError::new(ErrorCode::Provider, e))
}

/// ARN of an entity which exists already, as long as it lives under the path
/// owned by the object. Anything else stays an `AlreadyExists` conflict.
fn adopt(existing: ExistingEntity, path: &str, conflict: String) -> Result<String, InstanceError> {
    if existing.path == path {
        info!("Adopting existing AWS IAM entity {}", existing.arn);
        Ok(existing.arn)
    } else {
        Err(InstanceError::new(
            ErrorCode::AlreadyExists,
            format!("{} (found under path {})", conflict, existing.path),
        ))
    }
}

fn require_arn<'a>(arn: &'a Option<Arn>, what: &str) -> Result<&'a Arn, InstanceError> {
    arn.as_ref()
        .ok_or_else(|| InstanceError::not_yet_created(format!("{} has not been created yet", what)))
}

#[derive(Clone)]
pub struct RoleInstance {
    pub definition: RoleDefinition,
    pub arn: Option<Arn>,
}

#[async_trait]
impl AwsInstance for RoleInstance {
    async fn create(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let definition = &self.definition;
        let arn = match client.create_role(definition).await {
            Ok(arn) => arn,
            Err(IamError::EntityAlreadyExists(conflict)) => adopt(
                client.get_role(definition.name.as_str()).await?,
                definition.path.as_str(),
                conflict,
            )?,
            Err(e) => return Err(e.into()),
        };
        info!("Created AWS IAM Role {}", arn);
        self.arn = Some(parse_arn(arn)?);
        Ok(())
    }

    async fn update(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let arn = require_arn(&self.arn, "AWS IAM Role")?;
        debug!("Update AWS IAM Role {}", arn);
        client.update_role(&self.definition).await?;
        Ok(())
    }

    async fn delete(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let arn = require_arn(&self.arn, "AWS IAM Role")?;
        info!("Delete AWS IAM Role {}", arn);
        client.delete_role(arn.resource_name()).await?;
        Ok(())
    }

    fn arn(&self) -> Option<&Arn> {
        self.arn.as_ref()
    }
}

#[derive(Clone)]
pub struct PolicyInstance {
    pub definition: PolicyDefinition,
    pub arn: Option<Arn>,
}

#[async_trait]
impl AwsInstance for PolicyInstance {
    async fn create(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let definition = &self.definition;
        let arn = match client.create_policy(definition).await {
            Ok(arn) => arn,
            Err(IamError::EntityAlreadyExists(conflict)) => adopt(
                client
                    .get_policy(definition.path.as_str(), definition.name.as_str())
                    .await?,
                definition.path.as_str(),
                conflict,
            )?,
            Err(e) => return Err(e.into()),
        };
        info!("Created AWS IAM Policy {}", arn);
        self.arn = Some(parse_arn(arn)?);
        Ok(())
    }

    async fn update(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let arn = require_arn(&self.arn, "AWS IAM Policy")?.to_string();
        // Make room for the new version, AWS keeps at most 5 versions per policy.
        clean_up_policy_versions(client, arn.as_str()).await?;
        client
            .create_policy_version(arn.as_str(), self.definition.document.as_str())
            .await?;
        Ok(())
    }

    async fn delete(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let arn = require_arn(&self.arn, "AWS IAM Policy")?.to_string();
        info!("Delete AWS IAM Policy {}", arn);
        // A policy can only be deleted once all its non-default versions are gone.
        for version in client.list_policy_versions(arn.as_str()).await? {
            if !version.is_default_version {
                client
                    .delete_policy_version(arn.as_str(), version.version_id.as_str())
                    .await?;
            }
        }
        client.delete_policy(arn.as_str()).await?;
        Ok(())
    }

    fn arn(&self) -> Option<&Arn> {
        self.arn.as_ref()
    }
}

#[derive(Clone)]
pub struct UserInstance {
    pub name: String,
    pub path: String,
    pub arn: Option<Arn>,
}

#[async_trait]
impl AwsInstance for UserInstance {
    async fn create(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let arn = match client
            .create_user(self.name.as_str(), self.path.as_str())
            .await
        {
            Ok(arn) => arn,
            Err(IamError::EntityAlreadyExists(conflict)) => adopt(
                client.get_user(self.name.as_str()).await?,
                self.path.as_str(),
                conflict,
            )?,
            Err(e) => return Err(e.into()),
        };
        info!("Created AWS IAM User {}", arn);
        self.arn = Some(parse_arn(arn)?);
        Ok(())
    }

    async fn update(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        require_arn(&self.arn, "AWS IAM User")?;
        client
            .update_user(self.name.as_str(), self.path.as_str())
            .await?;
        Ok(())
    }

    async fn delete(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let arn = require_arn(&self.arn, "AWS IAM User")?;
        info!("Delete AWS IAM User {}", arn);
        client.delete_user(arn.resource_name()).await?;
        Ok(())
    }

    fn arn(&self) -> Option<&Arn> {
        self.arn.as_ref()
    }
}

/// Attachment of a managed policy to a role or user. Its ARN is the one of the policy.
#[derive(Clone)]
pub struct PolicyAttachmentInstance {
    pub policy_arn: Option<Arn>,
    pub target: Option<PolicyTarget>,
}

impl PolicyAttachmentInstance {
    fn resolved(&self) -> Result<(&Arn, &PolicyTarget), InstanceError> {
        match (&self.policy_arn, &self.target) {
            (Some(arn), Some(target)) => Ok((arn, target)),
            _ => Err(InstanceError::not_yet_created(
                "policy attachment references have not been resolved",
            )),
        }
    }
}

#[async_trait]
impl AwsInstance for PolicyAttachmentInstance {
    async fn create(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let (arn, target) = self.resolved()?;
        info!("Attach AWS IAM Policy {} to {}", arn, target);
        client.attach_policy(target, arn.to_string().as_str()).await?;
        Ok(())
    }

    async fn update(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        // Attaching is idempotent.
        self.create(client).await
    }

    async fn delete(&mut self, client: &dyn IamApi) -> Result<(), InstanceError> {
        let (arn, target) = self.resolved()?;
        info!("Detach AWS IAM Policy {} from {}", arn, target);
        client.detach_policy(target, arn.to_string().as_str()).await?;
        Ok(())
    }

    fn arn(&self) -> Option<&Arn> {
        self.policy_arn.as_ref()
    }
}
