//! Mapping of the custom resources onto [`AwsInstance`]s.

use std::fmt::Debug;

use crate::{
    arn::Arn,
    error::Error,
    iam_policy::{PolicyDocument, MAX_MANAGED_POLICY_SIZE},
    instance::{AwsInstance, PolicyAttachmentInstance, PolicyInstance, RoleInstance, UserInstance},
    provider::{PolicyDefinition, PolicyTarget, RoleDefinition},
};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use lazy_static::lazy_static;
use regex::Regex;
use rustrial_k8s_aws_iam_operator_apis::{
    AttachmentTargetKind, AwsObjectStatusResource, Policy, PolicyAttachment, Role, User,
};
use serde::{de::DeserializeOwned, Serialize};

const MAX_ROLE_NAME_LENGTH: usize = 64;
const MAX_USER_NAME_LENGTH: usize = 64;
const MAX_POLICY_NAME_LENGTH: usize = 128;
const MIN_SESSION_DURATION: i32 = 3600;
const MAX_SESSION_DURATION: i32 = 43200;

lazy_static! {
    static ref IAM_NAME: Regex = Regex::new(r"^[\w+=,.@-]+$").unwrap();
}

/// A custom resource backed by one AWS IAM entity.
#[async_trait]
pub trait IamObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + AwsObjectStatusResource
    + Clone
    + DeserializeOwned
    + Serialize
    + Debug
    + Send
    + Sync
    + 'static
{
    type Instance: AwsInstance + Clone + 'static;

    /// Build the instance from the desired state and the recorded status.
    async fn instance(&self, client: &Client) -> Result<Self::Instance, Error>;

    /// Validate the desired state before AWS IAM is touched.
    fn pre_check(&self, instance: &Self::Instance) -> anyhow::Result<()>;
}

/// Name of the AWS IAM entity, unique per account as namespaces are.
pub(crate) fn entity_name<K: ResourceExt>(obj: &K) -> String {
    format!("{}-{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

pub(crate) fn entity_path<K: ResourceExt>(obj: &K) -> String {
    format!("/{}/", obj.namespace().unwrap_or_default())
}

fn parse_arn(arn: &str) -> Result<Arn, Error> {
    arn.parse().map_err(|e| Error::Any(format!("{}", e)))
}

fn recorded_arn<K: AwsObjectStatusResource>(obj: &K) -> Result<Option<Arn>, Error> {
    obj.recorded_arn().map(parse_arn).transpose()
}

fn check_name(kind: &str, name: &str, max_length: usize) -> anyhow::Result<()> {
    if name.len() > max_length {
        return Err(anyhow::format_err!(
            "{} name {} is longer than {} characters",
            kind,
            name,
            max_length
        ));
    }
    if !IAM_NAME.is_match(name) {
        return Err(anyhow::format_err!(
            "{} name {} contains characters other than alphanumerics and +=,.@_-",
            kind,
            name
        ));
    }
    Ok(())
}

pub(crate) fn role_instance(role: &Role) -> Result<RoleInstance, Error> {
    let document = PolicyDocument::new(&role.spec.assume_role_policy).render()?;
    Ok(RoleInstance {
        definition: RoleDefinition {
            name: entity_name(role),
            path: entity_path(role),
            description: role.spec.description.clone(),
            assume_role_policy_document: document,
            max_session_duration: role.spec.max_session_duration,
        },
        arn: recorded_arn(role)?,
    })
}

#[async_trait]
impl IamObject for Role {
    type Instance = RoleInstance;

    async fn instance(&self, _client: &Client) -> Result<Self::Instance, Error> {
        role_instance(self)
    }

    fn pre_check(&self, instance: &Self::Instance) -> anyhow::Result<()> {
        check_name("Role", &instance.definition.name, MAX_ROLE_NAME_LENGTH)?;
        if self.spec.assume_role_policy.is_empty() {
            return Err(anyhow::format_err!(
                "Role needs at least one assumeRolePolicy statement"
            ));
        }
        if let Some(duration) = self.spec.max_session_duration {
            if !(MIN_SESSION_DURATION..=MAX_SESSION_DURATION).contains(&duration) {
                return Err(anyhow::format_err!(
                    "maxSessionDuration {} is not within {} and {} seconds",
                    duration,
                    MIN_SESSION_DURATION,
                    MAX_SESSION_DURATION
                ));
            }
        }
        Ok(())
    }
}

fn policy_instance(policy: &Policy) -> Result<PolicyInstance, Error> {
    let document = PolicyDocument::new(&policy.spec.statement).render()?;
    Ok(PolicyInstance {
        definition: PolicyDefinition {
            name: entity_name(policy),
            path: entity_path(policy),
            description: policy.spec.description.clone(),
            document,
        },
        arn: recorded_arn(policy)?,
    })
}

#[async_trait]
impl IamObject for Policy {
    type Instance = PolicyInstance;

    async fn instance(&self, _client: &Client) -> Result<Self::Instance, Error> {
        policy_instance(self)
    }

    fn pre_check(&self, instance: &Self::Instance) -> anyhow::Result<()> {
        check_name("Policy", &instance.definition.name, MAX_POLICY_NAME_LENGTH)?;
        if self.spec.statement.is_empty() {
            return Err(anyhow::format_err!("Policy needs at least one statement"));
        }
        let size = instance.definition.document.len();
        if size > MAX_MANAGED_POLICY_SIZE {
            return Err(anyhow::format_err!(
                "Policy document has {} characters, AWS allows at most {}",
                size,
                MAX_MANAGED_POLICY_SIZE
            ));
        }
        Ok(())
    }
}

fn user_instance(user: &User) -> Result<UserInstance, Error> {
    Ok(UserInstance {
        name: entity_name(user),
        path: entity_path(user),
        arn: recorded_arn(user)?,
    })
}

#[async_trait]
impl IamObject for User {
    type Instance = UserInstance;

    async fn instance(&self, _client: &Client) -> Result<Self::Instance, Error> {
        user_instance(self)
    }

    fn pre_check(&self, instance: &Self::Instance) -> anyhow::Result<()> {
        check_name("User", &instance.name, MAX_USER_NAME_LENGTH)
    }
}

/// Build the attachment from the ARNs recorded by the referenced objects.
fn attachment_instance(
    policy_arn: Option<&str>,
    kind: AttachmentTargetKind,
    target_arn: Option<&str>,
) -> Result<PolicyAttachmentInstance, Error> {
    let policy_arn = policy_arn.map(parse_arn).transpose()?;
    let target = target_arn
        .map(parse_arn)
        .transpose()?
        .map(|arn| match kind {
            AttachmentTargetKind::Role => PolicyTarget::Role(arn.resource_name().to_string()),
            AttachmentTargetKind::User => PolicyTarget::User(arn.resource_name().to_string()),
        });
    Ok(PolicyAttachmentInstance { policy_arn, target })
}

async fn lookup_arn<K: IamObject>(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<String>, Error> {
    let api = Api::<K>::namespaced(client.clone(), namespace);
    Ok(api
        .get_opt(name)
        .await?
        .and_then(|obj| obj.recorded_arn().map(|arn| arn.to_string())))
}

#[async_trait]
impl IamObject for PolicyAttachment {
    type Instance = PolicyAttachmentInstance;

    async fn instance(&self, client: &Client) -> Result<Self::Instance, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let policy = &self.spec.policy;
        let policy_arn = lookup_arn::<Policy>(
            client,
            policy.namespace.as_deref().unwrap_or(&namespace),
            &policy.name,
        )
        .await?;
        let target = &self.spec.target;
        let target_namespace = target.namespace.as_deref().unwrap_or(&namespace);
        let target_arn = match target.kind {
            AttachmentTargetKind::Role => {
                lookup_arn::<Role>(client, target_namespace, &target.name).await?
            }
            AttachmentTargetKind::User => {
                lookup_arn::<User>(client, target_namespace, &target.name).await?
            }
        };
        attachment_instance(policy_arn.as_deref(), target.kind, target_arn.as_deref())
    }

    fn pre_check(&self, instance: &Self::Instance) -> anyhow::Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        if instance.policy_arn.is_none() {
            let policy = &self.spec.policy;
            return Err(anyhow::format_err!(
                "Policy {}/{} does not exist or has not been reconciled yet",
                policy.namespace.as_deref().unwrap_or(&namespace),
                policy.name
            ));
        }
        if instance.target.is_none() {
            let target = &self.spec.target;
            return Err(anyhow::format_err!(
                "{:?} {}/{} does not exist or has not been reconciled yet",
                target.kind,
                target.namespace.as_deref().unwrap_or(&namespace),
                target.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustrial_k8s_aws_iam_operator_apis::{
        AttachmentTarget, Effect, PolicyAttachmentSpec, PolicySpec, PolicyStatement,
        ResourceReference, RoleSpec, UserSpec,
    };

    fn statement(action: &str) -> PolicyStatement {
        PolicyStatement {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            action: vec![action.to_string()],
            resource: vec!["*".to_string()],
            condition: None,
        }
    }

    fn role(name: &str) -> Role {
        let mut role = Role::new(
            name,
            RoleSpec {
                description: Some("test".to_string()),
                max_session_duration: None,
                assume_role_policy: vec![statement("sts:AssumeRole")],
            },
        );
        role.metadata.namespace = Some("ns".to_string());
        role
    }

    fn policy(statements: Vec<PolicyStatement>) -> Policy {
        let mut policy = Policy::new(
            "name",
            PolicySpec {
                description: None,
                statement: statements,
            },
        );
        policy.metadata.namespace = Some("ns".to_string());
        policy
    }

    fn attachment() -> PolicyAttachment {
        let mut attachment = PolicyAttachment::new(
            "attachment",
            PolicyAttachmentSpec {
                policy: ResourceReference {
                    name: "policy".to_string(),
                    namespace: None,
                },
                target: AttachmentTarget {
                    kind: AttachmentTargetKind::Role,
                    name: "role".to_string(),
                    namespace: Some("other".to_string()),
                },
            },
        );
        attachment.metadata.namespace = Some("ns".to_string());
        attachment
    }

    #[test]
    fn naming() {
        let role = role("name");
        assert_eq!("ns-name", entity_name(&role));
        assert_eq!("/ns/", entity_path(&role));
    }

    #[test]
    fn role_instance_uses_recorded_arn() -> anyhow::Result<()> {
        let mut role = role("name");
        let instance = role_instance(&role)?;
        assert!(instance.arn().is_none());
        assert_eq!(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"sts:AssumeRole","Resource":"*"}]}"#,
            instance.definition.assume_role_policy_document
        );
        role.aws_object_status_mut().arn = "arn:aws:iam::000000000000:role/ns/ns-name".to_string();
        let instance = role_instance(&role)?;
        assert_eq!(Some("ns-name"), instance.arn().map(|a| a.resource_name()));
        Ok(())
    }

    #[test]
    fn garbage_arn_in_status_is_an_error() {
        let mut role = role("name");
        role.aws_object_status_mut().arn = "not-an-arn".to_string();
        assert!(role_instance(&role).is_err());
    }

    #[test]
    fn role_pre_check() -> anyhow::Result<()> {
        let role = role("name");
        role.pre_check(&role_instance(&role)?)?;

        let long = self::role(&"x".repeat(62));
        let err = long.pre_check(&role_instance(&long)?).unwrap_err();
        assert!(err.to_string().contains("longer than 64 characters"));

        let mut no_statements = self::role("name");
        no_statements.spec.assume_role_policy.clear();
        assert!(no_statements
            .pre_check(&role_instance(&no_statements)?)
            .is_err());

        let mut short_session = self::role("name");
        short_session.spec.max_session_duration = Some(60);
        let err = short_session
            .pre_check(&role_instance(&short_session)?)
            .unwrap_err();
        assert_eq!(
            "maxSessionDuration 60 is not within 3600 and 43200 seconds",
            err.to_string()
        );
        Ok(())
    }

    #[test]
    fn name_syntax() {
        assert!(check_name("Role", "ns-my.role@x_1+=,", 64).is_ok());
        assert!(check_name("Role", "ns-my role", 64).is_err());
        assert!(check_name("Role", "ns-my/role", 64).is_err());
    }

    #[test]
    fn policy_pre_check() -> anyhow::Result<()> {
        let ok = policy(vec![statement("s3:GetObject")]);
        ok.pre_check(&policy_instance(&ok)?)?;

        let empty = policy(vec![]);
        assert!(empty.pre_check(&policy_instance(&empty)?).is_err());

        let huge = policy(
            (0..200)
                .map(|i| statement(&format!("s3:SomeVeryLongActionName{:04}", i)))
                .collect(),
        );
        let err = huge.pre_check(&policy_instance(&huge)?).unwrap_err();
        assert!(err.to_string().contains("AWS allows at most 6144"));
        Ok(())
    }

    #[test]
    fn user() -> anyhow::Result<()> {
        let mut user = User::new("name", UserSpec::default());
        user.metadata.namespace = Some("ns".to_string());
        let instance = user_instance(&user)?;
        assert_eq!("ns-name", instance.name);
        assert_eq!("/ns/", instance.path);
        assert!(instance.arn.is_none());
        user.pre_check(&instance)?;
        Ok(())
    }

    #[test]
    fn attachment_target_name_comes_from_arn() -> anyhow::Result<()> {
        let instance = attachment_instance(
            Some("arn:aws:iam::000000000000:policy/ns/ns-policy"),
            AttachmentTargetKind::User,
            Some("arn:aws:iam::000000000000:user/other/other-user"),
        )?;
        assert_eq!(
            Some(PolicyTarget::User("other-user".to_string())),
            instance.target
        );
        assert_eq!(
            Some("arn:aws:iam::000000000000:policy/ns/ns-policy".to_string()),
            instance.arn().map(|a| a.to_string())
        );
        Ok(())
    }

    #[test]
    fn attachment_pre_check_names_missing_reference() -> anyhow::Result<()> {
        let attachment = attachment();
        let err = attachment
            .pre_check(&attachment_instance(None, AttachmentTargetKind::Role, None)?)
            .unwrap_err();
        assert_eq!(
            "Policy ns/policy does not exist or has not been reconciled yet",
            err.to_string()
        );
        let err = attachment
            .pre_check(&attachment_instance(
                Some("arn:aws:iam::000000000000:policy/ns/ns-policy"),
                AttachmentTargetKind::Role,
                None,
            )?)
            .unwrap_err();
        assert_eq!(
            "Role other/role does not exist or has not been reconciled yet",
            err.to_string()
        );
        attachment.pre_check(&attachment_instance(
            Some("arn:aws:iam::000000000000:policy/ns/ns-policy"),
            AttachmentTargetKind::Role,
            Some("arn:aws:iam::000000000000:role/other/other-role"),
        )?)?;
        Ok(())
    }
}
