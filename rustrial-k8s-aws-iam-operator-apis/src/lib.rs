use std::collections::BTreeMap;

use kube::CustomResource;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_VERSION: &'static str = "iam.aws.rustrial.org/v1alpha1";

pub const API_GROUP: &'static str = "iam.aws.rustrial.org";

pub const VERSION: &'static str = "v1alpha1";

/// Outcome of the last synchronization with AWS IAM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SyncState {
    #[serde(rename = "OK")]
    Ok,
    Error,
}

/// Status shared by all AWS IAM backed custom resources.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default, JsonSchema)]
pub struct AwsObjectStatus {
    /// ARN of the AWS IAM entity, empty until it has been created.
    #[serde(default)]
    pub arn: String,
    /// Human readable outcome of the last synchronization.
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
    #[serde(rename = "lastSyncAttempt", default)]
    pub last_sync_attempt: String,
    /// `metadata.generation` of the last successful synchronization.
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl AwsObjectStatus {
    pub fn has_arn(&self) -> bool {
        !self.arn.is_empty()
    }
}

/// Access to the [`AwsObjectStatus`] of a custom resource.
pub trait AwsObjectStatusResource {
    fn aws_object_status(&self) -> Option<&AwsObjectStatus>;

    /// Mutable status, initialized to its default if the object has none yet.
    fn aws_object_status_mut(&mut self) -> &mut AwsObjectStatus;

    /// The ARN recorded in the status, if any.
    fn recorded_arn(&self) -> Option<&str> {
        self.aws_object_status()
            .filter(|s| s.has_arn())
            .map(|s| s.arn.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Effect {
    Allow,
    Deny,
}

impl Default for Effect {
    fn default() -> Self {
        Self::Allow
    }
}

/// A single IAM policy statement.
/// https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_policies_grammar.html
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PolicyStatement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default)]
    pub effect: Effect,
    /// Principals keyed by kind (`AWS`, `Service`, `Federated`, `CanonicalUser`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
    /// Conditions keyed by operator (e.g. `StringEquals`) and then by condition key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

/// `Role` objects declare an AWS IAM Role, which the operator creates, updates
/// and deletes on behalf of the owning namespace.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.aws.rustrial.org",
    version = "v1alpha1",
    kind = "Role",
    derive = "PartialEq",
    status = "AwsObjectStatus",
    namespaced,
    printcolumn = r#"{"name":"ARN", "type": "string", "jsonPath": ".status.arn"}"#,
    printcolumn = r#"{"name":"State", "type": "string", "jsonPath": ".status.state"}"#
)]
pub struct RoleSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Maximum session duration in seconds (3600 to 43200).
    #[serde(rename = "maxSessionDuration", skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<i32>,
    /// Statements of the Role's trust policy.
    #[serde(rename = "assumeRolePolicy")]
    pub assume_role_policy: Vec<PolicyStatement>,
}

/// `Policy` objects declare an AWS IAM customer managed Policy.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.aws.rustrial.org",
    version = "v1alpha1",
    kind = "Policy",
    derive = "PartialEq",
    status = "AwsObjectStatus",
    namespaced,
    printcolumn = r#"{"name":"ARN", "type": "string", "jsonPath": ".status.arn"}"#,
    printcolumn = r#"{"name":"State", "type": "string", "jsonPath": ".status.state"}"#
)]
pub struct PolicySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub statement: Vec<PolicyStatement>,
}

/// `User` objects declare an AWS IAM User.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.aws.rustrial.org",
    version = "v1alpha1",
    kind = "User",
    derive = "PartialEq",
    status = "AwsObjectStatus",
    namespaced,
    printcolumn = r#"{"name":"ARN", "type": "string", "jsonPath": ".status.arn"}"#,
    printcolumn = r#"{"name":"State", "type": "string", "jsonPath": ".status.state"}"#
)]
pub struct UserSpec {}

/// Reference to another object of this API group.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
pub struct ResourceReference {
    pub name: String,
    /// Defaults to the namespace of the referencing object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum AttachmentTargetKind {
    Role,
    User,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
pub struct AttachmentTarget {
    pub kind: AttachmentTargetKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// `PolicyAttachment` objects attach a `Policy` to a `Role` or `User`.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iam.aws.rustrial.org",
    version = "v1alpha1",
    kind = "PolicyAttachment",
    derive = "PartialEq",
    status = "AwsObjectStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type": "string", "jsonPath": ".status.state"}"#
)]
pub struct PolicyAttachmentSpec {
    pub policy: ResourceReference,
    pub target: AttachmentTarget,
}

macro_rules! aws_object_status_resource {
    ($($kind:ty),*) => {
        $(
            impl AwsObjectStatusResource for $kind {
                fn aws_object_status(&self) -> Option<&AwsObjectStatus> {
                    self.status.as_ref()
                }

                fn aws_object_status_mut(&mut self) -> &mut AwsObjectStatus {
                    self.status.get_or_insert_with(AwsObjectStatus::default)
                }
            }
        )*
    };
}

aws_object_status_resource!(Role, Policy, User, PolicyAttachment);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_works() {
        let p = RoleSpec {
            description: None,
            max_session_duration: Some(3600),
            assume_role_policy: vec![PolicyStatement {
                sid: None,
                effect: Effect::Allow,
                principal: None,
                action: vec!["sts:AssumeRole".to_string()],
                resource: vec![],
                condition: None,
            }],
        };
        assert_eq!(
            r#"{"maxSessionDuration":3600,"assumeRolePolicy":[{"effect":"Allow","action":["sts:AssumeRole"]}]}"#,
            serde_json::to_string(&p).unwrap()
        );
    }

    #[test]
    fn status_serialization() {
        let status = AwsObjectStatus {
            arn: "arn:aws:iam::000000000000:user/ns/ns-name".to_string(),
            message: "Succesfully reconciled".to_string(),
            state: Some(SyncState::Ok),
            last_sync_attempt: "19 Oct 26 10:00:00 +0000".to_string(),
            observed_generation: Some(3),
        };
        assert_eq!(
            r#"{"arn":"arn:aws:iam::000000000000:user/ns/ns-name","message":"Succesfully reconciled","state":"OK","lastSyncAttempt":"19 Oct 26 10:00:00 +0000","observedGeneration":3}"#,
            serde_json::to_string(&status).unwrap()
        );
        let empty: AwsObjectStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(AwsObjectStatus::default(), empty);
    }

    #[test]
    fn status_mut_initializes_status() {
        let mut user = User::new("name", UserSpec::default());
        assert!(user.aws_object_status().is_none());
        assert_eq!(None, user.recorded_arn());
        user.aws_object_status_mut().arn = "arn:aws:iam::000000000000:user/name".to_string();
        assert_eq!(
            Some("arn:aws:iam::000000000000:user/name"),
            user.recorded_arn()
        );
    }

    #[test]
    fn attachment_spec() {
        let spec: PolicyAttachmentSpec = serde_json::from_str(
            r#"{"policy":{"name":"p"},"target":{"kind":"Role","name":"r","namespace":"other"}}"#,
        )
        .unwrap();
        assert_eq!(AttachmentTargetKind::Role, spec.target.kind);
        assert_eq!(None, spec.policy.namespace);
        assert_eq!(Some("other".to_string()), spec.target.namespace);
    }
}
