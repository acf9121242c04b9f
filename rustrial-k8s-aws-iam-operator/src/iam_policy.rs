use std::collections::BTreeMap;

use rustrial_k8s_aws_iam_operator_apis::{Effect, PolicyStatement};
use serde::{Deserialize, Serialize};

/// Maximum size of a managed policy document, whitespace excluded.
pub const MAX_MANAGED_POLICY_SIZE: usize = 6144;

/// A string or a list of strings, the way IAM renders single values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Values {
    One(String),
    Many(Vec<String>),
}

impl From<&Vec<String>> for Values {
    fn from(values: &Vec<String>) -> Self {
        match values.as_slice() {
            [one] => Values::One(one.clone()),
            many => Values::Many(many.to_vec()),
        }
    }
}

/// https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_policies_grammar.html
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Statement {
    #[serde(rename = "Sid", skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Principal", skip_serializing_if = "Option::is_none")]
    pub principal: Option<BTreeMap<String, Values>>,

    #[serde(rename = "Action")]
    pub action: Values,

    #[serde(rename = "Resource", skip_serializing_if = "Option::is_none")]
    pub resource: Option<Values>,

    #[serde(rename = "Condition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, BTreeMap<String, Values>>>,
}

impl From<&PolicyStatement> for Statement {
    fn from(s: &PolicyStatement) -> Self {
        Self {
            sid: s.sid.clone(),
            effect: s.effect,
            principal: s.principal.as_ref().map(|p| {
                p.iter()
                    .map(|(kind, values)| (kind.clone(), values.into()))
                    .collect()
            }),
            action: (&s.action).into(),
            resource: Some(&s.resource)
                .filter(|r| !r.is_empty())
                .map(|r| r.into()),
            condition: s.condition.as_ref().map(|c| {
                c.iter()
                    .map(|(operator, entries)| {
                        let entries = entries
                            .iter()
                            .map(|(key, values)| (key.clone(), values.into()))
                            .collect();
                        (operator.clone(), entries)
                    })
                    .collect()
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,

    #[serde(rename = "Statement")]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub const V2012_10_17: &'static str = "2012-10-17";

    pub fn new(statements: &[PolicyStatement]) -> Self {
        Self {
            version: Self::V2012_10_17.to_string(),
            statement: statements.iter().map(Statement::from).collect(),
        }
    }

    pub fn render(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
