use aws_sdk_iam::error::DisplayErrorContext;
use indoc::indoc;
use kube::{Api, Client};
use log::{error, info};
use metrics_exporter_prometheus::PrometheusBuilder;
use rustrial_k8s_aws_iam_operator_apis::{Policy, PolicyAttachment, Role, User};
use std::{sync::Arc, time::Duration};

mod arn;
mod controller;
use controller::*;
mod error;
mod iam_policy;
mod instance;
mod lifecycle;
mod objects;
use objects::IamObject;
mod policy_versions;
use policy_versions::*;
mod provider;
use provider::{IamApi, DEFAULT_REGION};
mod status;
#[cfg(test)]
mod testing;

/// Default upper bound for a single AWS API call, retries included.
const DEFAULT_OPERATION_TIMEOUT_SECONDS: u64 = 30;

pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn api<K: IamObject>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::<K>::namespaced(client.clone(), ns),
        None => Api::<K>::all(client.clone()),
    }
}

fn aws_object_controller<K: IamObject>(
    client: &Client,
    namespace: Option<&str>,
    iam: &Arc<dyn IamApi>,
) -> AwsObjectController<K> {
    AwsObjectController {
        client: client.clone(),
        objects: api(client, namespace),
        iam: iam.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    env_logger::init();
    let region = env_var("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
    let timeout = env_var("AWS_OPERATION_TIMEOUT_SECONDS")
        .map(|t| t.parse::<u64>().ok())
        .flatten()
        .unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECONDS);
    let sdk_config = provider::sdk_config(region.as_str(), Duration::from_secs(timeout)).await;
    let whoami = match aws_sdk_sts::Client::new(&sdk_config)
        .get_caller_identity()
        .send()
        .await
    {
        Ok(whoami) => whoami,
        Err(e) => {
            let hint = indoc! {r#"
                Operator terminated due to wrong or missing AWS credentials, please fix the operator's
                AWS permissions according to the instructions below.

                The operator picks up credentials from the default AWS credentials chain, which
                includes IAM Roles for ServiceAccounts (IRSA), see
                https://docs.aws.amazon.com/eks/latest/userguide/iam-roles-for-service-accounts.html

                The AWS identity of the operator needs the following permissions:

                {
                    "Version": "2012-10-17",
                    "Statement": [
                        {
                            "Effect": "Allow",
                            "Action": [
                                "iam:CreateRole",
                                "iam:UpdateRole",
                                "iam:UpdateAssumeRolePolicy",
                                "iam:DeleteRole",
                                "iam:CreatePolicy",
                                "iam:CreatePolicyVersion",
                                "iam:ListPolicyVersions",
                                "iam:DeletePolicyVersion",
                                "iam:DeletePolicy",
                                "iam:CreateUser",
                                "iam:UpdateUser",
                                "iam:DeleteUser",
                                "iam:AttachRolePolicy",
                                "iam:DetachRolePolicy",
                                "iam:AttachUserPolicy",
                                "iam:DetachUserPolicy"
                            ],
                            "Resource": "*"
                        },
                        {
                            "Effect": "Allow",
                            "Action": "sts:GetCallerIdentity",
                            "Resource": "*"
                        }
                    ]
                }

                Check the documentation at https://github.com/rustrial/k8s-aws-iam-controller for more information.
            "#};
            let e = anyhow::format_err!("{}", DisplayErrorContext(&e));
            error!("Unable to obtain AWS identity: {}\n\n{}", e, hint);
            Err(e)?
        }
    };
    info!(
        "Operator is running with AWS Identity {:?} (operation timeout {}s)",
        whoami.arn(),
        timeout
    );
    let iam = provider::iam_service(&sdk_config);
    let metrics_builder = PrometheusBuilder::new();
    metrics_builder.install()?;
    let client = Client::try_default().await?;
    let namespace = env_var("WATCH_NAMESPACE");
    match namespace.as_deref() {
        Some(ns) => info!("Operator is only watching resources in namespace {}", ns),
        None => info!("Operator is watching resources in all namespaces"),
    }
    let namespace = namespace.as_deref();
    let roles = aws_object_controller::<Role>(&client, namespace, &iam).start();
    let policies = aws_object_controller::<Policy>(&client, namespace, &iam).start();
    let users = aws_object_controller::<User>(&client, namespace, &iam).start();
    let attachments = aws_object_controller::<PolicyAttachment>(&client, namespace, &iam).start();
    let pruner = PolicyVersionPruner {
        iam: iam.clone(),
        policies: api::<Policy>(&client, namespace),
    };
    let schedule = tokio::spawn(pruner.start());

    tokio::select! {
       _ = roles => (),
       _ = policies => (),
       _ = users => (),
       _ = attachments => (),
       _ = schedule => (),
    };
    Ok(())
}
