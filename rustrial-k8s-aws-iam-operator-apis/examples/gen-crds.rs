use kube::CustomResourceExt;
use rustrial_k8s_aws_iam_operator_apis::{Policy, PolicyAttachment, Role, User};
use serde_yaml;

pub fn main() {
    for crd in [Role::crd(), Policy::crd(), User::crd(), PolicyAttachment::crd()] {
        println!("---");
        println!("{}", serde_yaml::to_string(&crd).unwrap());
    }
}
