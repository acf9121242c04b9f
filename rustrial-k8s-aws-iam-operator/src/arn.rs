use std::{fmt, str::FromStr};

/// Amazon Resource Name of an IAM entity, e.g. `arn:aws:iam::000000000000:role/path/name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub typ: String,
    /// Everything after the type, including the path.
    pub suffix: String,
}

impl Arn {
    /// The entity name, i.e. the last segment of the resource path.
    pub fn resource_name(&self) -> &str {
        self.suffix.rsplit('/').next().unwrap_or(self.suffix.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid ARN: {0}")]
pub struct InvalidArn(String);

impl FromStr for Arn {
    type Err = InvalidArn;

    fn from_str(arn: &str) -> Result<Self, Self::Err> {
        let r: Vec<&str> = arn.splitn(2, "/").collect();
        if let [prefix, suffix] = r.as_slice() {
            let p: Vec<&str> = prefix.split(":").collect();
            if let ["arn", partition, service, region, account, typ] = p.as_slice() {
                if !partition.is_empty() && !service.is_empty() && !suffix.is_empty() {
                    return Ok(Arn {
                        partition: partition.to_string(),
                        service: service.to_string(),
                        region: region.to_string(),
                        account: account.to_string(),
                        typ: typ.to_string(),
                        suffix: suffix.to_string(),
                    });
                }
            }
        }
        Err(InvalidArn(arn.to_string()))
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}/{}",
            self.partition, self.service, self.region, self.account, self.typ, self.suffix
        )
    }
}
