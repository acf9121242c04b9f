use crate::provider::IamError;

/// Classification of [`InstanceError`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The AWS entity does not exist (yet). On delete this means it is already gone.
    NotYetCreated,
    /// The AWS entity exists already but is not owned by this object.
    AlreadyExists,
    /// Any other failure reported by AWS IAM.
    Provider,
}

/// Error raised by an [`crate::instance::AwsInstance`] operation.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct InstanceError {
    code: ErrorCode,
    message: String,
}

impl InstanceError {
    pub fn new<S: ToString>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    pub fn not_yet_created<S: ToString>(message: S) -> Self {
        Self::new(ErrorCode::NotYetCreated, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn is_of_error_code(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl From<IamError> for InstanceError {
    fn from(e: IamError) -> Self {
        let code = match &e {
            IamError::NoSuchEntity(_) => ErrorCode::NotYetCreated,
            IamError::EntityAlreadyExists(_) => ErrorCode::AlreadyExists,
            _ => ErrorCode::Provider,
        };
        Self::new(code, e)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Validation failed before AWS IAM was touched.
    #[error("{0:#}")]
    PreCheck(anyhow::Error),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error(transparent)]
    Iam(#[from] IamError),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("{0}")]
    Any(String),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Any(format!("{:#}", e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
