//! Cloud gateway: thin per-service adapters over the AWS SDK
//!
//! Each service exposes a trait with describe/create/modify/delete
//! operations plus error classification. The reconciliation core and the
//! per-kind external adapters only ever see [`CloudError`], never raw SDK
//! error types.

mod elb;
mod iam;

pub use elb::{CreateLoadBalancerRequest, ElbGateway, LoadBalancerData, SdkElbGateway};
pub use iam::{CreateRoleRequest, IamGateway, RoleData, SdkIamGateway};

#[cfg(test)]
pub use elb::MockElbGateway;
#[cfg(test)]
pub use iam::MockIamGateway;

use aws_sdk_iam::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Classification of a cloud gateway failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloudErrorKind {
    /// The cloud reports the resource does not exist
    NotFound,
    /// The cloud reports a resource with this identity already exists
    AlreadyExists,
    /// Rate limiting; retry later
    Throttled,
    /// The cloud rejected the request parameters
    InvalidParameter,
    /// Anything else (network, internal service errors, ...)
    Other,
}

/// A classified error from a cloud gateway call
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct CloudError {
    kind: CloudErrorKind,
    message: String,
}

impl CloudError {
    /// Create a classified cloud error
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an `InvalidParameter` error (e.g. a request that could not
    /// even be built)
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::InvalidParameter, message)
    }

    /// Create a `NotFound` error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, message)
    }

    /// Classification of this error
    pub fn kind(&self) -> CloudErrorKind {
        self.kind
    }

    /// True when the cloud reports the resource is absent
    pub fn is_not_found(&self) -> bool {
        self.kind == CloudErrorKind::NotFound
    }

    /// True when the cloud reports the resource already exists
    pub fn is_already_exists(&self) -> bool {
        self.kind == CloudErrorKind::AlreadyExists
    }

    /// True for rate-limit responses
    pub fn is_throttling(&self) -> bool {
        self.kind == CloudErrorKind::Throttled
    }

    /// Classify an SDK error by its service error code.
    ///
    /// Classification is code-based rather than per-operation error enums so
    /// one helper covers every operation of both services.
    pub fn from_sdk<E, R>(err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::fmt::Debug,
        R: std::fmt::Debug,
    {
        let code = err.code().unwrap_or_default().to_string();
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{err:?}"));
        let kind = classify_code(&code);
        Self::new(kind, format!("{code}: {message}"))
    }
}

/// Map an AWS error code to a [`CloudErrorKind`].
fn classify_code(code: &str) -> CloudErrorKind {
    match code {
        "NoSuchEntity"
        | "NoSuchEntityException"
        | "LoadBalancerNotFound"
        | "LoadBalancerNotFoundException"
        | "ResourceNotFoundException" => CloudErrorKind::NotFound,
        "EntityAlreadyExists"
        | "EntityAlreadyExistsException"
        | "DuplicateLoadBalancerName"
        | "DuplicateLoadBalancerNameException"
        | "DuplicateTagKeys" => CloudErrorKind::AlreadyExists,
        "Throttling" | "ThrottlingException" | "TooManyRequestsException" | "RequestLimitExceeded" => {
            CloudErrorKind::Throttled
        }
        "ValidationError"
        | "ValidationException"
        | "MalformedPolicyDocument"
        | "MalformedPolicyDocumentException"
        | "InvalidParameterValue"
        | "InvalidParameterCombination"
        | "InvalidInput"
        | "InvalidConfigurationRequest"
        | "InvalidConfigurationRequestException"
        | "InvalidSubnet"
        | "InvalidSubnetException"
        | "InvalidSecurityGroup"
        | "InvalidSecurityGroupException"
        | "InvalidSchemeException" => CloudErrorKind::InvalidParameter,
        _ => CloudErrorKind::Other,
    }
}
