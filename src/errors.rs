//! Error types.
//!
//! [`UbnsError`] covers local failures of the client itself (bad
//! configuration, a channel that cannot be built).  [`GatewayError`] is
//! what the bucket create/delete flows hand back to the S3 layer; every
//! variant maps to a well-known S3 error code and HTTP status.

use http::StatusCode;
use thiserror::Error;
use tonic::Code;

use crate::ubns::OperationResult;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Local client errors.
#[derive(Debug, Error)]
pub enum UbnsError {
    /// The endpoint string is empty or not a valid URI.
    #[error("invalid naming authority uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The transport refused to build a channel for the endpoint.
    #[error("failed to build channel to '{uri}': {reason}")]
    ChannelBuild { uri: String, reason: String },

    /// A configuration value is out of range.
    #[error("invalid ubns configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Reading the configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for [`crate::config::Config`].
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// S3-facing errors produced by the bucket naming flows.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The bucket name is held by someone else in the global namespace.
    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// The naming authority has no entry for the bucket.
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    /// The bucket you tried to delete is not empty.
    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    /// An invalid bucket name was provided.
    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// The entry belongs to another cluster.
    #[error("Access Denied")]
    AccessDenied { message: String },

    /// A conflicting operation on the same name is in progress.
    #[error("A conflicting conditional operation is currently in progress against this resource. Please try again.")]
    OperationAborted { message: String },

    /// The naming authority could not be reached.
    #[error("Please reduce your request rate.")]
    ServiceUnavailable { message: String },

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl GatewayError {
    /// Map a failed naming RPC for `bucket` onto the S3 error the user sees.
    ///
    /// Successful results have no meaningful mapping and become an
    /// internal error.
    pub fn from_result(bucket: &str, result: &OperationResult) -> Self {
        if result.is_ok() {
            return GatewayError::InternalError(anyhow::anyhow!(
                "bucket naming for '{bucket}' failed without an error result"
            ));
        }
        if result.is_transport_error() {
            return GatewayError::ServiceUnavailable {
                message: result.message().to_string(),
            };
        }
        match result.rpc_code() {
            Code::AlreadyExists => GatewayError::BucketAlreadyExists {
                bucket: bucket.to_string(),
            },
            Code::NotFound => GatewayError::NoSuchBucket {
                bucket: bucket.to_string(),
            },
            Code::PermissionDenied => GatewayError::AccessDenied {
                message: result.message().to_string(),
            },
            Code::FailedPrecondition | Code::Aborted => GatewayError::OperationAborted {
                message: result.message().to_string(),
            },
            Code::InvalidArgument => GatewayError::InvalidBucketName {
                name: bucket.to_string(),
            },
            _ => GatewayError::InternalError(anyhow::anyhow!(
                "bucket naming for '{bucket}' failed: {result}"
            )),
        }
    }

    /// Return the S3 XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            GatewayError::NoSuchBucket { .. } => "NoSuchBucket",
            GatewayError::BucketNotEmpty { .. } => "BucketNotEmpty",
            GatewayError::InvalidBucketName { .. } => "InvalidBucketName",
            GatewayError::AccessDenied { .. } => "AccessDenied",
            GatewayError::OperationAborted { .. } => "OperationAborted",
            GatewayError::ServiceUnavailable { .. } => "ServiceUnavailable",
            GatewayError::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BucketAlreadyExists { .. } => StatusCode::CONFLICT,
            GatewayError::NoSuchBucket { .. } => StatusCode::NOT_FOUND,
            GatewayError::BucketNotEmpty { .. } => StatusCode::CONFLICT,
            GatewayError::InvalidBucketName { .. } => StatusCode::BAD_REQUEST,
            GatewayError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::OperationAborted { .. } => StatusCode::CONFLICT,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
