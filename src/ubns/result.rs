//! Uniform outcome of every naming RPC and protocol step.

use std::fmt;

use tonic::{Code, Status};

/// Success, or a failure code plus a human-readable message.
///
/// Codes are gRPC status codes. `code()` is 0 and `message()` is empty
/// on success; a default-constructed result is a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    success: bool,
    code: i32,
    message: String,
}

impl Default for OperationResult {
    fn default() -> Self {
        Self::success()
    }
}

impl OperationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            code: 0,
            message: String::new(),
        }
    }

    /// A failed result. A zero `code` is promoted to `UNKNOWN` so that a
    /// failure never reads as `OK`.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        let code = if code == Code::Ok as i32 {
            Code::Unknown as i32
        } else {
            code
        };
        Self {
            success: false,
            code,
            message: message.into(),
        }
    }

    /// A failure that happened below the naming authority: no channel,
    /// connection refused, deadline exceeded.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::failure(Code::Unavailable as i32, message)
    }

    pub fn from_status(status: &Status) -> Self {
        Self::failure(status.code() as i32, status.message())
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    pub fn is_err(&self) -> bool {
        !self.success
    }

    pub fn code(&self) -> i32 {
        if self.success {
            0
        } else {
            self.code
        }
    }

    pub fn message(&self) -> &str {
        if self.success {
            ""
        } else {
            &self.message
        }
    }

    pub fn rpc_code(&self) -> Code {
        Code::from_i32(self.code())
    }

    /// Whether the failure carries no authoritative statement about the
    /// naming entry (the request may or may not have reached the authority).
    pub fn is_transport_error(&self) -> bool {
        self.is_err()
            && matches!(
                self.rpc_code(),
                Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled
            )
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "ok")
        } else {
            write!(f, "{:?} ({}): {}", self.rpc_code(), self.code, self.message)
        }
    }
}

impl From<Status> for OperationResult {
    fn from(status: Status) -> Self {
        Self::from_status(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_success() {
        let result = OperationResult::default();
        assert!(result.is_ok());
        assert!(!result.is_err());
        assert_eq!(result.code(), 0);
        assert_eq!(result.message(), "");
        assert!(!result.is_transport_error());
    }

    #[test]
    fn test_failure_carries_code_and_message() {
        let result = OperationResult::failure(Code::AlreadyExists as i32, "bucket foo exists");
        assert!(result.is_err());
        assert_eq!(result.rpc_code(), Code::AlreadyExists);
        assert_eq!(result.message(), "bucket foo exists");
        assert!(!result.is_transport_error());
    }

    #[test]
    fn test_zero_code_failure_is_unknown() {
        let result = OperationResult::failure(0, "odd");
        assert!(result.is_err());
        assert_eq!(result.rpc_code(), Code::Unknown);
    }

    #[test]
    fn test_status_conversion() {
        let result: OperationResult = Status::deadline_exceeded("too slow").into();
        assert_eq!(result.rpc_code(), Code::DeadlineExceeded);
        assert!(result.is_transport_error());

        let result = OperationResult::from_status(&Status::not_found("no entry"));
        assert_eq!(result.code(), Code::NotFound as i32);
        assert!(!result.is_transport_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(OperationResult::success().to_string(), "ok");
        let text = OperationResult::transport_error("no channel").to_string();
        assert!(text.contains("Unavailable"));
        assert!(text.contains("no channel"));
    }
}
