use thiserror::Error;

pub use sokoni_types::api::ErrorCode;

/// The only error a [`Gateway`](crate::gateway::Gateway) returns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn recovery(&self) -> Recovery {
        recovery_for(self.code)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// What a caller should do about a failed gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The row is already there; report it as done.
    AlreadyExists,
    /// A referenced row is missing; one retry without the optional reference is allowed.
    RetryNarrower,
    /// The caller must sign in again.
    SignIn,
    /// The input was refused; show the gateway's message.
    Reject,
    /// Stop and show a generic failure.
    Abort,
}

const RECOVERY_TABLE: &[(ErrorCode, Recovery)] = &[
    (ErrorCode::Conflict, Recovery::AlreadyExists),
    (ErrorCode::ForeignKey, Recovery::RetryNarrower),
    (ErrorCode::Unauthorized, Recovery::SignIn),
    (ErrorCode::Validation, Recovery::Reject),
    (ErrorCode::Forbidden, Recovery::Reject),
];

pub fn recovery_for(code: ErrorCode) -> Recovery {
    RECOVERY_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, r)| *r)
        .unwrap_or(Recovery::Abort)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Non-blocking, user-facing notification (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, text: text.into() }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, text: text.into() }
    }

    /// Map a gateway failure to a notice, falling back to `generic` when the
    /// error carries nothing the user can act on.
    pub fn from_gateway(err: &GatewayError, generic: &str) -> Self {
        match err.recovery() {
            Recovery::AlreadyExists => Self::info("Already exists"),
            Recovery::SignIn => Self::warning("Please sign in to continue"),
            Recovery::Reject => Self::error(err.message.clone()),
            Recovery::RetryNarrower | Recovery::Abort => Self::error(generic),
        }
    }
}
