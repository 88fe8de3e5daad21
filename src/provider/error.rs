use thiserror::Error;

/// Error surfaced by any collaborator service.
///
/// The variants mirror the provider's error types so that the reconciler can
/// branch on "not found" without string matching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("ResourceNotFoundException: {0}")]
    ResourceNotFoundException(String),
    #[error("ResourceConflictException: {0}")]
    ResourceConflictException(String),
    #[error("InvalidParameterValueException: {0}")]
    InvalidParameterValueException(String),
    #[error("AccessDeniedException: {0}")]
    AccessDeniedException(String),
    #[error("ServiceException: {0}")]
    ServiceException(String),
}

impl ServiceError {
    pub fn error_type(&self) -> &str {
        match self {
            ServiceError::ResourceNotFoundException(_) => "ResourceNotFoundException",
            ServiceError::ResourceConflictException(_) => "ResourceConflictException",
            ServiceError::InvalidParameterValueException(_) => "InvalidParameterValueException",
            ServiceError::AccessDeniedException(_) => "AccessDeniedException",
            ServiceError::ServiceException(_) => "ServiceException",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::ResourceNotFoundException(m)
            | ServiceError::ResourceConflictException(m)
            | ServiceError::InvalidParameterValueException(m)
            | ServiceError::AccessDeniedException(m)
            | ServiceError::ServiceException(m) => m,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::ResourceNotFoundException(_))
    }
}

/// Maps a not-found error to `Ok(None)`, keeping every other error.
pub trait NotFoundExt<T> {
    fn found(self) -> Result<Option<T>, ServiceError>;
}

impl<T> NotFoundExt<T> for Result<T, ServiceError> {
    fn found(self) -> Result<Option<T>, ServiceError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
