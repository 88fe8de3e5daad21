use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ServiceError;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A named stream, table, queue or bot does not resolve to an ARN.
    #[error("unable to resolve {kind} '{name}'")]
    Unresolvable { kind: &'static str, name: String },

    #[error("{operation} failed for {function}: {source}")]
    Remote {
        function: String,
        operation: &'static str,
        #[source]
        source: ServiceError,
    },

    /// The state file was written for another account or region.
    #[error("state file {path} holds account {found_account} in {found_region}, not {account} in {region}")]
    StateMismatch {
        path: String,
        account: String,
        region: String,
        found_account: String,
        found_region: String,
    },

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Attaches the function name and operation to a collaborator failure.
pub trait RemoteContext<T> {
    fn remote(self, function: &str, operation: &'static str) -> DeployResult<T>;
}

impl<T> RemoteContext<T> for Result<T, ServiceError> {
    fn remote(self, function: &str, operation: &'static str) -> DeployResult<T> {
        self.map_err(|source| DeployError::Remote {
            function: function.to_string(),
            operation,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_context_names_function_and_operation() {
        let r: Result<(), ServiceError> =
            Err(ServiceError::ServiceException("throttled".into()));
        let err = r.remote("orders-dev", "UpdateFunctionCode").unwrap_err();
        assert_eq!(
            err.to_string(),
            "UpdateFunctionCode failed for orders-dev: ServiceException: throttled"
        );
    }

    #[test]
    fn unresolvable_names_the_resource() {
        let err = DeployError::Unresolvable {
            kind: "queue",
            name: "jobs".into(),
        };
        assert_eq!(err.to_string(), "unable to resolve queue 'jobs'");
    }
}
