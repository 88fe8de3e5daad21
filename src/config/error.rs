use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration error: '{field}' is required for function {function}")]
    MissingField {
        function: String,
        field: &'static str,
    },

    #[error("configuration error: unknown integration '{integration}' for trigger of {function}")]
    UnknownIntegration {
        function: String,
        integration: String,
    },

    #[error("configuration error: '{field}' is required for {integration} trigger of {function}")]
    MissingTriggerField {
        function: String,
        integration: &'static str,
        field: &'static str,
    },

    #[error("configuration error: invalid starting position '{value}' for {function}")]
    InvalidStartingPosition { function: String, value: String },

    #[error("configuration error: keepAlive must be at least 1 minute for {function}")]
    InvalidKeepAlive { function: String },

    #[error("configuration error: at least one function has to be provided")]
    NoFunctions,

    #[error("configuration error: '{0}' is required")]
    MissingSetting(&'static str),

    #[error("configuration error: invalid lambdaFunctionsJSON: {0}")]
    InvalidFunctionsJson(String),

    #[error("configuration error: expected KEY=VALUE, got '{0}'")]
    InvalidPair(String),

    #[error("configuration error: 'kmsEncryptionKeyArn' is required for encrypted variables")]
    MissingEncryptionKey,
}
