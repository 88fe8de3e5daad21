//! Deploy descriptor loading and per-function normalization.
//!
//! The raw descriptor in [`types`] is what users write. [`DeployConfig::resolve`]
//! turns it into a [`Deployment`]: plugin-wide settings that must hold for the
//! run to start, plus one [`FunctionEntry`] per declared function whose spec is
//! either normalized or carries the configuration error that stops only that
//! function.

pub mod error;
pub mod function;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use error::ConfigError;
pub use function::{AliasSpec, AliasTarget, FunctionDefaults, FunctionSpec, TriggerSpec};
pub use types::{DeployConfig, FunctionDeclaration, TriggerDeclaration, DEFAULT_REGION};

use crate::error::DeployResult;

/// Command-line values layered over the descriptor.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub force_update: bool,
    pub suffix: Option<String>,
    pub region: Option<String>,
    pub pass_through: BTreeMap<String, String>,
    pub encrypted: BTreeMap<String, String>,
}

/// Parses a `KEY=VALUE` command-line pair.
pub fn parse_pair(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidPair(raw.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct FunctionEntry {
    /// Declared name with the suffix applied, or a placeholder if undeclared.
    pub name: String,
    pub spec: Result<FunctionSpec, ConfigError>,
}

/// Everything a run needs once the descriptor has been validated.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub artifact: PathBuf,
    pub bucket: String,
    pub region: String,
    pub force_update: bool,
    pub kms_key: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub functions: Vec<FunctionEntry>,
}

impl Deployment {
    /// Key under which the artifact is staged: its file name.
    pub fn artifact_key(&self) -> String {
        self.artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.artifact.to_string_lossy().into_owned())
    }
}

impl DeployConfig {
    pub fn load(path: &Path) -> DeployResult<DeployConfig> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Validates plugin-wide settings and normalizes each function.
    pub fn resolve(self, overrides: &Overrides) -> Result<Deployment, ConfigError> {
        let artifact = self
            .function_code
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::MissingSetting("functionCode"))?;
        let role = self
            .lambda_role_arn
            .filter(|r| !r.is_empty())
            .ok_or(ConfigError::MissingSetting("lambdaRoleArn"))?;
        if !overrides.encrypted.is_empty() && self.kms_encryption_key_arn.is_none() {
            return Err(ConfigError::MissingEncryptionKey);
        }

        let mut declarations = self.lambda_functions;
        if let Some(json) = self.lambda_functions_json.filter(|j| !j.trim().is_empty()) {
            let parsed: Vec<FunctionDeclaration> = serde_json::from_str(&json)
                .map_err(|e| ConfigError::InvalidFunctionsJson(e.to_string()))?;
            declarations.extend(parsed);
        }
        if declarations.is_empty() {
            return Err(ConfigError::NoFunctions);
        }

        let defaults = FunctionDefaults {
            suffix: overrides
                .suffix
                .clone()
                .or(self.function_name_suffix)
                .filter(|s| !s.is_empty()),
            version: self.version,
            runtime: self.runtime,
            role,
            timeout: self.timeout,
            memory_size: self.memory_size,
            security_group_ids: self.vpc_security_group_ids,
            subnet_ids: self.vpc_subnet_ids,
            publish: self.publish,
            latest_alias: self.latest_alias,
            environment: self.environment_variables,
            pass_through: overrides.pass_through.clone(),
            encrypted_pass_through: overrides.encrypted.clone(),
        };

        let functions = declarations
            .iter()
            .map(|decl| FunctionEntry {
                name: decl
                    .function_name
                    .as_deref()
                    .map(|n| defaults.add_suffix(n))
                    .unwrap_or_else(|| "<unnamed>".to_string()),
                spec: FunctionSpec::from_declaration(decl, &defaults),
            })
            .collect();

        Ok(Deployment {
            artifact: PathBuf::from(artifact),
            bucket: self.s3_bucket,
            region: overrides.region.clone().unwrap_or(self.region),
            force_update: overrides.force_update || self.force_update,
            kms_key: self.kms_encryption_key_arn,
            access_key: self.access_key,
            secret_key: self.secret_key,
            functions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> DeployConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn function_code_is_required() {
        let err = config(r#"{"lambdaRoleArn":"r","lambdaFunctions":[{"functionName":"a","handler":"h"}]}"#)
            .resolve(&Overrides::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingSetting("functionCode"));
    }

    #[test]
    fn no_functions_is_rejected() {
        let err = config(r#"{"functionCode":"build/app.zip","lambdaRoleArn":"r"}"#)
            .resolve(&Overrides::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::NoFunctions);
    }

    #[test]
    fn functions_json_is_parsed_alongside_inline() {
        let deployment = config(
            r#"{"functionCode":"build/app.zip","lambdaRoleArn":"r","version":"1.0",
                "lambdaFunctions":[{"functionName":"a","handler":"h"}],
                "lambdaFunctionsJSON":"[{\"functionName\":\"b\",\"handler\":\"h\"}]"}"#,
        )
        .resolve(&Overrides::default())
        .unwrap();
        let names: Vec<&str> = deployment.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(deployment.artifact_key(), "app.zip");
    }

    #[test]
    fn broken_functions_json_is_a_plugin_error() {
        let err = config(
            r#"{"functionCode":"app.zip","lambdaRoleArn":"r","lambdaFunctionsJSON":"[{"}"#,
        )
        .resolve(&Overrides::default())
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFunctionsJson(_)));
    }

    #[test]
    fn bad_function_only_fails_itself() {
        let deployment = config(
            r#"{"functionCode":"app.zip","lambdaRoleArn":"r","version":"1.0","lambdaFunctions":[
                {"functionName":"good","handler":"h"},
                {"functionName":"bad","handler":"h","triggers":[{"integration":"Foo"}]}]}"#,
        )
        .resolve(&Overrides::default())
        .unwrap();
        assert!(deployment.functions[0].spec.is_ok());
        assert!(deployment.functions[1].spec.is_err());
    }

    #[test]
    fn overrides_win_over_descriptor() {
        let overrides = Overrides {
            force_update: true,
            suffix: Some("-qa".into()),
            region: Some("eu-west-1".into()),
            ..Default::default()
        };
        let deployment = config(
            r#"{"functionCode":"app.zip","lambdaRoleArn":"r","version":"1.0","functionNameSuffix":"-dev",
                "lambdaFunctions":[{"functionName":"a","handler":"h"}]}"#,
        )
        .resolve(&overrides)
        .unwrap();
        assert!(deployment.force_update);
        assert_eq!(deployment.region, "eu-west-1");
        assert_eq!(deployment.functions[0].name, "a-qa");
    }

    #[test]
    fn encrypted_variables_need_a_key() {
        let mut overrides = Overrides::default();
        overrides.encrypted.insert("SECRET".into(), "s".into());
        let err = config(
            r#"{"functionCode":"app.zip","lambdaRoleArn":"r","lambdaFunctions":[{"functionName":"a","handler":"h"}]}"#,
        )
        .resolve(&overrides)
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingEncryptionKey);
    }

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("URL=a=b").unwrap(),
            ("URL".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("novalue").is_err());
    }
}
