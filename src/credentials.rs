//! Credential lookup: explicit keys, then environment, then the shared
//! credentials file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{DeployError, DeployResult};

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";
pub const PROFILE_VAR: &str = "AWS_PROFILE";
pub const CREDENTIALS_FILE_VAR: &str = "AWS_SHARED_CREDENTIALS_FILE";
const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment,
    SharedFile { path: PathBuf, profile: String },
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Explicit => write!(f, "deploy descriptor"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::SharedFile { path, profile } => {
                write!(f, "{} [{}]", path.display(), profile)
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub source: CredentialSource,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct CredentialResolver {
    lookup: Lookup,
    home: Option<PathBuf>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        CredentialResolver {
            lookup: Box::new(|name| std::env::var(name).ok()),
            home: dirs::home_dir(),
        }
    }
}

impl CredentialResolver {
    /// Resolver over an explicit variable lookup and home directory.
    pub fn with_lookup<F>(lookup: F, home: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        CredentialResolver {
            lookup: Box::new(lookup),
            home,
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn credentials_file(&self) -> Option<PathBuf> {
        self.var(CREDENTIALS_FILE_VAR)
            .map(PathBuf::from)
            .or_else(|| self.home.as_ref().map(|h| h.join(".aws").join("credentials")))
    }

    pub fn resolve(
        &self,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> DeployResult<Credentials> {
        match (access_key, secret_key) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                return Ok(Credentials {
                    access_key_id: access.to_string(),
                    secret_access_key: secret.to_string(),
                    session_token: None,
                    source: CredentialSource::Explicit,
                });
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(DeployError::Credentials(
                    "accessKey and secretKey must be given together".to_string(),
                ));
            }
            _ => {}
        }

        if let (Some(access), Some(secret)) = (self.var(ACCESS_KEY_VAR), self.var(SECRET_KEY_VAR)) {
            return Ok(Credentials {
                access_key_id: access,
                secret_access_key: secret,
                session_token: self.var(SESSION_TOKEN_VAR),
                source: CredentialSource::Environment,
            });
        }

        let Some(path) = self.credentials_file() else {
            return Err(DeployError::Credentials(
                "no credentials in descriptor or environment, and no home directory".to_string(),
            ));
        };
        let profile = self
            .var(PROFILE_VAR)
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        debug!(path = %path.display(), profile = %profile, "reading shared credentials file");
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            DeployError::Credentials(format!("unable to read {}: {}", path.display(), e))
        })?;

        let profiles = parse_profiles(&contents);
        let section = profiles.get(&profile).ok_or_else(|| {
            DeployError::Credentials(format!("profile '{}' not found in {}", profile, path.display()))
        })?;
        match (
            section.get("aws_access_key_id"),
            section.get("aws_secret_access_key"),
        ) {
            (Some(access), Some(secret)) => Ok(Credentials {
                access_key_id: access.clone(),
                secret_access_key: secret.clone(),
                session_token: section.get("aws_session_token").cloned(),
                source: CredentialSource::SharedFile { path, profile },
            }),
            _ => Err(DeployError::Credentials(format!(
                "profile '{}' in {} has no access key pair",
                profile,
                path.display()
            ))),
        }
    }
}

/// Parses `[profile]` sections of `key = value` lines.
fn parse_profiles(contents: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut profiles: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            let name = name.strip_prefix("profile ").unwrap_or(name).trim().to_string();
            profiles.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            if let Some(entries) = profiles.get_mut(section) {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver(vars: &[(&str, &str)], home: Option<PathBuf>) -> CredentialResolver {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CredentialResolver::with_lookup(move |name| vars.get(name).cloned(), home)
    }

    #[test]
    fn explicit_keys_win() {
        let r = resolver(&[(ACCESS_KEY_VAR, "env"), (SECRET_KEY_VAR, "env")], None);
        let creds = r.resolve(Some("AKIA"), Some("secret")).unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert_eq!(creds.source, CredentialSource::Explicit);
    }

    #[test]
    fn half_an_explicit_pair_is_rejected() {
        let r = resolver(&[], None);
        assert!(matches!(
            r.resolve(Some("AKIA"), None),
            Err(DeployError::Credentials(_))
        ));
    }

    #[test]
    fn environment_before_file() {
        let r = resolver(
            &[
                (ACCESS_KEY_VAR, "AKIAENV"),
                (SECRET_KEY_VAR, "s"),
                (SESSION_TOKEN_VAR, "tok"),
            ],
            None,
        );
        let creds = r.resolve(None, None).unwrap();
        assert_eq!(creds.access_key_id, "AKIAENV");
        assert_eq!(creds.session_token.as_deref(), Some("tok"));
        assert_eq!(creds.source, CredentialSource::Environment);
    }

    #[test]
    fn shared_file_profile() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".aws")).unwrap();
        std::fs::write(
            home.path().join(".aws/credentials"),
            "# comment\n[default]\naws_access_key_id = AKIADEF\naws_secret_access_key = d\n\n\
             [ci]\naws_access_key_id=AKIACI\naws_secret_access_key=c\n",
        )
        .unwrap();

        let r = resolver(&[], Some(home.path().to_path_buf()));
        assert_eq!(r.resolve(None, None).unwrap().access_key_id, "AKIADEF");

        let r = resolver(&[(PROFILE_VAR, "ci")], Some(home.path().to_path_buf()));
        let creds = r.resolve(None, None).unwrap();
        assert_eq!(creds.access_key_id, "AKIACI");
        assert!(matches!(creds.source, CredentialSource::SharedFile { ref profile, .. } if profile == "ci"));

        let r = resolver(&[(PROFILE_VAR, "missing")], Some(home.path().to_path_buf()));
        assert!(r.resolve(None, None).is_err());
    }

    #[test]
    fn nothing_found_is_fatal() {
        let home = tempfile::tempdir().unwrap();
        let r = resolver(&[], Some(home.path().to_path_buf()));
        let err = r.resolve(None, None).unwrap_err();
        assert!(err.to_string().starts_with("credentials: unable to read"));
    }

    #[test]
    fn secrets_are_not_debug_printed() {
        let r = resolver(&[], None);
        let creds = r.resolve(Some("AKIA"), Some("hunter2")).unwrap();
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
