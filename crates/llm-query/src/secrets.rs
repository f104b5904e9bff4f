use std::env;

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Shortest API key accepted for a hosted provider
pub const MIN_API_KEY_LENGTH: usize = 35;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret {0} not found")]
    NotFound(String),

    #[error("Failed to read secret {name}: {reason}")]
    Access { name: String, reason: String },

    #[error("Secret {name} is too short: expected at least {required} characters, got {got}")]
    TooShort {
        name: String,
        required: usize,
        got: usize,
    },
}

/// Where API keys come from when the settings do not spell them out
#[cfg_attr(test, automock)]
pub trait SecretSource: Send + Sync {
    fn secret(&self, name: &str) -> Result<String, SecretError>;
}

/// Reads secrets from process environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentSecrets;

impl SecretSource for EnvironmentSecrets {
    fn secret(&self, name: &str) -> Result<String, SecretError> {
        match env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) | Err(env::VarError::NotPresent) => Err(SecretError::NotFound(name.to_string())),
            Err(e) => Err(SecretError::Access {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Load a secret and check it meets the minimum key length
pub fn validate_api_key(source: &dyn SecretSource, name: &str) -> Result<String, SecretError> {
    let key = source.secret(name)?;
    check_key_length(name, &key)?;
    Ok(key)
}

pub(crate) fn check_key_length(name: &str, key: &str) -> Result<(), SecretError> {
    let got = key.chars().count();
    if got < MIN_API_KEY_LENGTH {
        return Err(SecretError::TooShort {
            name: name.to_string(),
            required: MIN_API_KEY_LENGTH,
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    const VALID_KEY: &str = "sk-0123456789abcdefghijklmnopqrstuvwxyz";

    #[test]
    fn test_validate_api_key_accepts_long_key() {
        let mut source = MockSecretSource::new();
        source
            .expect_secret()
            .with(eq("OPENAI_API_KEY"))
            .times(1)
            .returning(|_| Ok(VALID_KEY.to_string()));

        assert_eq!(
            validate_api_key(&source, "OPENAI_API_KEY").unwrap(),
            VALID_KEY
        );
    }

    #[test]
    fn test_validate_api_key_rejects_short_key() {
        let mut source = MockSecretSource::new();
        source
            .expect_secret()
            .returning(|_| Ok("sk-short".to_string()));

        let err = validate_api_key(&source, "OPENAI_API_KEY").unwrap_err();
        assert_eq!(
            err,
            SecretError::TooShort {
                name: "OPENAI_API_KEY".to_string(),
                required: MIN_API_KEY_LENGTH,
                got: 8,
            }
        );
    }

    #[test]
    fn test_validate_api_key_propagates_missing() {
        let mut source = MockSecretSource::new();
        source
            .expect_secret()
            .returning(|name| Err(SecretError::NotFound(name.to_string())));

        let err = validate_api_key(&source, "GEMINI_API_KEY").unwrap_err();
        assert!(matches!(err, SecretError::NotFound(name) if name == "GEMINI_API_KEY"));
    }

    #[test]
    fn test_environment_secrets() {
        let name = "LLM_QUERY_TEST_SECRET_ENVIRONMENT";
        env::set_var(name, VALID_KEY);
        assert_eq!(EnvironmentSecrets.secret(name).unwrap(), VALID_KEY);

        env::remove_var(name);
        assert_eq!(
            EnvironmentSecrets.secret(name).unwrap_err(),
            SecretError::NotFound(name.to_string())
        );
    }
}
