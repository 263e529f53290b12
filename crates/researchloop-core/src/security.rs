use std::env;

use crate::ResearchError;

/// API key or token read from the environment; `Debug` never prints it.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(ResearchError::MissingSecret(var.to_string())),
    }
}

/// Like [`require_env`] but for optional tool credentials.
pub fn optional_env(var: &str) -> Option<SecretValue> {
    require_env(var).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_env_success() {
        unsafe { std::env::set_var("RESEARCHLOOP_TEST_SECRET", "value") };
        let secret = require_env("RESEARCHLOOP_TEST_SECRET").expect("secret should load");
        assert_eq!(secret.expose(), "value");
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }

    #[test]
    fn require_env_missing_or_blank() {
        unsafe {
            std::env::remove_var("RESEARCHLOOP_TEST_MISSING");
            std::env::set_var("RESEARCHLOOP_TEST_BLANK", "   ");
        }
        let err = require_env("RESEARCHLOOP_TEST_MISSING").unwrap_err();
        assert!(matches!(err, ResearchError::MissingSecret(_)));
        assert!(optional_env("RESEARCHLOOP_TEST_BLANK").is_none());
    }
}
