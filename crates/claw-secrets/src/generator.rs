//! Value generation for rotations.

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::types::{GenerationType, SecretMetadata, SecretValue};

/// Caller-supplied generator for [`GenerationType::Custom`] policies.
pub type CustomGenerator = Arc<dyn Fn(&SecretMetadata) -> Result<SecretValue> + Send + Sync>;

/// Produces fresh values for rotated secrets.
#[derive(Clone)]
pub struct ValueGenerator {
    config: GeneratorConfig,
    custom: Option<CustomGenerator>,
}

impl ValueGenerator {
    /// Creates a generator without a custom hook.
    #[must_use]
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            custom: None,
        }
    }

    /// Installs the hook used for [`GenerationType::Custom`].
    #[must_use]
    pub fn with_custom(mut self, generator: CustomGenerator) -> Self {
        self.custom = Some(generator);
        self
    }

    /// Generates a value of the given kind for the secret described by `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] for certificates and for custom
    /// generation without a hook, and whatever error the hook returns.
    pub fn generate(
        &self,
        generation_type: GenerationType,
        metadata: &SecretMetadata,
    ) -> Result<SecretValue> {
        match generation_type {
            GenerationType::Password => self.password(),
            GenerationType::ApiKey => Ok(self.api_key()),
            GenerationType::Certificate => Err(Error::NotImplemented {
                feature: "certificate generation requires a CA integration".to_string(),
            }),
            GenerationType::Custom => match &self.custom {
                Some(generator) => generator(metadata),
                None => Err(Error::NotImplemented {
                    feature: "custom generation without a registered generator".to_string(),
                }),
            },
        }
    }

    fn password(&self) -> Result<SecretValue> {
        let charset: Vec<char> = self.config.password_charset.chars().collect();
        if charset.is_empty() {
            return Err(Error::Config {
                reason: "password charset is empty".to_string(),
            });
        }
        let mut rng = rand::thread_rng();
        let password: String = (0..self.config.password_length)
            .map(|_| charset[rng.gen_range(0..charset.len())])
            .collect();
        Ok(SecretValue::new(password))
    }

    fn api_key(&self) -> SecretValue {
        let key: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.config.api_key_length)
            .map(char::from)
            .collect();
        SecretValue::new(key)
    }
}

impl std::fmt::Debug for ValueGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueGenerator")
            .field("config", &self.config)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderKind, SecretPath};

    fn metadata() -> SecretMetadata {
        let path = SecretPath::new("svc/token").expect("valid path");
        SecretMetadata::new(path, ProviderKind::Vault, "test", true)
    }

    #[test]
    fn password_uses_configured_charset_and_length() {
        let generator = ValueGenerator::new(GeneratorConfig {
            password_length: 64,
            password_charset: "ab".to_string(),
            ..GeneratorConfig::default()
        });
        let value = generator
            .generate(GenerationType::Password, &metadata())
            .expect("generate");
        assert_eq!(value.len(), 64);
        assert!(value.expose().chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn api_key_is_alphanumeric_of_fixed_length() {
        let generator = ValueGenerator::new(GeneratorConfig::default());
        let value = generator
            .generate(GenerationType::ApiKey, &metadata())
            .expect("generate");
        assert_eq!(value.len(), 40);
        assert!(value.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_values_differ() {
        let generator = ValueGenerator::new(GeneratorConfig::default());
        let a = generator.generate(GenerationType::ApiKey, &metadata()).expect("a");
        let b = generator.generate(GenerationType::ApiKey, &metadata()).expect("b");
        assert_ne!(a, b);
    }

    #[test]
    fn certificate_is_not_implemented() {
        let generator = ValueGenerator::new(GeneratorConfig::default());
        let result = generator.generate(GenerationType::Certificate, &metadata());
        assert!(matches!(result, Err(Error::NotImplemented { .. })));
    }

    #[test]
    fn custom_without_hook_is_not_implemented() {
        let generator = ValueGenerator::new(GeneratorConfig::default());
        let result = generator.generate(GenerationType::Custom, &metadata());
        assert!(matches!(result, Err(Error::NotImplemented { .. })));
    }

    #[test]
    fn custom_hook_receives_metadata() {
        let generator = ValueGenerator::new(GeneratorConfig::default()).with_custom(Arc::new(
            |meta: &SecretMetadata| Ok(SecretValue::new(format!("{}-rotated", meta.path))),
        ));
        let value = generator
            .generate(GenerationType::Custom, &metadata())
            .expect("generate");
        assert_eq!(value.expose(), "svc/token-rotated");
    }
}
