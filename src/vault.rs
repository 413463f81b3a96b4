//! Credential vault
//!
//! The only place provider credentials are validated, sealed and opened. A
//! single [`CryptoKey`] is loaded at startup under an explicit [`KeyPolicy`]
//! and injected here; nothing else reads it.
//!
//! Ciphertexts are bound to `(tenant_id, provider_id)` through the AEAD
//! additional data, so a blob copied onto another binding will not open.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::config::ConfigError;
use crate::connectors::{ProviderType, Registry};
use crate::crypto::{self, CryptoError, CryptoKey};
use crate::error::SyncError;

/// Whether a missing `CRYPTO_KEY` may be replaced by a throwaway key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Generate a random per-process key when none is configured.
    AllowEphemeral,
    /// Refuse to start without a configured key.
    RequireConfigured,
}

impl KeyPolicy {
    /// `local` and `test` profiles allow an ephemeral key; every other profile requires one.
    pub fn for_profile(profile: &str) -> Self {
        match profile {
            "local" | "test" => KeyPolicy::AllowEphemeral,
            _ => KeyPolicy::RequireConfigured,
        }
    }
}

/// Builds the process encryption key.
///
/// A configured key must be exactly 32 bytes. When absent, behaviour follows
/// `policy`.
pub fn derive_or_load_key(
    configured: Option<&[u8]>,
    policy: KeyPolicy,
) -> Result<CryptoKey, ConfigError> {
    match (configured, policy) {
        (Some(bytes), _) => CryptoKey::new(bytes.to_vec())
            .map_err(|_| ConfigError::InvalidCryptoKeyLength {
                length: bytes.len(),
            }),
        (None, KeyPolicy::AllowEphemeral) => {
            warn!(
                "DATASYNC_CRYPTO_KEY not set; using an ephemeral key. Credentials stored by this process cannot be read after restart."
            );
            Ok(CryptoKey::generate())
        }
        (None, KeyPolicy::RequireConfigured) => Err(ConfigError::MissingCryptoKey),
    }
}

/// Appends `_<tenant_id>` to `base` unless it already ends with it.
pub fn apply_namespace_rule(base: &str, tenant_id: i64) -> String {
    let suffix = format!("_{}", tenant_id);
    if base.ends_with(&suffix) {
        base.to_string()
    } else {
        format!("{}{}", base, suffix)
    }
}

/// A credential object accepted by its provider's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    provider_type: ProviderType,
    value: Value,
}

impl ValidatedConfig {
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn as_json(&self) -> &Value {
        &self.value
    }

    pub fn into_json(self) -> Value {
        self.value
    }

    /// String field lookup.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }
}

/// Validates, seals and opens provider credentials.
#[derive(Clone)]
pub struct ConfigVault {
    key: Arc<CryptoKey>,
    registry: Arc<Registry>,
}

impl ConfigVault {
    pub fn new(key: CryptoKey, registry: Arc<Registry>) -> Self {
        Self {
            key: Arc::new(key),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs the provider type's credential schema over `raw`.
    pub fn validate(
        &self,
        provider_type: ProviderType,
        raw: &Value,
    ) -> Result<ValidatedConfig, SyncError> {
        let connector = self
            .registry
            .get(provider_type)
            .map_err(|e| SyncError::UnknownProvider(e.to_string()))?;
        let value = connector.validate_config(raw)?;
        Ok(ValidatedConfig {
            provider_type,
            value,
        })
    }

    /// Rewrites the namespace field so it ends with the tenant suffix.
    ///
    /// Idempotent. Providers without a namespace field pass through.
    pub fn apply_namespace(
        &self,
        mut config: ValidatedConfig,
        tenant_id: i64,
    ) -> Result<ValidatedConfig, SyncError> {
        let connector = self
            .registry
            .get(config.provider_type)
            .map_err(|e| SyncError::UnknownProvider(e.to_string()))?;
        let Some(field) = connector.namespace_field() else {
            return Ok(config);
        };

        if tenant_id <= 0 {
            return Err(SyncError::validation(format!(
                "tenant id must be positive, got {}",
                tenant_id
            )));
        }

        let base = config
            .get_str(field)
            .ok_or_else(|| SyncError::ConfigValidation {
                message: format!("{} is required", field),
                fields: vec![field.to_string()],
            })?
            .to_string();

        if let Some(object) = config.value.as_object_mut() {
            object.insert(
                field.to_string(),
                Value::String(apply_namespace_rule(&base, tenant_id)),
            );
        }
        Ok(config)
    }

    /// Encrypts the canonical JSON of `config` for one binding.
    pub fn encrypt(
        &self,
        tenant_id: i64,
        provider_id: i32,
        config: &ValidatedConfig,
    ) -> Result<String, SyncError> {
        let plaintext = serde_json::to_vec(&config.value)
            .map_err(|e| SyncError::validation(format!("config is not serializable: {}", e)))?;
        crypto::encrypt_to_text(&self.key, &binding_aad(tenant_id, provider_id), &plaintext)
            .map_err(|e| SyncError::validation(format!("config could not be encrypted: {}", e)))
    }

    /// Decrypts a stored config back into plaintext JSON.
    ///
    /// Wrong key, tampering and corrupt tokens are all `SyncError::Decryption`.
    pub fn decrypt(
        &self,
        tenant_id: i64,
        provider_id: i32,
        ciphertext: &str,
    ) -> Result<Value, SyncError> {
        let plaintext = crypto::decrypt_from_text(
            &self.key,
            &binding_aad(tenant_id, provider_id),
            ciphertext,
        )
        .map_err(SyncError::Decryption)?;
        serde_json::from_slice(&plaintext).map_err(|_| {
            SyncError::Decryption(CryptoError::DecryptionFailed(
                "plaintext is not valid JSON".to_string(),
            ))
        })
    }

    /// Validate, apply the namespace rule and encrypt: the write path for bindings.
    pub fn seal(
        &self,
        tenant_id: i64,
        provider_id: i32,
        provider_type: ProviderType,
        raw: &Value,
    ) -> Result<String, SyncError> {
        let validated = self.validate(provider_type, raw)?;
        let namespaced = self.apply_namespace(validated, tenant_id)?;
        self.encrypt(tenant_id, provider_id, &namespaced)
    }

    /// Decrypt for use by a sync or connection test.
    ///
    /// The namespace rule is reapplied on read.
    pub fn open(
        &self,
        tenant_id: i64,
        provider_id: i32,
        provider_type: ProviderType,
        ciphertext: &str,
    ) -> Result<ValidatedConfig, SyncError> {
        let value = self.decrypt(tenant_id, provider_id, ciphertext)?;
        self.apply_namespace(
            ValidatedConfig {
                provider_type,
                value,
            },
            tenant_id,
        )
    }
}

fn binding_aad(tenant_id: i64, provider_id: i32) -> Vec<u8> {
    format!("{}|{}", tenant_id, provider_id).into_bytes()
}
