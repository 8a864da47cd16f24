//! Credential resolution.
//!
//! Secrets come from two places: the process environment and the OS
//! secure store. The resolver merges them into one immutable
//! [`ProviderConfig`] snapshot per session start, tracking where each
//! value came from. An explicitly-set environment variable always wins
//! over a stored value, and a store read sourced into the config is
//! written back into the environment (without overwriting anything) so
//! downstream libraries that only read env vars observe it.

pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;
use tracing::{debug, warn};

use store::{
    mask_key, Environment, KeyringStore, RealEnvironment, SecureStore, StoreError,
};

pub const ENV_OPENROUTER_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_ANTHROPIC_TOKEN: &str = "ANTHROPIC_AUTH_TOKEN";
pub const ENV_OPENBIO_KEY: &str = "OPENBIO_API_KEY";
pub const ENV_OPENBIO_BASE_URL: &str = "OPENBIO_BASE_URL";
pub const ENV_OPENROUTER_KEY_SOURCE: &str = "PYMOL_AI_OPENROUTER_KEY_SOURCE";
pub const ENV_OPENBIO_KEY_SOURCE: &str = "PYMOL_AI_OPENBIO_KEY_SOURCE";
pub const ENV_DISABLE: &str = "PYMOL_AI_DISABLE";
pub const ENV_DEFAULT_MODEL: &str = "PYMOL_AI_DEFAULT_MODEL";

const ACCOUNT_OPENROUTER: &str = "openrouter_api_key";
const ACCOUNT_OPENBIO: &str = "openbio_api_key";

const KEY_SOURCE_ENV: &str = "env";
const KEY_SOURCE_SAVED: &str = "saved_keyring";

pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.openbio.tech";
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// External services identified by a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Primary model-routing service.
    OpenRouter,
    /// Alternate env-var name for the routing credential. Never merged
    /// with OpenRouter: whichever variable is set is used, the primary
    /// name preferred when both are.
    Anthropic,
    /// Optional biology-data gateway.
    OpenBio,
}

impl ProviderKind {
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => ENV_OPENROUTER_KEY,
            ProviderKind::Anthropic => ENV_ANTHROPIC_TOKEN,
            ProviderKind::OpenBio => ENV_OPENBIO_KEY,
        }
    }

    fn account(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter | ProviderKind::Anthropic => ACCOUNT_OPENROUTER,
            ProviderKind::OpenBio => ACCOUNT_OPENBIO,
        }
    }

    fn source_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter | ProviderKind::Anthropic => ENV_OPENROUTER_KEY_SOURCE,
            ProviderKind::OpenBio => ENV_OPENBIO_KEY_SOURCE,
        }
    }
}

/// Provenance of a resolved secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySource {
    Environment,
    SecureStore,
    Unset,
}

/// A secret value that never renders in plaintext through Debug.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask_key(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.masked())
    }
}

/// A resolved credential: exactly one source at resolution time, value
/// present iff the source is not `Unset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub provider: ProviderKind,
    pub value: Option<Secret>,
    pub source: KeySource,
}

impl Credential {
    fn unset(provider: ProviderKind) -> Self {
        Credential {
            provider,
            value: None,
            source: KeySource::Unset,
        }
    }

    pub fn is_present(&self) -> bool {
        self.source != KeySource::Unset
    }

    pub fn masked(&self) -> String {
        self.value.as_ref().map(Secret::masked).unwrap_or_default()
    }
}

/// Read-only snapshot of all resolved credentials plus derived session
/// configuration. Created once per session start and never mutated; a
/// credential change requires a fresh resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// The routing credential (OpenRouter or its Anthropic alternate).
    pub routing: Credential,
    /// The optional gateway credential.
    pub gateway: Credential,
    pub gateway_base_url: String,
    pub model: String,
    /// `PYMOL_AI_DISABLE=1` was set at resolution time.
    pub disabled: bool,
    /// The secure store backend answered during this resolution pass.
    pub store_available: bool,
}

impl ProviderConfig {
    /// AI mode is available: a routing credential exists and the kill
    /// switch is not set.
    pub fn enabled(&self) -> bool {
        self.routing.is_present() && !self.disabled
    }

    pub fn gateway_enabled(&self) -> bool {
        self.gateway.is_present()
    }
}

/// Presence/provenance report for the settings UI. Carries no plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub has_key: bool,
    pub source: KeySource,
    pub masked_key: String,
    pub store_available: bool,
}

pub struct CredentialResolver {
    store: Box<dyn SecureStore>,
    env: Box<dyn Environment>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    pub fn new() -> Self {
        Self::with_parts(Box::new(KeyringStore), Box::new(RealEnvironment))
    }

    pub fn with_parts(store: Box<dyn SecureStore>, env: Box<dyn Environment>) -> Self {
        Self { store, env }
    }

    /// Raw environment lookup through the resolver's seam, for toggles
    /// that must honor an injected environment.
    pub fn env_var(&self, key: &str) -> Option<String> {
        self.env.get_var(key)
    }

    fn env_value(&self, key: &str) -> Option<Secret> {
        self.env
            .get_var(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Secret::new)
    }

    /// Store read that degrades to `None` on backend failure, flipping
    /// `store_available` so the caller can surface the condition.
    fn stored_value(&self, account: &str, store_available: &mut bool) -> Option<Secret> {
        match self.store.get_secret(account) {
            Ok(value) => value.map(Secret::new),
            Err(err) => {
                warn!(account, error = %err, "secure store read failed; treating as unset");
                *store_available = false;
                None
            }
        }
    }

    /// Resolve one provider's credential. Environment beats the secure
    /// store; for the routing providers the primary env name beats the
    /// alternate.
    pub fn resolve(&self, provider: ProviderKind) -> Credential {
        let mut store_available = true;
        self.resolve_tracked(provider, &mut store_available)
    }

    fn resolve_tracked(&self, provider: ProviderKind, store_available: &mut bool) -> Credential {
        if let Some(value) = self.env_value(provider.env_var()) {
            return Credential {
                provider,
                value: Some(value),
                source: KeySource::Environment,
            };
        }

        if provider == ProviderKind::OpenRouter {
            if let Some(value) = self.env_value(ENV_ANTHROPIC_TOKEN) {
                return Credential {
                    provider: ProviderKind::Anthropic,
                    value: Some(value),
                    source: KeySource::Environment,
                };
            }
        }

        match self.stored_value(provider.account(), store_available) {
            Some(value) => Credential {
                provider,
                value: Some(value),
                source: KeySource::SecureStore,
            },
            None => Credential::unset(provider),
        }
    }

    /// Produce the immutable per-session snapshot.
    ///
    /// Side effects: store-sourced values are written into the process
    /// environment (never overwriting an explicit value), and the
    /// provenance variables are updated for observability.
    pub fn resolve_config(&self) -> ProviderConfig {
        let mut store_available = true;

        let routing = self.resolve_tracked(ProviderKind::OpenRouter, &mut store_available);
        let gateway = self.resolve_tracked(ProviderKind::OpenBio, &mut store_available);

        self.sync_env(&routing);
        self.sync_env(&gateway);

        let disabled = self
            .env
            .get_var(ENV_DISABLE)
            .map(|v| v.trim() == "1")
            .unwrap_or(false);

        let model = self
            .env
            .get_var(ENV_DEFAULT_MODEL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let gateway_base_url = self
            .env
            .get_var(ENV_OPENBIO_BASE_URL)
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_GATEWAY_BASE_URL.to_string());

        debug!(
            routing_source = ?routing.source,
            gateway_source = ?gateway.source,
            disabled,
            store_available,
            "credentials resolved"
        );

        ProviderConfig {
            routing,
            gateway,
            gateway_base_url,
            model,
            disabled,
            store_available,
        }
    }

    fn sync_env(&self, credential: &Credential) {
        let source_var = credential.provider.source_var();
        match (&credential.source, &credential.value) {
            (KeySource::SecureStore, Some(secret)) => {
                // setdefault semantics: an explicit env value was already
                // ruled out by precedence, but never clobber one that
                // appeared since.
                if self.env.get_var(credential.provider.env_var()).is_none() {
                    self.env.set_var(credential.provider.env_var(), secret.expose());
                }
                self.env.set_var(source_var, KEY_SOURCE_SAVED);
            }
            (KeySource::Environment, _) => {
                self.env.set_var(source_var, KEY_SOURCE_ENV);
            }
            _ => {
                self.env.remove_var(source_var);
            }
        }
    }

    /// Presence report without exposing plaintext.
    pub fn status(&self, provider: ProviderKind) -> KeyStatus {
        let mut store_available = true;
        let credential = self.resolve_tracked(provider, &mut store_available);
        KeyStatus {
            has_key: credential.is_present(),
            source: credential.source,
            masked_key: credential.masked(),
            store_available,
        }
    }

    /// Persist a key into the secure store.
    pub fn save_key(&self, provider: ProviderKind, key: &str) -> Result<(), StoreError> {
        let value = key.trim();
        if value.is_empty() {
            return Err(StoreError::Write("API key cannot be empty".to_string()));
        }
        self.store.set_secret(provider.account(), value)
    }

    /// Remove the stored key. If the resolver previously loaded that
    /// exact value into the environment, the env var and its provenance
    /// marker are cleared too; an explicitly-exported value is left
    /// alone. Returns whether the environment was also cleared.
    pub fn clear_saved_key(&self, provider: ProviderKind) -> Result<bool, StoreError> {
        let saved = self.store.get_secret(provider.account())?;
        self.store.delete_secret(provider.account())?;

        let Some(saved) = saved else {
            return Ok(false);
        };

        let env_var = provider.env_var();
        let current = self.env.get_var(env_var).unwrap_or_default();
        let provenance = self.env.get_var(provider.source_var()).unwrap_or_default();
        if !current.is_empty() && current == saved && provenance == KEY_SOURCE_SAVED {
            self.env.remove_var(env_var);
            self.env.remove_var(provider.source_var());
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::store::{MockEnvironment, MockSecureStore};
    use super::*;
    use mockall::predicate::eq;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory Environment double for tests that care about write-back.
    #[derive(Clone, Default)]
    struct FakeEnv {
        vars: Arc<Mutex<HashMap<String, String>>>,
    }

    impl FakeEnv {
        fn with(vars: &[(&str, &str)]) -> Self {
            let env = Self::default();
            for (k, v) in vars {
                env.vars
                    .lock()
                    .unwrap()
                    .insert(k.to_string(), v.to_string());
            }
            env
        }

        fn get(&self, key: &str) -> Option<String> {
            self.vars.lock().unwrap().get(key).cloned()
        }
    }

    impl Environment for FakeEnv {
        fn get_var(&self, key: &str) -> Option<String> {
            self.get(key).filter(|v| !v.trim().is_empty())
        }

        fn set_var(&self, key: &str, value: &str) {
            self.vars
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }

        fn remove_var(&self, key: &str) {
            self.vars.lock().unwrap().remove(key);
        }
    }

    fn empty_store() -> MockSecureStore {
        let mut store = MockSecureStore::new();
        store.expect_get_secret().returning(|_| Ok(None));
        store
    }

    #[test]
    fn env_wins_over_store() {
        let mut store = MockSecureStore::new();
        store
            .expect_get_secret()
            .returning(|_| Ok(Some("stored-value".to_string())));
        let env = FakeEnv::with(&[(ENV_OPENROUTER_KEY, "env-value")]);
        let resolver = CredentialResolver::with_parts(Box::new(store), Box::new(env));

        let credential = resolver.resolve(ProviderKind::OpenRouter);
        assert_eq!(credential.source, KeySource::Environment);
        assert_eq!(credential.value.unwrap().expose(), "env-value");
    }

    #[test]
    fn primary_env_name_beats_alternate_when_both_set() {
        let env = FakeEnv::with(&[
            (ENV_OPENROUTER_KEY, "primary"),
            (ENV_ANTHROPIC_TOKEN, "alternate"),
        ]);
        let resolver = CredentialResolver::with_parts(Box::new(empty_store()), Box::new(env));

        let credential = resolver.resolve(ProviderKind::OpenRouter);
        assert_eq!(credential.provider, ProviderKind::OpenRouter);
        assert_eq!(credential.value.unwrap().expose(), "primary");
    }

    #[test]
    fn alternate_env_name_enables_routing_when_primary_absent() {
        let env = FakeEnv::with(&[(ENV_ANTHROPIC_TOKEN, "alternate")]);
        let resolver = CredentialResolver::with_parts(Box::new(empty_store()), Box::new(env));

        let credential = resolver.resolve(ProviderKind::OpenRouter);
        assert_eq!(credential.provider, ProviderKind::Anthropic);
        assert_eq!(credential.source, KeySource::Environment);
        assert_eq!(credential.value.unwrap().expose(), "alternate");
    }

    #[test]
    fn store_value_used_when_env_absent_and_written_back() {
        let mut store = MockSecureStore::new();
        store
            .expect_get_secret()
            .with(eq("openrouter_api_key"))
            .returning(|_| Ok(Some("stored-value".to_string())));
        store
            .expect_get_secret()
            .with(eq("openbio_api_key"))
            .returning(|_| Ok(None));
        let env = FakeEnv::default();
        let resolver =
            CredentialResolver::with_parts(Box::new(store), Box::new(env.clone()));

        let config = resolver.resolve_config();
        assert_eq!(config.routing.source, KeySource::SecureStore);
        assert!(config.enabled());
        assert_eq!(env.get(ENV_OPENROUTER_KEY).as_deref(), Some("stored-value"));
        assert_eq!(
            env.get(ENV_OPENROUTER_KEY_SOURCE).as_deref(),
            Some("saved_keyring")
        );
    }

    #[test]
    fn env_sourced_key_marks_env_provenance() {
        let env = FakeEnv::with(&[(ENV_OPENROUTER_KEY, "env-value")]);
        let resolver =
            CredentialResolver::with_parts(Box::new(empty_store()), Box::new(env.clone()));

        let config = resolver.resolve_config();
        assert_eq!(config.routing.source, KeySource::Environment);
        assert_eq!(env.get(ENV_OPENROUTER_KEY_SOURCE).as_deref(), Some("env"));
        // The absent gateway key leaves no provenance marker.
        assert_eq!(env.get(ENV_OPENBIO_KEY_SOURCE), None);
    }

    #[test]
    fn store_failure_degrades_to_unset_and_reports() {
        let mut store = MockSecureStore::new();
        store
            .expect_get_secret()
            .returning(|_| Err(StoreError::Unavailable("no backend".to_string())));
        let resolver =
            CredentialResolver::with_parts(Box::new(store), Box::new(FakeEnv::default()));

        let config = resolver.resolve_config();
        assert_eq!(config.routing.source, KeySource::Unset);
        assert_eq!(config.gateway.source, KeySource::Unset);
        assert!(!config.store_available);
        assert!(!config.enabled());
    }

    #[test]
    fn no_credentials_disables_everything() {
        let resolver = CredentialResolver::with_parts(
            Box::new(empty_store()),
            Box::new(FakeEnv::default()),
        );
        let config = resolver.resolve_config();
        assert!(!config.enabled());
        assert!(!config.gateway_enabled());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.gateway_base_url, DEFAULT_GATEWAY_BASE_URL);
    }

    #[test]
    fn disable_toggle_gates_ai_mode_with_key_present() {
        let env = FakeEnv::with(&[(ENV_OPENROUTER_KEY, "key"), (ENV_DISABLE, "1")]);
        let resolver = CredentialResolver::with_parts(Box::new(empty_store()), Box::new(env));
        let config = resolver.resolve_config();
        assert!(config.routing.is_present());
        assert!(!config.enabled());
    }

    #[test]
    fn gateway_base_url_override_is_trimmed() {
        let env = FakeEnv::with(&[(ENV_OPENBIO_BASE_URL, "https://gw.example.org/")]);
        let resolver = CredentialResolver::with_parts(Box::new(empty_store()), Box::new(env));
        let config = resolver.resolve_config();
        assert_eq!(config.gateway_base_url, "https://gw.example.org");
    }

    #[test]
    fn resolution_is_deterministic_for_fixed_inputs() {
        let env = FakeEnv::with(&[(ENV_OPENROUTER_KEY, "key"), (ENV_OPENBIO_KEY, "gw")]);
        let resolver = CredentialResolver::with_parts(
            Box::new(empty_store()),
            Box::new(env.clone()),
        );
        let first = resolver.resolve_config();
        let second = resolver.resolve_config();
        assert_eq!(first, second);
    }

    #[test]
    fn clear_saved_key_removes_loaded_env_value_only() {
        let mut store = MockSecureStore::new();
        store
            .expect_get_secret()
            .with(eq("openbio_api_key"))
            .returning(|_| Ok(Some("gw-key".to_string())));
        store
            .expect_delete_secret()
            .with(eq("openbio_api_key"))
            .returning(|_| Ok(()));
        let env = FakeEnv::with(&[
            (ENV_OPENBIO_KEY, "gw-key"),
            (ENV_OPENBIO_KEY_SOURCE, "saved_keyring"),
        ]);
        let resolver =
            CredentialResolver::with_parts(Box::new(store), Box::new(env.clone()));

        let cleared = resolver.clear_saved_key(ProviderKind::OpenBio).unwrap();
        assert!(cleared);
        assert_eq!(env.get(ENV_OPENBIO_KEY), None);
        assert_eq!(env.get(ENV_OPENBIO_KEY_SOURCE), None);
    }

    #[test]
    fn clear_saved_key_leaves_explicit_env_value() {
        let mut store = MockSecureStore::new();
        store
            .expect_get_secret()
            .returning(|_| Ok(Some("stored".to_string())));
        store.expect_delete_secret().returning(|_| Ok(()));
        let env = FakeEnv::with(&[(ENV_OPENBIO_KEY, "explicit")]);
        let resolver =
            CredentialResolver::with_parts(Box::new(store), Box::new(env.clone()));

        let cleared = resolver.clear_saved_key(ProviderKind::OpenBio).unwrap();
        assert!(!cleared);
        assert_eq!(env.get(ENV_OPENBIO_KEY).as_deref(), Some("explicit"));
    }

    #[test]
    fn save_key_rejects_empty_value() {
        let resolver = CredentialResolver::with_parts(
            Box::new(MockSecureStore::new()),
            Box::new(MockEnvironment::new()),
        );
        assert!(resolver.save_key(ProviderKind::OpenRouter, "   ").is_err());
    }

    #[test]
    fn secret_debug_is_masked() {
        let secret = Secret::new("sk-or-v1-deadbeef");
        assert_eq!(format!("{:?}", secret), "Secret(****beef)");
    }
}
