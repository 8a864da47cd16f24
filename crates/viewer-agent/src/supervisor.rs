//! Session lifecycle and mode selection.
//!
//! The supervisor resolves credentials once at startup into an
//! immutable snapshot; settings changes re-resolve and swap the whole
//! snapshot rather than mutating it under a live session.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::credentials::{CredentialResolver, ProviderConfig};
use crate::errors::{AgentError, AgentResult};
use crate::gateway::GatewayClient;
use crate::host::{HostBridge, StateLimits, ViewerHost};
use crate::models::message::Message;
use crate::providers::{OpenRouterProvider, Provider};
use crate::registry::ToolRegistry;
use crate::session::{ConversationSession, EventSink};
use crate::settings::{Settings, ENV_AGENT_MODE};

const FALLBACK_SYSTEM_PROMPT: &str = "\
You are a helpful assistant for a molecular viewer application. Answer \
concisely. You cannot execute commands in this mode; when an action is \
needed, tell the user exactly which viewer commands to run.";

/// How user requests are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Full tool loop against the live viewer.
    Agent,
    /// Single-shot completion, no tools.
    CliFallback,
}

/// Answers whether the full agent loop can run in this process.
pub trait AgentRuntimeProbe: Send + Sync {
    fn agent_runtime_available(&self) -> bool;
}

/// The loop ships with the library, so the default probe says yes.
pub struct BuiltinRuntimeProbe;

impl AgentRuntimeProbe for BuiltinRuntimeProbe {
    fn agent_runtime_available(&self) -> bool {
        true
    }
}

pub struct SessionSupervisor {
    resolver: CredentialResolver,
    config: RwLock<Arc<ProviderConfig>>,
    settings: Settings,
    probe: Box<dyn AgentRuntimeProbe>,
    /// `PYMOL_AI_AGENT_MODE` captured at construction through the
    /// resolver's environment: `1` forces the agent loop, `0` forces
    /// the fallback, anything else defers to the probe.
    agent_mode_override: Option<bool>,
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::with_parts(
            CredentialResolver::new(),
            Settings::from_env(),
            Box::new(BuiltinRuntimeProbe),
        )
    }

    pub fn with_parts(
        resolver: CredentialResolver,
        settings: Settings,
        probe: Box<dyn AgentRuntimeProbe>,
    ) -> Self {
        let agent_mode_override =
            resolver.env_var(ENV_AGENT_MODE).and_then(|v| match v.trim() {
                "1" => Some(true),
                "0" => Some(false),
                _ => None,
            });
        let config = Arc::new(resolver.resolve_config());
        info!(
            enabled = config.enabled(),
            gateway = config.gateway_enabled(),
            model = %config.model,
            "supervisor initialized"
        );
        Self {
            resolver,
            config: RwLock::new(config),
            settings,
            probe,
            agent_mode_override,
        }
    }

    /// Current immutable config snapshot.
    pub fn config(&self) -> Arc<ProviderConfig> {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Re-resolve credentials and swap the snapshot. Sessions created
    /// earlier keep the snapshot they started with.
    pub fn refresh(&self) -> Arc<ProviderConfig> {
        let fresh = Arc::new(self.resolver.resolve_config());
        *self.config.write().expect("config lock poisoned") = fresh.clone();
        info!(enabled = fresh.enabled(), "configuration refreshed");
        fresh
    }

    pub fn enabled(&self) -> bool {
        self.config().enabled()
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub fn mode(&self) -> SessionMode {
        match self.agent_mode_override {
            Some(true) => SessionMode::Agent,
            Some(false) => SessionMode::CliFallback,
            None => {
                if self.probe.agent_runtime_available() {
                    SessionMode::Agent
                } else {
                    SessionMode::CliFallback
                }
            }
        }
    }

    /// Build a session over the given viewer. Refused when no routing
    /// credential resolved or the kill switch is set.
    pub fn create_session(
        &self,
        viewer: Box<dyn ViewerHost>,
        events: EventSink,
    ) -> AgentResult<ConversationSession> {
        let config = self.config();
        if !config.enabled() {
            return Err(AgentError::CredentialUnavailable(
                "AI mode is unavailable: no API key configured or disabled by toggle".to_string(),
            ));
        }

        let provider: Arc<dyn Provider> = Arc::new(OpenRouterProvider::from_config(&config)?);
        let registry = ToolRegistry::build(&config);
        let gateway = if config.gateway_enabled() {
            Some(GatewayClient::from_config(&config)?)
        } else {
            None
        };
        let host = HostBridge::spawn(
            viewer,
            StateLimits {
                max_objects: self.settings.state_max_objects,
                max_selections: self.settings.state_max_selections,
            },
        );
        Ok(ConversationSession::new(
            provider,
            registry,
            host,
            gateway,
            self.settings.clone(),
            events,
        ))
    }

    /// Single-shot fallback path: one completion, no tool loop.
    pub async fn ask_fallback(&self, prompt: &str) -> AgentResult<String> {
        let config = self.config();
        if !config.enabled() {
            return Err(AgentError::CredentialUnavailable(
                "AI mode is unavailable: no API key configured or disabled by toggle".to_string(),
            ));
        }
        let provider = OpenRouterProvider::from_config(&config)?;
        self.ask_with(&provider, prompt).await
    }

    pub async fn ask_with(&self, provider: &dyn Provider, prompt: &str) -> AgentResult<String> {
        let messages = vec![Message::user().with_text(prompt)];
        let (reply, _) = provider
            .complete(FALLBACK_SYSTEM_PROMPT, &messages, &[])
            .await?;
        Ok(reply.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::store::{Environment, MockSecureStore};
    use crate::credentials::ENV_OPENROUTER_KEY;
    use crate::host::tests::FakeViewer;
    use crate::providers::MockProvider;
    use crate::session::SessionState;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedProbe(bool);

    impl AgentRuntimeProbe for FixedProbe {
        fn agent_runtime_available(&self) -> bool {
            self.0
        }
    }

    /// In-memory environment, shared so tests can mutate it between
    /// resolution passes.
    #[derive(Clone, Default)]
    struct EnvMap {
        vars: Arc<Mutex<HashMap<String, String>>>,
    }

    impl EnvMap {
        fn set(&self, key: &str, value: &str) {
            self.vars
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }
    }

    impl Environment for EnvMap {
        fn get_var(&self, key: &str) -> Option<String> {
            self.vars
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        }

        fn set_var(&self, key: &str, value: &str) {
            self.set(key, value);
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

    fn supervisor(env: EnvMap, probe: Box<dyn AgentRuntimeProbe>) -> SessionSupervisor {
        SessionSupervisor::with_parts(
            CredentialResolver::with_parts(Box::new(empty_store()), Box::new(env)),
            Settings::default(),
            probe,
        )
    }

    #[test]
    fn create_session_refused_without_credential() {
        let supervisor = supervisor(EnvMap::default(), Box::new(BuiltinRuntimeProbe));
        let err = supervisor
            .create_session(Box::new(FakeViewer::new()), EventSink::disabled())
            .unwrap_err();
        assert!(matches!(err, AgentError::CredentialUnavailable(_)));
    }

    #[test]
    fn create_session_refused_when_disabled() {
        let env = EnvMap::default();
        env.set(ENV_OPENROUTER_KEY, "sk-or-v1-test");
        env.set(crate::credentials::ENV_DISABLE, "1");
        let supervisor = supervisor(env, Box::new(BuiltinRuntimeProbe));
        assert!(!supervisor.enabled());
        assert!(supervisor
            .create_session(Box::new(FakeViewer::new()), EventSink::disabled())
            .is_err());
    }

    #[test]
    fn create_session_succeeds_with_credential() {
        let env = EnvMap::default();
        env.set(ENV_OPENROUTER_KEY, "sk-or-v1-test");
        let supervisor = supervisor(env, Box::new(BuiltinRuntimeProbe));
        let session = supervisor
            .create_session(Box::new(FakeViewer::new()), EventSink::disabled())
            .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn refresh_swaps_the_snapshot() {
        let env = EnvMap::default();
        let supervisor = supervisor(env.clone(), Box::new(BuiltinRuntimeProbe));
        assert!(!supervisor.enabled());

        env.set(ENV_OPENROUTER_KEY, "sk-or-v1-added-later");
        // Old snapshot is unchanged until refresh.
        assert!(!supervisor.enabled());
        let fresh = supervisor.refresh();
        assert!(fresh.enabled());
        assert!(supervisor.enabled());
    }

    #[test]
    fn mode_override_env_var_beats_the_probe() {
        let env = EnvMap::default();
        env.set(ENV_AGENT_MODE, "0");
        let forced_fallback = supervisor(env, Box::new(FixedProbe(true)));
        assert_eq!(forced_fallback.mode(), SessionMode::CliFallback);

        let env = EnvMap::default();
        env.set(ENV_AGENT_MODE, "1");
        let forced_agent = supervisor(env, Box::new(FixedProbe(false)));
        assert_eq!(forced_agent.mode(), SessionMode::Agent);

        let env = EnvMap::default();
        env.set(ENV_AGENT_MODE, "maybe");
        let malformed = supervisor(env, Box::new(FixedProbe(false)));
        assert_eq!(malformed.mode(), SessionMode::CliFallback);
    }

    #[test]
    fn probe_decides_without_override() {
        let with = supervisor(EnvMap::default(), Box::new(FixedProbe(true)));
        assert_eq!(with.mode(), SessionMode::Agent);
        let without = supervisor(EnvMap::default(), Box::new(FixedProbe(false)));
        assert_eq!(without.mode(), SessionMode::CliFallback);
    }

    #[tokio::test]
    async fn fallback_ask_is_a_single_completion() {
        let env = EnvMap::default();
        env.set(ENV_OPENROUTER_KEY, "sk-or-v1-test");
        let supervisor = supervisor(env, Box::new(FixedProbe(false)));
        let provider = MockProvider::new(vec![Ok(
            Message::assistant().with_text("Use `fetch 1ubq` to load it.")
        )]);

        let answer = supervisor
            .ask_with(&provider, "how do I load ubiquitin?")
            .await
            .unwrap();
        assert_eq!(answer, "Use `fetch 1ubq` to load it.");
        let request = &provider.requests()[0];
        assert!(request.tool_names.is_empty());
        assert_eq!(request.messages.len(), 1);
    }
}
