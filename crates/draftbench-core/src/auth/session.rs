//! Authentication session state machine.
//!
//! A cyclic three-state machine mediating between persisted credentials and
//! the identity service. Entering `CheckingSession` resolves the stored token
//! and fetches the user record; success lands in `LoggedIn`, any failure in
//! `LoggedOut`. There is no terminal state: `LoggedIn`/`LoggedOut` are stable
//! until a `LogIn`/`LogOut` event perturbs them.
//!
//! Every accepted event and every check entry bumps a generation counter;
//! a check outcome is applied only while its generation is current, so a
//! completion racing a newer event can never clobber the context.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::identity::{IdentityProvider, UserRecord};
use crate::auth::store::TokenStorage;

/// Machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Resolving the stored token and fetching the user record.
    CheckingSession,
    /// Authenticated; the context holds the fetched user.
    LoggedIn,
    /// Unauthenticated; the sign-in view is active.
    LoggedOut,
}

/// External events accepted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Log in, optionally carrying a fresh token.
    LogIn { token: Option<String> },
    /// Log out and clear persisted credentials.
    LogOut,
}

/// Navigation target emitted on state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The application's main view.
    Workbench,
    /// The sign-in view.
    SignIn,
}

/// Mutable session context owned by the controller.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Authenticated user record; cleared on any failed check.
    pub user: Option<UserRecord>,
    /// Current bearer token. Not cleared on failed checks, only by `LogOut`.
    pub token: Option<String>,
}

/// The session controller.
///
/// Owns the context, the token storage and the identity provider; exposes
/// only event-driven entry points. One event is processed at a time.
pub struct SessionController<P> {
    state: SessionState,
    context: SessionContext,
    storage: TokenStorage,
    provider: P,
    override_token: Option<String>,
    routes: mpsc::UnboundedSender<Route>,
    generation: u64,
}

impl<P: IdentityProvider> SessionController<P> {
    /// Creates the controller with the context token seeded synchronously
    /// from the first available source (override, then session, then cache).
    pub fn new(
        storage: TokenStorage,
        provider: P,
        override_token: Option<String>,
        routes: mpsc::UnboundedSender<Route>,
    ) -> Self {
        let override_token = override_token.filter(|t| !t.trim().is_empty());
        let token = override_token.clone().or_else(|| storage.peek());
        Self {
            state: SessionState::CheckingSession,
            context: SessionContext { user: None, token },
            storage,
            provider,
            override_token,
            routes,
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn is_file_backed(&self) -> bool {
        self.storage.is_file_backed()
    }

    /// Enters the initial `CheckingSession` state and runs the check cycle.
    pub async fn start(&mut self) {
        self.enter_checking().await;
    }

    /// Processes one external event.
    ///
    /// Events the current state does not accept are ignored.
    pub async fn handle(&mut self, event: SessionEvent) {
        match (self.state, event) {
            (SessionState::LoggedIn, SessionEvent::LogOut) => {
                self.generation += 1;
                if let Err(e) = self.storage.clear() {
                    warn!("failed to clear token storage on logout: {e:#}");
                }
                self.context.token = None;
                self.context.user = None;
                self.transition(SessionState::LoggedOut, Route::SignIn);
            }
            (SessionState::LoggedOut, SessionEvent::LogIn { token }) => {
                self.generation += 1;
                self.context.token = Some(token.unwrap_or_default());
                self.enter_checking().await;
            }
            (state, event) => {
                debug!(?state, ?event, "session event ignored in current state");
            }
        }
    }

    async fn enter_checking(&mut self) {
        self.state = SessionState::CheckingSession;
        self.generation += 1;
        let generation = self.generation;
        let outcome = self.run_check().await;
        self.apply_check(generation, outcome);
    }

    /// Resolves the token and fetches the user record.
    async fn run_check(&self) -> Result<(UserRecord, String)> {
        let token = self
            .storage
            .resolve(self.context.token.as_deref(), self.override_token.as_deref())?;

        // No anonymous sessions when a durable token file backs the storage.
        if token.is_empty() && self.storage.is_file_backed() {
            anyhow::bail!("no stored token for a file-backed session");
        }

        let bearer = (!token.is_empty()).then_some(token.as_str());
        let user = self.provider.fetch_user(bearer).await?;
        Ok((user, token))
    }

    /// Applies a check outcome unless a newer event superseded it.
    fn apply_check(&mut self, generation: u64, outcome: Result<(UserRecord, String)>) {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding superseded session check"
            );
            return;
        }

        match outcome {
            Ok((user, token)) => {
                self.context.user = Some(user);
                if !token.is_empty() {
                    self.context.token = Some(token);
                }
                self.transition(SessionState::LoggedIn, Route::Workbench);
            }
            Err(e) => {
                debug!("session check failed: {e:#}");
                self.context.user = None;
                self.transition(SessionState::LoggedOut, Route::SignIn);
            }
        }
    }

    fn transition(&mut self, state: SessionState, route: Route) {
        self.state = state;
        // The receiver may be gone in one-shot CLI use.
        let _ = self.routes.send(route);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::auth::identity::{StandInIdentity, stand_in_user};
    use crate::auth::store::{MemorySlot, TokenSlot};

    /// Identity provider fed from a script of queued outcomes; records the
    /// bearer tokens it was called with.
    #[derive(Default)]
    struct ScriptedIdentity {
        outcomes: Mutex<VecDeque<Result<UserRecord>>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedIdentity {
        fn push(&self, outcome: Result<UserRecord>) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl IdentityProvider for &ScriptedIdentity {
        async fn fetch_user(&self, token: Option<&str>) -> Result<UserRecord> {
            self.calls
                .lock()
                .unwrap()
                .push(token.map(ToString::to_string));
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted outcome")))
        }
    }

    fn test_user() -> UserRecord {
        UserRecord {
            id: "user-1".to_string(),
            email: "ada@example.com".to_string(),
            name: Some("Ada".to_string()),
            ..UserRecord::default()
        }
    }

    struct Harness {
        session: MemorySlot,
        cache: MemorySlot,
        durable: Option<MemorySlot>,
    }

    impl Harness {
        fn file_backed() -> Self {
            Self {
                session: MemorySlot::new(),
                cache: MemorySlot::new(),
                durable: Some(MemorySlot::new()),
            }
        }

        fn ephemeral() -> Self {
            Self {
                session: MemorySlot::new(),
                cache: MemorySlot::new(),
                durable: None,
            }
        }

        fn storage(&self) -> TokenStorage {
            TokenStorage::new(
                Box::new(self.session.clone()),
                Box::new(self.cache.clone()),
                self.durable
                    .as_ref()
                    .map(|slot| Box::new(slot.clone()) as Box<dyn TokenSlot>),
            )
        }

        fn controller<'a>(
            &self,
            provider: &'a ScriptedIdentity,
            override_token: Option<String>,
        ) -> (
            SessionController<&'a ScriptedIdentity>,
            mpsc::UnboundedReceiver<Route>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                SessionController::new(self.storage(), provider, override_token, tx),
                rx,
            )
        }
    }

    /// Test: valid persisted token and reachable service land in LoggedIn.
    #[tokio::test]
    async fn test_start_with_persisted_token_logs_in() {
        let harness = Harness::file_backed();
        harness.session.write("db-tok-abc").unwrap();
        let provider = ScriptedIdentity::default();
        provider.push(Ok(test_user()));

        let (mut controller, mut routes) = harness.controller(&provider, None);
        controller.start().await;

        assert_eq!(controller.state(), SessionState::LoggedIn);
        assert_eq!(controller.context().user, Some(test_user()));
        assert_eq!(controller.context().token.as_deref(), Some("db-tok-abc"));
        assert_eq!(routes.try_recv().unwrap(), Route::Workbench);

        // Resolution converged the other slots.
        assert_eq!(harness.cache.read().unwrap().unwrap(), "db-tok-abc");
        assert_eq!(
            harness.durable.as_ref().unwrap().read().unwrap().unwrap(),
            "db-tok-abc"
        );
        assert_eq!(provider.calls(), vec![Some("db-tok-abc".to_string())]);
    }

    /// Test: no token in a file-backed storage fails fast without a fetch.
    #[tokio::test]
    async fn test_start_file_backed_without_token_logs_out() {
        let harness = Harness::file_backed();
        let provider = ScriptedIdentity::default();

        let (mut controller, mut routes) = harness.controller(&provider, None);
        controller.start().await;

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(controller.context().user.is_none());
        assert_eq!(routes.try_recv().unwrap(), Route::SignIn);
        assert!(provider.calls().is_empty(), "no fetch should be issued");
    }

    /// Test: anonymous sessions are allowed without a durable file.
    #[tokio::test]
    async fn test_start_ephemeral_without_token_fetches_anonymously() {
        let harness = Harness::ephemeral();
        let provider = ScriptedIdentity::default();
        provider.push(Ok(test_user()));

        let (mut controller, _routes) = harness.controller(&provider, None);
        controller.start().await;

        assert_eq!(controller.state(), SessionState::LoggedIn);
        // Anonymous fetch carries no bearer token and stores none.
        assert_eq!(provider.calls(), vec![None]);
        assert!(controller.context().token.is_none());
    }

    /// Test: stand-in provider logs in regardless of the service.
    #[tokio::test]
    async fn test_bypass_auth_logs_in_with_stand_in_record() {
        let harness = Harness::ephemeral();
        let (tx, mut routes) = mpsc::unbounded_channel();
        let mut controller =
            SessionController::new(harness.storage(), StandInIdentity, None, tx);

        controller.start().await;

        assert_eq!(controller.state(), SessionState::LoggedIn);
        assert_eq!(controller.context().user, Some(stand_in_user()));
        assert_eq!(routes.try_recv().unwrap(), Route::Workbench);
    }

    /// Test: a failed fetch routes to LoggedOut but keeps the token.
    #[tokio::test]
    async fn test_failed_fetch_logs_out_and_keeps_token() {
        let harness = Harness::file_backed();
        harness.cache.write("db-tok-bad").unwrap();
        let provider = ScriptedIdentity::default();
        provider.push(Err(anyhow::anyhow!("token revoked")));

        let (mut controller, mut routes) = harness.controller(&provider, None);
        controller.start().await;

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(controller.context().user.is_none());
        assert_eq!(controller.context().token.as_deref(), Some("db-tok-bad"));
        assert_eq!(routes.try_recv().unwrap(), Route::SignIn);
    }

    /// Test: LogOut clears context and persisted slots.
    #[tokio::test]
    async fn test_log_out_clears_everything() {
        let harness = Harness::file_backed();
        harness.session.write("db-tok-abc").unwrap();
        let provider = ScriptedIdentity::default();
        provider.push(Ok(test_user()));

        let (mut controller, mut routes) = harness.controller(&provider, None);
        controller.start().await;
        assert_eq!(controller.state(), SessionState::LoggedIn);
        let _ = routes.try_recv();

        controller.handle(SessionEvent::LogOut).await;

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(controller.context().user.is_none());
        assert!(controller.context().token.is_none());
        assert_eq!(routes.try_recv().unwrap(), Route::SignIn);
        assert!(harness.cache.read().unwrap().is_none());
        assert!(harness.durable.as_ref().unwrap().read().unwrap().is_none());
    }

    /// Test: LogIn with a token re-runs the check using it as primary.
    #[tokio::test]
    async fn test_log_in_uses_provided_token() {
        let harness = Harness::file_backed();
        let provider = ScriptedIdentity::default();
        provider.push(Ok(test_user()));

        let (mut controller, mut routes) = harness.controller(&provider, None);
        controller.start().await; // no token: lands in LoggedOut
        assert_eq!(controller.state(), SessionState::LoggedOut);
        let _ = routes.try_recv();

        controller
            .handle(SessionEvent::LogIn {
                token: Some("abc".to_string()),
            })
            .await;

        assert_eq!(controller.state(), SessionState::LoggedIn);
        assert_eq!(controller.context().token.as_deref(), Some("abc"));
        assert_eq!(provider.calls(), vec![Some("abc".to_string())]);
        assert_eq!(routes.try_recv().unwrap(), Route::Workbench);
        assert_eq!(harness.cache.read().unwrap().unwrap(), "abc");
    }

    /// Test: LogIn without a token re-checks with an empty candidate.
    #[tokio::test]
    async fn test_log_in_without_token_rechecks() {
        let harness = Harness::file_backed();
        let provider = ScriptedIdentity::default();

        let (mut controller, _routes) = harness.controller(&provider, None);
        controller.start().await;
        controller.handle(SessionEvent::LogIn { token: None }).await;

        // Empty token + file-backed storage: straight back to LoggedOut.
        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(provider.calls().is_empty());
    }

    /// Test: dev override wins without touching the persisted slots.
    #[tokio::test]
    async fn test_override_token_wins_without_persistence() {
        let harness = Harness::file_backed();
        let provider = ScriptedIdentity::default();
        provider.push(Ok(test_user()));

        let (mut controller, _routes) =
            harness.controller(&provider, Some("dev-override".to_string()));
        controller.start().await;

        assert_eq!(controller.state(), SessionState::LoggedIn);
        assert_eq!(provider.calls(), vec![Some("dev-override".to_string())]);
        assert!(harness.cache.read().unwrap().is_none());
        assert!(harness.durable.as_ref().unwrap().read().unwrap().is_none());
    }

    /// Test: events not accepted by the current state are ignored.
    #[tokio::test]
    async fn test_unaccepted_events_are_ignored() {
        let harness = Harness::file_backed();
        let provider = ScriptedIdentity::default();

        let (mut controller, _routes) = harness.controller(&provider, None);
        controller.start().await;
        assert_eq!(controller.state(), SessionState::LoggedOut);

        controller.handle(SessionEvent::LogOut).await;
        assert_eq!(controller.state(), SessionState::LoggedOut);
    }

    /// Test: a check outcome from a superseded generation is discarded.
    #[tokio::test]
    async fn test_stale_check_outcome_is_discarded() {
        let harness = Harness::file_backed();
        let provider = ScriptedIdentity::default();

        let (mut controller, _routes) = harness.controller(&provider, None);
        controller.start().await;
        assert_eq!(controller.state(), SessionState::LoggedOut);

        // An outcome tagged with an older generation must not apply.
        let stale_generation = controller.generation;
        controller.generation += 1;
        controller.apply_check(stale_generation, Ok((test_user(), "old".to_string())));

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(controller.context().user.is_none());
    }
}
