//! # Session Gate
//!
//! Owns the run's browsing session. Opens a root context, passes the age
//! verification interstitial (detected by structural marker, confirmed
//! once), and hands the session out for reuse. When a fetch finds the gate
//! back, workers call [`SessionGate::reacquire`]; concurrent callers that
//! saw the same expired generation share one re-acquisition.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::errors::GateError;
use super::page::{GateState, PageMarkup};
use super::wait::{WaitError, WaitPolicy, wait_for};
use crate::domain::session::Session;
use crate::infrastructure::substrate::{BrowserSubstrate, NavTarget};

#[derive(Debug, Clone, Copy)]
pub struct GatePolicy {
    /// Checks of the interstitial before giving up
    pub max_attempts: u32,
    /// Bound for each check to see either the gate or the menu
    pub wait: WaitPolicy,
    pub session_max_age: Duration,
}

pub type SharedSession<S> = Arc<Session<<S as BrowserSubstrate>::Context>>;

pub struct SessionGate<S: BrowserSubstrate> {
    substrate: Arc<S>,
    markup: Arc<PageMarkup>,
    entry_url: String,
    policy: GatePolicy,
    current: RwLock<Option<SharedSession<S>>>,
    acquire_lock: Mutex<()>,
    generation: AtomicU64,
    reacquisitions: AtomicU32,
}

impl<S: BrowserSubstrate> SessionGate<S> {
    pub fn new(substrate: Arc<S>, markup: Arc<PageMarkup>, entry_url: impl Into<String>, policy: GatePolicy) -> Self {
        Self {
            substrate,
            markup,
            entry_url: entry_url.into(),
            policy,
            current: RwLock::new(None),
            acquire_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            reacquisitions: AtomicU32::new(0),
        }
    }

    /// Current session, opening one on first use or when it went stale
    pub async fn acquire(&self) -> Result<SharedSession<S>, GateError> {
        if let Some(session) = self.fresh_session().await {
            return Ok(session);
        }

        let _guard = self.acquire_lock.lock().await;
        if let Some(session) = self.fresh_session().await {
            return Ok(session);
        }

        let replacing = self.current.read().await.is_some();
        if replacing {
            info!("🔄 Session reached its max age; re-acquiring");
        }
        let session = self.open_session().await?;
        if replacing {
            self.reacquisitions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(session)
    }

    /// Replaces a session that `stale_generation` found expired. If another
    /// worker already replaced it, the newer session is returned as is.
    pub async fn reacquire(&self, stale_generation: u64) -> Result<SharedSession<S>, GateError> {
        let _guard = self.acquire_lock.lock().await;
        if let Some(session) = self.current.read().await.as_ref() {
            if session.generation() > stale_generation && !session.is_stale() {
                debug!("Session already re-acquired (generation {})", session.generation());
                return Ok(Arc::clone(session));
            }
        }

        info!("🔄 Age gate reappeared; re-acquiring session (generation {} expired)", stale_generation);
        let session = self.open_session().await?;
        self.reacquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    /// Sessions opened after the first one
    pub fn reacquisitions(&self) -> u32 {
        self.reacquisitions.load(Ordering::SeqCst)
    }

    pub fn entry_url(&self) -> &str {
        &self.entry_url
    }

    async fn fresh_session(&self) -> Option<SharedSession<S>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|session| !session.is_stale())
            .map(Arc::clone)
    }

    async fn open_session(&self) -> Result<SharedSession<S>, GateError> {
        let ctx = self.substrate.open_context(None).await?;
        self.substrate
            .navigate(&ctx, NavTarget::Url(self.entry_url.clone()))
            .await?;
        self.pass_gate(&ctx).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session::new(ctx, generation, self.policy.session_max_age));
        *self.current.write().await = Some(Arc::clone(&session));
        info!("✅ Session ready (generation {})", generation);
        Ok(session)
    }

    async fn pass_gate(&self, ctx: &S::Context) -> Result<(), GateError> {
        let markup = &*self.markup;
        let mut confirmed = false;

        for attempt in 1..=self.policy.max_attempts {
            let state = wait_for(&*self.substrate, ctx, self.policy.wait, |html: &str| markup.gate_state(html)).await;
            match state {
                Ok(GateState::Cleared) => {
                    if confirmed {
                        info!("🔓 Age gate cleared");
                    }
                    return Ok(());
                }
                Ok(GateState::Present) if !confirmed => {
                    debug!("Age gate detected; confirming");
                    self.substrate
                        .navigate(ctx, NavTarget::Activate(markup.gate_confirm_selector().to_string()))
                        .await?;
                    confirmed = true;
                }
                Ok(GateState::Present) => {
                    warn!("⚠️ Age gate still present (check {}/{})", attempt, self.policy.max_attempts);
                    tokio::time::sleep(self.policy.wait.poll_interval).await;
                }
                Err(WaitError::TimedOut { waited, .. }) => {
                    warn!(
                        "⏳ Entry page unrecognized after {:?} (check {}/{})",
                        waited, attempt, self.policy.max_attempts
                    );
                }
                Err(WaitError::Substrate(source)) => return Err(source.into()),
            }
        }

        Err(GateError::Blocked {
            attempts: self.policy.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::SelectorConfig;
    use crate::test_utils::{GateBehavior, ScriptedSubstrate, TEST_BASE_URL};

    fn entry_url() -> String {
        format!("{TEST_BASE_URL}/green-leaf")
    }

    fn gate(substrate: ScriptedSubstrate, max_age: Duration) -> (Arc<ScriptedSubstrate>, SessionGate<ScriptedSubstrate>) {
        let substrate = Arc::new(substrate);
        let markup = Arc::new(PageMarkup::compile(&SelectorConfig::default()).unwrap());
        let policy = GatePolicy {
            max_attempts: 3,
            wait: WaitPolicy::new(Duration::from_millis(30), Duration::from_millis(5)),
            session_max_age: max_age,
        };
        let gate = SessionGate::new(Arc::clone(&substrate), markup, entry_url(), policy);
        (substrate, gate)
    }

    #[tokio::test]
    async fn confirms_gate_exactly_once_and_reuses_session() {
        let (substrate, gate) = gate(ScriptedSubstrate::new(entry_url()), Duration::from_secs(60));

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();

        assert!(first.gate_passed());
        assert_eq!(first.generation(), second.generation());
        assert_eq!(substrate.confirm_clicks(), 1);
        assert_eq!(substrate.sessions_opened(), 1);
        assert_eq!(gate.reacquisitions(), 0);
    }

    #[tokio::test]
    async fn blocked_gate_fails_after_bounded_attempts() {
        let (substrate, gate) = gate(
            ScriptedSubstrate::new(entry_url()).with_gate(GateBehavior::Blocked),
            Duration::from_secs(60),
        );

        let error = gate.acquire().await.unwrap_err();

        assert!(matches!(error, GateError::Blocked { attempts: 3 }));
        assert_eq!(substrate.confirm_clicks(), 1);
    }

    #[tokio::test]
    async fn site_without_gate_needs_no_confirmation() {
        let (substrate, gate) = gate(
            ScriptedSubstrate::new(entry_url()).with_gate(GateBehavior::Absent),
            Duration::from_secs(60),
        );
        assert!(gate.acquire().await.is_ok());
        assert_eq!(substrate.confirm_clicks(), 0);
    }

    #[tokio::test]
    async fn concurrent_reacquire_opens_one_session() {
        let (substrate, gate) = gate(ScriptedSubstrate::new(entry_url()), Duration::from_secs(60));
        let gate = Arc::new(gate);
        let stale = gate.acquire().await.unwrap().generation();

        let (a, b) = tokio::join!(gate.reacquire(stale), gate.reacquire(stale));

        assert_eq!(a.unwrap().generation(), b.unwrap().generation());
        assert_eq!(substrate.sessions_opened(), 2);
        assert_eq!(gate.reacquisitions(), 1);
    }

    #[tokio::test]
    async fn stale_session_is_replaced_on_acquire() {
        let (substrate, gate) = gate(ScriptedSubstrate::new(entry_url()), Duration::ZERO);
        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert!(second.generation() > first.generation());
        assert_eq!(substrate.sessions_opened(), 2);
        assert_eq!(gate.reacquisitions(), 1);
    }
}
