use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AuthError, FetchError};
use crate::pool::{Credential, CredentialId};
use crate::timing::{DelayRange, sleep_or_cancel};
use crate::types::ContentItem;

/// Produces authenticated sessions from credentials.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Send + Sync;

    async fn authenticate(&self, credential: &Credential) -> Result<Self::Session, AuthError>;

    /// Release a session. Failures are logged by the caller and otherwise ignored.
    async fn close(&self, session: Self::Session) -> Result<()>;
}

/// Reads the most recent posts of a watched account through a session.
#[async_trait]
pub trait PageFetcher<S>: Send + Sync {
    async fn fetch_recent(
        &self,
        session: &S,
        target: &str,
        limit: usize,
    ) -> Result<Vec<ContentItem>, FetchError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("session setup cancelled by shutdown")]
    Cancelled,
}

/// Owns the single active session and the credential it is bound to.
pub struct SessionManager<P: SessionProvider> {
    provider: P,
    active: Option<(CredentialId, P::Session)>,
    reconnect_delay: DelayRange,
    /// Set after a teardown; the next session attempt waits out `reconnect_delay` first.
    reconnect_pending: bool,
}

impl<P: SessionProvider> SessionManager<P> {
    pub fn new(provider: P, reconnect_delay: DelayRange) -> Self {
        Self {
            provider,
            active: None,
            reconnect_delay,
            reconnect_pending: false,
        }
    }

    pub fn bound_to(&self) -> Option<CredentialId> {
        self.active.as_ref().map(|(id, _)| *id)
    }

    /// Return the session for `id`, creating one if none is bound or a
    /// different credential holds the current one.
    ///
    /// Authentication failures are returned as-is; recording them against the
    /// credential is the caller's decision.
    pub async fn ensure_session(
        &mut self,
        id: CredentialId,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<&P::Session, SessionError> {
        let session = match self.active.take() {
            Some((bound, session)) if bound == id => session,
            Some((bound, session)) => {
                debug!(?bound, "Switching credential, tearing down session");
                self.teardown(session, cancel).await;
                self.create(credential, cancel).await?
            }
            None => self.create(credential, cancel).await?,
        };
        let (_, session) = self.active.insert((id, session));
        Ok(session)
    }

    /// Drop the active session, if any. The next `ensure_session` rebuilds it.
    pub async fn invalidate(&mut self, cancel: &CancellationToken) {
        if let Some((bound, session)) = self.active.take() {
            info!(?bound, "Invalidating session");
            self.teardown(session, cancel).await;
        }
    }

    /// Best-effort close, aborted by shutdown.
    async fn teardown(&mut self, session: P::Session, cancel: &CancellationToken) {
        self.reconnect_pending = true;
        tokio::select! {
            _ = cancel.cancelled() => warn!("Session teardown aborted by shutdown"),
            res = self.provider.close(session) => {
                if let Err(e) = res {
                    warn!("Session teardown failed (ignored): {e}");
                }
            }
        }
    }

    async fn create(
        &mut self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<P::Session, SessionError> {
        if self.reconnect_pending {
            let delay = self.reconnect_delay.sample();
            debug!("Waiting {delay:?} before reconnecting");
            if !sleep_or_cancel(delay, cancel).await {
                return Err(SessionError::Cancelled);
            }
            self.reconnect_pending = false;
        }
        info!(credential = %credential.handle, "Authenticating");
        tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            res = self.provider.authenticate(credential) => {
                let session = res?;
                info!(credential = %credential.handle, "Session established");
                Ok(session)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        opened: Vec<String>,
        closed: Vec<u32>,
    }

    struct FakeProvider {
        log: Arc<Mutex<Log>>,
        reject: Vec<String>,
        fail_close: bool,
    }

    #[async_trait]
    impl SessionProvider for FakeProvider {
        type Session = u32;

        async fn authenticate(&self, credential: &Credential) -> Result<u32, AuthError> {
            if self.reject.contains(&credential.handle) {
                return Err(AuthError::Rejected("bad password".into()));
            }
            let mut log = self.log.lock().unwrap();
            log.opened.push(credential.handle.clone());
            Ok(log.opened.len() as u32)
        }

        async fn close(&self, session: u32) -> Result<()> {
            self.log.lock().unwrap().closed.push(session);
            if self.fail_close {
                anyhow::bail!("browser already gone");
            }
            Ok(())
        }
    }

    fn manager(reject: &[&str], fail_close: bool) -> (SessionManager<FakeProvider>, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let provider = FakeProvider {
            log: Arc::clone(&log),
            reject: reject.iter().map(|s| s.to_string()).collect(),
            fail_close,
        };
        (SessionManager::new(provider, DelayRange::ZERO), log)
    }

    fn cred(handle: &str) -> Credential {
        Credential::new(format!("{handle}@mail"), "pw", handle)
    }

    #[tokio::test]
    async fn reuses_session_for_same_credential() {
        let (mut mgr, log) = manager(&[], false);
        let cancel = CancellationToken::new();
        let a = cred("a");
        let first = *mgr.ensure_session(CredentialId(0), &a, &cancel).await.unwrap();
        let second = *mgr.ensure_session(CredentialId(0), &a, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(log.lock().unwrap().opened.len(), 1);
    }

    #[tokio::test]
    async fn switching_credential_tears_down_old_session() {
        let (mut mgr, log) = manager(&[], true);
        let cancel = CancellationToken::new();
        let s1 = *mgr.ensure_session(CredentialId(0), &cred("a"), &cancel).await.unwrap();
        let s2 = *mgr.ensure_session(CredentialId(1), &cred("b"), &cancel).await.unwrap();
        assert_ne!(s1, s2);
        let log = log.lock().unwrap();
        // Close error was swallowed
        assert_eq!(log.closed, vec![s1]);
        assert_eq!(mgr.bound_to(), Some(CredentialId(1)));
    }

    #[tokio::test]
    async fn auth_failure_leaves_nothing_bound() {
        let (mut mgr, _log) = manager(&["bad"], false);
        let cancel = CancellationToken::new();
        mgr.ensure_session(CredentialId(0), &cred("a"), &cancel).await.unwrap();
        let err = mgr.ensure_session(CredentialId(1), &cred("bad"), &cancel).await;
        assert!(matches!(err, Err(SessionError::Auth(AuthError::Rejected(_)))));
        assert_eq!(mgr.bound_to(), None);
    }

    #[tokio::test]
    async fn invalidate_forces_new_session() {
        let (mut mgr, log) = manager(&[], false);
        let cancel = CancellationToken::new();
        let a = cred("a");
        mgr.ensure_session(CredentialId(0), &a, &cancel).await.unwrap();
        mgr.invalidate(&cancel).await;
        assert_eq!(mgr.bound_to(), None);
        mgr.ensure_session(CredentialId(0), &a, &cancel).await.unwrap();
        assert_eq!(log.lock().unwrap().opened.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_reconnect_delay_aborts() {
        let log = Arc::new(Mutex::new(Log::default()));
        let provider = FakeProvider {
            log: Arc::clone(&log),
            reject: Vec::new(),
            fail_close: false,
        };
        let mut mgr = SessionManager::new(provider, DelayRange::secs(60, 60));
        let cancel = CancellationToken::new();
        mgr.ensure_session(CredentialId(0), &cred("a"), &cancel).await.unwrap();
        mgr.invalidate(&cancel).await;
        cancel.cancel();
        let res = mgr.ensure_session(CredentialId(0), &cred("a"), &cancel).await;
        assert!(matches!(res, Err(SessionError::Cancelled)));
        assert_eq!(log.lock().unwrap().opened.len(), 1);
    }
}
