//! crates/dao_reader_core/src/session.rs
//!
//! Session state on top of the identity provider. Guarantees every session
//! has a subject (anonymous by default) and implements the
//! anonymous-to-permanent upgrade without losing the subject id.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::domain::Subject;
use crate::ports::{IdentityError, IdentityProvider, IdentityResult};

/// Owns the active subject and the legal transitions between the
/// no-subject, anonymous, and permanent states. A permanent subject never
/// transitions back to anonymous.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    current: watch::Sender<Option<Subject>>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            current: watch::Sender::new(None),
        }
    }

    /// The active subject, if any.
    pub fn current(&self) -> Option<Subject> {
        self.current.borrow().clone()
    }

    /// Subscribes to subject changes. The receiver holds the current value
    /// immediately and is notified on every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Subject>> {
        self.current.subscribe()
    }

    /// Returns the active subject, creating an anonymous one if the session
    /// has none. Idempotent; safe to call on every application start.
    pub async fn ensure_session(&self) -> IdentityResult<Subject> {
        if let Some(subject) = self.current() {
            return Ok(subject);
        }
        let subject = self.provider.create_anonymous().await?;
        info!(subject = %subject.id, "anonymous session established");
        self.current.send_replace(Some(subject.clone()));
        Ok(subject)
    }

    /// Signs in with an existing permanent credential. The resulting subject
    /// id is whatever id that credential owns; callers must not assume it
    /// matches any prior anonymous id.
    pub async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        let subject = self.provider.sign_in_with_password(email, password).await?;
        info!(subject = %subject.id, "signed in");
        self.current.send_replace(Some(subject.clone()));
        Ok(subject)
    }

    /// Creates a permanent account. While the session is anonymous this
    /// upgrades the existing subject in place instead of creating a parallel
    /// one, so the anonymous subject's data is never orphaned.
    pub async fn sign_up(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        match self.current() {
            Some(subject) if subject.is_anonymous => {
                self.upgrade_to_permanent(email, password).await
            }
            _ => {
                let subject = self.provider.create_account(email, password).await?;
                info!(subject = %subject.id, "account created");
                self.current.send_replace(Some(subject.clone()));
                Ok(subject)
            }
        }
    }

    /// Attaches a credential to the current anonymous subject, preserving its
    /// id. Establishes an anonymous session first if none exists. Fails with
    /// [`IdentityError::NotAnonymous`] when the subject is already permanent.
    pub async fn upgrade_to_permanent(&self, email: &str, password: &str) -> IdentityResult<Subject> {
        let subject = match self.current() {
            Some(subject) => subject,
            None => self.ensure_session().await?,
        };
        if !subject.is_anonymous {
            return Err(IdentityError::NotAnonymous);
        }

        let upgraded = self
            .provider
            .link_credential(subject.id, email, password)
            .await?;
        if upgraded.id != subject.id {
            return Err(IdentityError::Provider(format!(
                "credential link changed the subject id ({} -> {})",
                subject.id, upgraded.id
            )));
        }

        info!(subject = %upgraded.id, "anonymous subject upgraded to permanent");
        self.current.send_replace(Some(upgraded.clone()));
        Ok(upgraded)
    }

    /// Clears the active subject. Deletes nothing.
    pub fn sign_out(&self) {
        if self.current.borrow().is_some() {
            info!("signed out");
        }
        self.current.send_replace(None);
    }
}
