//! Authentication and credential collaborators

use async_trait::async_trait;
use std::fmt;
use streamrtc_core::StreamRtcError;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id
    pub uid: String,
    /// Name shown to viewers
    pub display_name: Option<String>,
}

impl Identity {
    /// Identity without a display name
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
        }
    }

    /// Same identity with a display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, or the uid when there is none
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.uid)
    }
}

/// Source of the current user
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Signed-in user, if any
    fn current(&self) -> Option<Identity>;

    /// Sign-in state changes
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
}

/// Authenticator whose user is set by hand
#[derive(Debug)]
pub struct StaticAuthenticator {
    state: watch::Sender<Option<Identity>>,
}

impl StaticAuthenticator {
    /// Nobody signed in
    pub fn signed_out() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Given user signed in
    pub fn signed_in(identity: Identity) -> Self {
        let (state, _) = watch::channel(Some(identity));
        Self { state }
    }

    /// Switch to a signed-in user
    pub fn sign_in(&self, identity: Identity) {
        debug!(uid = %identity.uid, "signed in");
        self.state.send_replace(Some(identity));
    }

    /// Sign the current user out
    pub fn sign_out(&self) {
        debug!("signed out");
        self.state.send_replace(None);
    }
}

impl Authenticator for StaticAuthenticator {
    fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

/// Check run before a host may start streaming
#[async_trait]
pub trait CredentialGate: Send + Sync + fmt::Debug {
    /// Accept or reject the caller, given what they supplied
    async fn check(&self, identity: &Identity, credential: Option<&str>) -> Result<(), StreamRtcError>;
}

/// Gate that lets everyone through
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl CredentialGate for AllowAll {
    async fn check(&self, _identity: &Identity, _credential: Option<&str>) -> Result<(), StreamRtcError> {
        Ok(())
    }
}

/// Gate that requires a shared stream password
#[derive(Clone)]
pub struct PasswordGate {
    password: String,
}

impl PasswordGate {
    /// Gate expecting this password
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl fmt::Debug for PasswordGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordGate").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialGate for PasswordGate {
    async fn check(&self, identity: &Identity, credential: Option<&str>) -> Result<(), StreamRtcError> {
        match credential {
            Some(supplied) if supplied == self.password => Ok(()),
            _ => {
                warn!(uid = %identity.uid, supplied = credential.is_some(), "stream password rejected");
                Err(StreamRtcError::CredentialRejected {
                    identity: identity.uid.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_sees_sign_in_and_out() {
        let auth = StaticAuthenticator::signed_out();
        let mut changes = auth.watch();
        assert!(auth.current().is_none());

        auth.sign_in(Identity::new("U1").with_display_name("Ada"));
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().as_ref().map(|i| i.name().to_string()), Some("Ada".to_string()));

        auth.sign_out();
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
    }

    #[tokio::test]
    async fn test_password_gate() {
        let gate = PasswordGate::new("hunter2");
        let who = Identity::new("U1");

        assert!(gate.check(&who, Some("hunter2")).await.is_ok());
        let err = gate.check(&who, Some("wrong")).await.unwrap_err();
        assert_eq!(err.error_code(), "CREDENTIAL_REJECTED");
        assert!(gate.check(&who, None).await.is_err());
        assert!(!format!("{:?}", gate).contains("hunter2"));

        assert!(AllowAll.check(&who, None).await.is_ok());
    }
}
