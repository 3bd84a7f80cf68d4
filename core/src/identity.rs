use tokio::sync::watch;

/// Supplies the signed-in principal, if any, and a stream of identity changes.
///
/// Credential checks live outside this crate; implementations only report the outcome.
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Option<String>;
    fn subscribe(&self) -> watch::Receiver<Option<String>>;
}

/// In-process identity backed by a watch channel.
pub struct Session {
    principal: watch::Sender<Option<String>>,
}

impl Session {
    #[must_use]
    pub fn new(principal: Option<String>) -> Self {
        let (principal, _) = watch::channel(principal);
        Self { principal }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, principal: &str) {
        self.principal.send_replace(Some(principal.to_string()));
    }

    pub fn sign_out(&self) {
        self.principal.send_replace(None);
    }
}

impl IdentityProvider for Session {
    fn current_principal(&self) -> Option<String> {
        self.principal.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.principal.subscribe()
    }
}
