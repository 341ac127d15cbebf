use tokio::sync::RwLock;

use crate::types::{Contact, CredentialBundle};

/// Shared session state: credentials plus the logged-in account.
///
/// Written by the login handshake, init and sync batches; read by every
/// outbound request.
#[derive(Debug, Default)]
pub struct SessionState {
    credentials: RwLock<CredentialBundle>,
    me: RwLock<Contact>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(bundle: CredentialBundle) -> Self {
        Self {
            credentials: RwLock::new(bundle),
            me: RwLock::new(Contact::default()),
        }
    }

    pub async fn credentials(&self) -> CredentialBundle {
        self.credentials.read().await.clone()
    }

    /// Replace the bundle wholesale.
    pub async fn replace_credentials(&self, bundle: CredentialBundle) {
        *self.credentials.write().await = bundle;
    }

    /// Mutate the bundle under the write lock.
    pub async fn update_credentials<F>(&self, update: F)
    where
        F: FnOnce(&mut CredentialBundle),
    {
        let mut credentials = self.credentials.write().await;
        update(&mut credentials);
    }

    pub async fn host(&self) -> String {
        self.credentials.read().await.host.clone()
    }

    pub async fn absorb_cookies(&self, cookies: &[(String, String)]) {
        if cookies.is_empty() {
            return;
        }
        self.credentials.write().await.absorb_cookies(cookies);
    }

    pub async fn me(&self) -> Contact {
        self.me.read().await.clone()
    }

    pub async fn set_me(&self, me: Contact) {
        *self.me.write().await = me;
    }
}
