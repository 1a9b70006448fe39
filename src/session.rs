//! Authenticated-user accessor

use std::sync::RwLock;

/// Yields the signed-in user, if any
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Session fixed at startup; can be signed out (and back in) at runtime
#[derive(Debug, Default)]
pub struct StaticSession {
    user_id: RwLock<Option<String>>,
}

impl StaticSession {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: RwLock::new(user_id.filter(|u| !u.trim().is_empty())),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = Some(user_id.into());
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = None;
        }
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<String> {
        self.user_id.read().ok().and_then(|guard| guard.clone())
    }
}
