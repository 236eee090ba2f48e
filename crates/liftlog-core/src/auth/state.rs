use tokio::sync::watch;

use crate::models::User;

/// Point-in-time view of the session.
///
/// `is_loading` is true until the stored session has been restored and
/// whenever a session-affecting operation is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pending: u32,
    restored: bool,
}

impl SessionSnapshot {
    pub fn is_loading(&self) -> bool {
        self.pending > 0 || !self.restored
    }

    /// Authenticated iff a user with an identifier is present
    pub fn is_authenticated(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_authenticated)
    }

    pub(crate) fn mark_restored(&mut self) {
        self.restored = true;
    }
}

/// Holds the loading flag up for as long as it lives.
pub(crate) struct LoadingGuard<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
}

impl<'a> LoadingGuard<'a> {
    pub fn begin(state: &'a watch::Sender<SessionSnapshot>) -> Self {
        state.send_modify(|s| s.pending += 1);
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state
            .send_modify(|s| s.pending = s.pending.saturating_sub(1));
    }
}
