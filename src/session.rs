use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::data::SessionService;
use crate::storage::{self, SavedSession};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in to {0}")]
    NotLoggedIn(String),
}

/// Keeps the board session cookie alive across runs, one per server.
pub struct Manager {
    store: Arc<storage::Store>,
    server: String,
    service: Arc<dyn SessionService>,
    active: RwLock<Option<String>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>, server: &str, service: Arc<dyn SessionService>) -> Self {
        Self {
            store,
            server: server.to_string(),
            service,
            active: RwLock::new(None),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn active_user(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Puts a remembered token back into the client. Returns the user it
    /// belongs to.
    pub fn restore(&self) -> Result<Option<String>> {
        let Some(saved) = self.store.get_session(&self.server)? else {
            return Ok(None);
        };
        self.service.restore(&saved.token);
        info!(server = %self.server, user = %saved.username, "restored session");
        *self.active.write() = Some(saved.username.clone());
        Ok(Some(saved.username))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        let token = self.service.login(username, password)?;
        match token {
            Some(token) => {
                let now = Utc::now();
                self.store
                    .save_session(SavedSession {
                        server: self.server.clone(),
                        username: username.to_string(),
                        token,
                        created_at: now,
                        updated_at: now,
                    })
                    .context("remember session")?;
            }
            None => warn!(server = %self.server, "login succeeded without a session cookie"),
        }
        info!(server = %self.server, user = username, "logged in");
        *self.active.write() = Some(username.to_string());
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        if self.active.read().is_none() {
            return Err(SessionError::NotLoggedIn(self.server.clone()).into());
        }
        self.service.logout()?;
        self.store
            .delete_session(&self.server)
            .context("forget session")?;
        info!(server = %self.server, "logged out");
        *self.active.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Call, MockBoard};
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> Arc<storage::Store> {
        Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.join("state.db")),
            })
            .unwrap(),
        )
    }

    #[test]
    fn login_is_remembered_for_the_next_run() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let board = Arc::new(MockBoard::default());

        let first = Manager::new(store.clone(), "http://board.test/", board.clone());
        first.login("admin", "secret").unwrap();
        assert_eq!(first.active_user().as_deref(), Some("admin"));

        let second = Manager::new(store, "http://board.test/", board.clone());
        assert_eq!(second.restore().unwrap().as_deref(), Some("admin"));
        assert!(board
            .calls()
            .contains(&Call::Restore("mock-session-admin".into())));
    }

    #[test]
    fn failed_login_stores_nothing() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let board = Arc::new(MockBoard::default());
        board.fail_next(401, "");

        let manager = Manager::new(store.clone(), "http://board.test/", board);
        assert!(manager.login("admin", "wrong").is_err());
        assert!(manager.active_user().is_none());
        assert!(store.get_session("http://board.test/").unwrap().is_none());
    }

    #[test]
    fn logout_forgets_the_session() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let board = Arc::new(MockBoard::default());
        let manager = Manager::new(store.clone(), "http://board.test/", board.clone());
        manager.login("admin", "secret").unwrap();
        manager.logout().unwrap();
        assert!(manager.active_user().is_none());
        assert!(store.get_session("http://board.test/").unwrap().is_none());
        assert!(manager.logout().is_err());
    }

    #[test]
    fn failed_logout_keeps_the_session() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let board = Arc::new(MockBoard::default());
        let manager = Manager::new(store.clone(), "http://board.test/", board.clone());
        manager.login("admin", "secret").unwrap();
        board.fail_next(500, "");
        assert!(manager.logout().is_err());
        assert_eq!(manager.active_user().as_deref(), Some("admin"));
        assert!(store.get_session("http://board.test/").unwrap().is_some());
    }
}
