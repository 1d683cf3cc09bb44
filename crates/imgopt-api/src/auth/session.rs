use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Live admin sessions keyed by their token.
///
/// Tokens are 256 random bits, hex encoded. Expired sessions are dropped lazily,
/// on lookup and whenever a new session is created.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self) -> String {
        let bytes: [u8; 32] = rand::random();
        let token = hex::encode(bytes);
        let now = Instant::now();

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, expires_at| *expires_at > now);
        sessions.insert(token.clone(), now + self.ttl);
        tracing::debug!(active_sessions = sessions.len(), "Admin session created");
        token
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(token) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    /// Remove a session; returns whether it existed.
    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.lock().await.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_created_session_is_valid_until_revoked() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create().await;
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        assert!(store.is_valid(&token).await);
        assert!(store.revoke(&token).await);
        assert!(!store.is_valid(&token).await);
        assert!(!store.revoke(&token).await);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.create().await;
        assert!(!store.is_valid(&token).await);
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create().await;
        let b = store.create().await;
        assert_ne!(a, b);
        assert!(!store.is_valid("not-a-session").await);
    }
}
