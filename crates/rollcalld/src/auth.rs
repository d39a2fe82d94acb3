//! Credential check and opaque bearer tokens.
//!
//! One operator account from configuration. Tokens are random, held in
//! memory only, and expire after the configured TTL.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

struct Session {
    user: String,
    expires_at: DateTime<Utc>,
}

pub struct Auth {
    user: String,
    /// SHA-256 of the configured password; `None` disables login.
    password_digest: Option<[u8; 32]>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Auth {
    pub fn new(user: &str, password: Option<&str>, ttl_secs: u64) -> Self {
        Self {
            user: user.to_string(),
            password_digest: password.map(digest),
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn login_enabled(&self) -> bool {
        self.password_digest.is_some()
    }

    /// Check credentials and issue a token with its expiry.
    pub fn login(&self, user: &str, password: &str) -> Option<(String, DateTime<Utc>)> {
        let expected = self.password_digest.as_ref()?;
        let user_ok = constant_time_eq(&digest(user), &digest(&self.user));
        let password_ok = constant_time_eq(&digest(password), expected);
        if !(user_ok && password_ok) {
            tracing::warn!(user, "login rejected");
            return None;
        }

        let token = new_token();
        let expires_at = Utc::now() + self.ttl;
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.expires_at > Utc::now());
        sessions.insert(
            token.clone(),
            Session {
                user: user.to_string(),
                expires_at,
            },
        );
        tracing::info!(user, %expires_at, "token issued");
        Some((token, expires_at))
    }

    /// The user a live token belongs to.
    pub fn validate(&self, token: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(token) {
            Some(s) if s.expires_at > Utc::now() => Some(s.user.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token).is_some()
    }
}

fn digest(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(s.as_bytes()));
    out
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_issues_valid_token() {
        let auth = Auth::new("admin", Some("hunter2"), 60);
        let (token, expires_at) = auth.login("admin", "hunter2").unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(expires_at > Utc::now());
        assert_eq!(auth.validate(&token).as_deref(), Some("admin"));
    }

    #[test]
    fn test_bad_credentials_rejected() {
        let auth = Auth::new("admin", Some("hunter2"), 60);
        assert!(auth.login("admin", "wrong").is_none());
        assert!(auth.login("root", "hunter2").is_none());
    }

    #[test]
    fn test_login_disabled_without_password() {
        let auth = Auth::new("admin", None, 60);
        assert!(!auth.login_enabled());
        assert!(auth.login("admin", "").is_none());
    }

    #[test]
    fn test_revoke_and_expiry() {
        let auth = Auth::new("admin", Some("pw"), 60);
        let (token, _) = auth.login("admin", "pw").unwrap();
        assert!(auth.revoke(&token));
        assert!(auth.validate(&token).is_none());
        assert!(!auth.revoke(&token));

        let expired = Auth::new("admin", Some("pw"), 0);
        let (token, _) = expired.login("admin", "pw").unwrap();
        assert!(expired.validate(&token).is_none());
    }

    #[test]
    fn test_tokens_are_unique_lowercase_hex() {
        let token = new_token();
        assert_ne!(token, new_token());
        assert_eq!(hex::decode(&token).unwrap().len(), TOKEN_BYTES);
        assert!(token.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
