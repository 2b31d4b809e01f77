//! Authentication backends.

use std::collections::HashMap;

use async_trait::async_trait;

use kubetun_chain::Credentials;

/// A credential check capability.
///
/// Handlers that carry no authenticator at all permit every client; that is
/// the deliberate default for the trusted-network case, where the tunnel
/// endpoint is only reachable from inside the cluster.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether `user`/`pass` is acceptable.
    async fn check(&self, user: &str, pass: &str) -> bool;
}

/// In-memory authenticator mapping usernames to passwords exactly.
///
/// A missing user or a mismatched password both fail; there is no fuzziness
/// and no hashing, mirroring RFC 1929's plaintext sub-negotiation.
#[derive(Debug, Clone, Default)]
pub struct LocalAuthenticator {
    users: HashMap<String, String>,
}

impl LocalAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from username/password pairs.
    pub fn from_credentials<'a, I>(users: I) -> Self
    where
        I: IntoIterator<Item = &'a Credentials>,
    {
        let users = users
            .into_iter()
            .map(|c| (c.username.clone(), c.password.clone()))
            .collect();
        Self { users }
    }

    pub fn insert(&mut self, user: impl Into<String>, pass: impl Into<String>) {
        self.users.insert(user.into(), pass.into());
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    async fn check(&self, user: &str, pass: &str) -> bool {
        self.users.get(user).is_some_and(|expected| expected == pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            username: user.into(),
            password: pass.into(),
        }
    }

    #[tokio::test]
    async fn exact_match_only() {
        let users = [creds("alice", "secret"), creds("bob", "hunter2")];
        let auth = LocalAuthenticator::from_credentials(&users);

        assert!(auth.check("alice", "secret").await);
        assert!(auth.check("bob", "hunter2").await);
        assert!(!auth.check("alice", "wrong").await);
        assert!(!auth.check("alice", "").await);
        assert!(!auth.check("mallory", "secret").await);
    }

    #[tokio::test]
    async fn empty_authenticator_rejects_everyone() {
        let auth = LocalAuthenticator::new();
        assert!(auth.is_empty());
        assert!(!auth.check("anyone", "anything").await);
    }
}
