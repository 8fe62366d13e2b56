use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::storage::UserId;
use crate::tprintln;

pub type SessionToken = String;

/// Token registry: opaque bearer tokens mapped to the user they authenticate.
///
/// One registry is built at start-up and shared by handle with every request handler.
/// Sessions live until revoked or until the process exits; there is no expiry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionToken, UserId>>,
}

fn gen_token() -> SessionToken {
    // 122 random bits, hyphenated UUIDv4 text
    Uuid::new_v4().to_string()
}

impl SessionRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn issue(&self, user_id: UserId) -> SessionToken {
        let mut map = self.sessions.write();
        loop {
            let token = gen_token();
            if let Entry::Vacant(slot) = map.entry(token.clone()) {
                slot.insert(user_id);
                tprintln!("session.issue user={} live={}", user_id, map.len());
                return token;
            }
        }
    }

    /// User id behind `token`, or `None` for a missing, empty or unknown token.
    pub fn resolve<'a>(&self, token: impl Into<Option<&'a str>>) -> Option<UserId> {
        let token = token.into().filter(|t| !t.is_empty())?;
        self.sessions.read().get(token).copied()
    }

    /// Drop the mapping for `token`. Unknown or empty tokens are ignored; the return
    /// value only reports whether something was removed.
    pub fn revoke<'a>(&self, token: impl Into<Option<&'a str>>) -> bool {
        let Some(token) = token.into().filter(|t| !t.is_empty()) else { return false; };
        let removed = self.sessions.write().remove(token);
        if let Some(uid) = removed {
            tprintln!("session.revoke user={}", uid);
        }
        removed.is_some()
    }

    /// Revoke every live session belonging to `user_id`.
    pub fn revoke_user(&self, user_id: UserId) -> usize {
        let mut map = self.sessions.write();
        let before = map.len();
        map.retain(|_, uid| *uid != user_id);
        let count = before - map.len();
        tprintln!("session.revoke_user user={} count={}", user_id, count);
        count
    }

    pub fn len(&self) -> usize { self.sessions.read().len() }

    pub fn is_empty(&self) -> bool { self.sessions.read().is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn issued_token_resolves_to_user() {
        let reg = SessionRegistry::new();
        let t = reg.issue(10);
        assert_eq!(reg.resolve(t.as_str()), Some(10));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn revoked_token_no_longer_resolves() {
        let reg = SessionRegistry::new();
        let t = reg.issue(10);
        assert!(reg.revoke(t.as_str()));
        assert_eq!(reg.resolve(t.as_str()), None);
        // second revoke is a no-op
        assert!(!reg.revoke(t.as_str()));
    }

    #[test]
    fn missing_empty_and_unknown_tokens_resolve_to_none() {
        let reg = SessionRegistry::new();
        reg.issue(1);
        assert_eq!(reg.resolve(None::<&str>), None);
        assert_eq!(reg.resolve(""), None);
        assert_eq!(reg.resolve("not-a-token"), None);
        assert!(!reg.revoke(None::<&str>));
        assert!(!reg.revoke(""));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn tokens_are_distinct_per_issue() {
        let reg = SessionRegistry::new();
        let tokens: HashSet<_> = (0..200).map(|_| reg.issue(7)).collect();
        assert_eq!(tokens.len(), 200);
        assert!(tokens.iter().all(|t| reg.resolve(t.as_str()) == Some(7)));
    }

    #[test]
    fn revoke_user_drops_only_that_users_sessions() {
        let reg = SessionRegistry::new();
        let a1 = reg.issue(1);
        let a2 = reg.issue(1);
        let b = reg.issue(2);
        assert_eq!(reg.revoke_user(1), 2);
        assert_eq!(reg.resolve(a1.as_str()), None);
        assert_eq!(reg.resolve(a2.as_str()), None);
        assert_eq!(reg.resolve(b.as_str()), Some(2));
    }

    #[test]
    fn concurrent_issue_resolve_revoke() {
        let reg = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8u64)
            .map(|uid| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let t = reg.issue(uid);
                        assert_eq!(reg.resolve(t.as_str()), Some(uid));
                        assert!(reg.revoke(t.as_str()));
                        assert_eq!(reg.resolve(t.as_str()), None);
                    }
                })
            })
            .collect();
        for h in handles { h.join().unwrap(); }
        assert!(reg.is_empty());
    }
}
