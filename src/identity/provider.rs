use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::storage::{NewUser, Role, SharedStore, User};

use super::authorizer::require_authenticated;
use super::password::{hash_password, verify_password};
use super::session::{SessionRegistry, SessionToken};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub token: SessionToken,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: String,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse>;
}

/// Credential checks against the directory store, sessions from the shared registry.
#[derive(Clone)]
pub struct LocalAuthProvider {
    pub store: SharedStore,
    pub sessions: Arc<SessionRegistry>,
}

impl LocalAuthProvider {
    pub fn new(store: SharedStore, sessions: Arc<SessionRegistry>) -> Self { Self { store, sessions } }

    /// Create an account. Patients get a linked patient record, clinicians a linked
    /// practitioner record.
    pub fn register(&self, req: &RegisterRequest) -> AppResult<User> {
        let username = req.username.trim();
        if username.is_empty() || req.password.trim().is_empty() {
            return Err(AppError::invalid("missing_credentials", "username and password are required"));
        }
        let role: Role = req.role.parse()?;
        let password_hash = hash_password(&req.password)?;

        // linked record and account land together or not at all
        let user = self.store.0.lock().transaction(|tx| {
            if tx.username_exists(username) {
                return Err(AppError::conflict("username_taken".to_string(), format!("Username '{}' already exists", username)));
            }
            let (patient_id, practitioner_id) = match role {
                Role::Patient => (Some(tx.insert_patient(username, username)?.id), None),
                Role::Doctor | Role::Staff => (None, Some(tx.insert_practitioner(username)?.id)),
            };
            tx.insert_user(NewUser {
                username: username.to_string(),
                password_hash,
                role,
                patient_id,
                practitioner_id,
            })
        })?;
        info!(target: "carelink::auth", "auth.register user={} id={} role={}", user.username, user.id, user.role);
        Ok(user)
    }

    pub fn current_user(&self, token: Option<&str>) -> AppResult<User> {
        require_authenticated(&self.sessions, &self.store, token)
    }

    /// Never fails; unknown tokens are ignored.
    pub fn logout(&self, token: Option<&str>) {
        if self.sessions.revoke(token) {
            info!(target: "carelink::auth", "auth.logout live_sessions={}", self.sessions.len());
        }
    }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        let username = req.username.trim();
        let user = self.store.0.lock().find_user_by_username(username);
        let Some(user) = user.filter(|u| verify_password(&u.password_hash, &req.password)) else {
            warn!(target: "carelink::auth", "auth.login rejected user={}", username);
            return Err(AppError::unauthorized("invalid_credentials", "Invalid credentials"));
        };
        let token = self.sessions.issue(user.id);
        info!(target: "carelink::auth", "auth.login user={} id={}", user.username, user.id);
        Ok(LoginResponse { token, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> LocalAuthProvider {
        LocalAuthProvider::new(SharedStore::in_memory(), Arc::new(SessionRegistry::new()))
    }

    fn reg(p: &LocalAuthProvider, name: &str, role: &str) -> User {
        p.register(&RegisterRequest { username: name.into(), password: "pw".into(), role: role.into() }).unwrap()
    }

    #[test]
    fn register_links_patient_and_practitioner_records() {
        let p = provider();
        let pat = reg(&p, "anna", "patient");
        assert_eq!(pat.role, Role::Patient);
        let pid = pat.patient_id.expect("patient linked");
        assert_eq!(p.store.0.lock().find_patient_by_id(pid).unwrap().name, "anna");
        assert!(pat.practitioner_id.is_none());

        let doc = reg(&p, "dr", "DOCTOR");
        assert!(doc.patient_id.is_none());
        assert!(doc.practitioner_id.is_some());
        assert_ne!(doc.password_hash, "pw");
    }

    #[test]
    fn register_validation() {
        let p = provider();
        reg(&p, "anna", "PATIENT");
        let dup = p.register(&RegisterRequest { username: "anna".into(), password: "x".into(), role: "STAFF".into() });
        assert_eq!(dup.unwrap_err().http_status(), 409);
        let bad_role = p.register(&RegisterRequest { username: "bo".into(), password: "x".into(), role: "nurse".into() });
        assert!(bad_role.unwrap_err().is_invalid());
        let blank = p.register(&RegisterRequest { username: "  ".into(), password: "x".into(), role: "STAFF".into() });
        assert!(blank.unwrap_err().is_invalid());
        let blank_pw = p.register(&RegisterRequest { username: "cy".into(), password: " \t ".into(), role: "STAFF".into() });
        assert!(blank_pw.unwrap_err().is_invalid());
    }

    #[test]
    fn login_trims_username_like_register() {
        let p = provider();
        let anna = p.register(&RegisterRequest { username: " anna ".into(), password: "pw".into(), role: "PATIENT".into() }).unwrap();
        assert_eq!(anna.username, "anna");
        let resp = p.login(&LoginRequest { username: " anna ".into(), password: "pw".into() }).unwrap();
        assert_eq!(resp.user.id, anna.id);
    }

    #[test]
    fn failed_register_leaves_no_orphan_records() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data");
        let p = LocalAuthProvider::new(SharedStore::open(&root).unwrap(), Arc::new(SessionRegistry::new()));

        // data root replaced by a plain file: the snapshot write fails
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"").unwrap();
        let req = RegisterRequest { username: "anna".into(), password: "pw".into(), role: "PATIENT".into() };
        assert_eq!(p.register(&req).unwrap_err().http_status(), 500);
        assert!(p.store.0.lock().find_patient_by_name("anna").is_none());
        assert!(p.store.0.lock().is_empty());

        std::fs::remove_file(&root).unwrap();
        std::fs::create_dir_all(&root).unwrap();
        let anna = p.register(&req).unwrap();
        assert_eq!((anna.id, anna.patient_id), (1, Some(1)));
    }

    #[test]
    fn login_me_logout_lifecycle() {
        let p = provider();
        let anna = reg(&p, "anna", "PATIENT");
        let resp = p.login(&LoginRequest { username: "anna".into(), password: "pw".into() }).unwrap();
        assert_eq!(resp.user.id, anna.id);
        assert_eq!(p.current_user(Some(resp.token.as_str())).unwrap().id, anna.id);

        p.logout(Some(resp.token.as_str()));
        assert!(p.current_user(Some(resp.token.as_str())).unwrap_err().is_unauthorized());
        // logging out twice or without a token is harmless
        p.logout(Some(resp.token.as_str()));
        p.logout(None);
    }

    #[test]
    fn login_rejects_wrong_password_and_unknown_user() {
        let p = provider();
        reg(&p, "anna", "PATIENT");
        let wrong = p.login(&LoginRequest { username: "anna".into(), password: "nope".into() });
        assert_eq!(wrong.unwrap_err().code_str(), "invalid_credentials");
        let unknown = p.login(&LoginRequest { username: "ghost".into(), password: "pw".into() });
        assert!(unknown.unwrap_err().is_unauthorized());
        assert!(p.sessions.is_empty());
    }
}
