//! User account management on top of the directory store.

use serde::Serialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{require_clinical_role, LocalAuthProvider, RegisterRequest};
use crate::storage::{PatientId, PractitionerId, Role, User, UserId};

/// Client-facing view of a user; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practitioner_id: Option<PractitionerId>,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        UserView {
            id: u.id,
            username: u.username.clone(),
            role: u.role,
            patient_id: u.patient_id,
            practitioner_id: u.practitioner_id,
        }
    }
}

pub fn list_users(auth: &LocalAuthProvider) -> Vec<UserView> {
    auth.store.0.lock().list_users().iter().map(UserView::from).collect()
}

pub fn get_user(auth: &LocalAuthProvider, id: UserId) -> AppResult<UserView> {
    auth.store
        .0
        .lock()
        .find_user_by_id(id)
        .map(|u| UserView::from(&u))
        .ok_or_else(|| AppError::not_found("user_not_found", "User not found"))
}

/// Same validation and record linking as self-registration.
pub fn create_user(auth: &LocalAuthProvider, req: &RegisterRequest) -> AppResult<UserView> {
    auth.register(req).map(|u| UserView::from(&u))
}

/// Clinicians only. Revokes every live session of the removed user.
pub fn delete_user(auth: &LocalAuthProvider, me: &User, id: UserId) -> AppResult<()> {
    require_clinical_role(me)?;
    let removed = auth.store.0.lock().delete_user(id)?;
    let Some(removed) = removed else {
        return Err(AppError::not_found("user_not_found", "User not found"));
    };
    let revoked = auth.sessions.revoke_user(removed.id);
    info!(target: "carelink::users", "user.deleted id={} by={} sessions_revoked={}", removed.id, me.id, revoked);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::identity::{AuthProvider, LoginRequest, SessionRegistry};
    use crate::storage::SharedStore;

    fn setup() -> (LocalAuthProvider, User, User) {
        let auth = LocalAuthProvider::new(SharedStore::in_memory(), Arc::new(SessionRegistry::new()));
        let doc = auth.register(&RegisterRequest { username: "doc".into(), password: "pw".into(), role: "DOCTOR".into() }).unwrap();
        let pat = auth.register(&RegisterRequest { username: "pat".into(), password: "pw".into(), role: "PATIENT".into() }).unwrap();
        (auth, doc, pat)
    }

    #[test]
    fn view_hides_password_hash() {
        let (auth, _doc, pat) = setup();
        let v = serde_json::to_value(get_user(&auth, pat.id).unwrap()).unwrap();
        assert_eq!(v["username"], "pat");
        assert_eq!(v["role"], "PATIENT");
        assert!(v.get("passwordHash").is_none());
        assert!(v.get("practitionerId").is_none());
        assert_eq!(v["patientId"].as_u64(), pat.patient_id);
        assert_eq!(list_users(&auth).len(), 2);
        assert!(get_user(&auth, 42).unwrap_err().is_not_found());
    }

    #[test]
    fn deleting_a_user_revokes_their_sessions() {
        let (auth, doc, pat) = setup();
        let login = auth.login(&LoginRequest { username: "pat".into(), password: "pw".into() }).unwrap();
        delete_user(&auth, &doc, pat.id).unwrap();
        assert_eq!(auth.sessions.resolve(login.token.as_str()), None);
        assert!(auth.current_user(Some(login.token.as_str())).unwrap_err().is_unauthorized());
        assert!(delete_user(&auth, &doc, pat.id).unwrap_err().is_not_found());
    }

    #[test]
    fn patients_cannot_delete_users() {
        let (auth, doc, pat) = setup();
        assert!(delete_user(&auth, &pat, doc.id).unwrap_err().is_forbidden());
        assert!(get_user(&auth, doc.id).is_ok());
    }

    #[test]
    fn stale_session_after_out_of_band_removal() {
        let (auth, _doc, pat) = setup();
        let login = auth.login(&LoginRequest { username: "pat".into(), password: "pw".into() }).unwrap();
        // removed directly in the store: the token still resolves but the user is gone
        auth.store.0.lock().delete_user(pat.id).unwrap();
        assert_eq!(auth.sessions.resolve(login.token.as_str()), Some(pat.id));
        let err = auth.current_user(Some(login.token.as_str())).unwrap_err();
        assert_eq!(err.code_str(), "invalid_session");
    }
}
