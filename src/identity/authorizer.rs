//! Role-based access policy: who is authenticated, who may message whom, and who may
//! read or write a patient's clinical data. Every check is a pure function of the
//! current session registry and directory contents.

use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::storage::{PatientId, Role, User, UserDirectory, UserId};

use super::session::SessionRegistry;

/// A user the caller's role permits addressing in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl From<&User> for Contact {
    fn from(u: &User) -> Self {
        Contact { id: u.id, display_name: u.username.clone(), role: u.role }
    }
}

/// Resolve `token` to a live user. Missing, unknown and stale sessions (the user was
/// removed after the token was issued) are all `Unauthorized`.
pub fn require_authenticated<D: UserDirectory + ?Sized>(
    sessions: &SessionRegistry,
    directory: &D,
    token: Option<&str>,
) -> AppResult<User> {
    let Some(uid) = sessions.resolve(token) else {
        return Err(AppError::unauthorized("not_logged_in", "Not logged in"));
    };
    directory
        .find_user_by_id(uid)
        .ok_or_else(|| AppError::unauthorized("invalid_session", "Invalid session"))
}

pub fn require_clinical_role(user: &User) -> AppResult<()> {
    if user.role.is_clinical() { return Ok(()); }
    Err(AppError::forbidden("clinical_role_required", "Only doctor/staff may do this"))
}

pub fn require_patient_role(user: &User) -> AppResult<()> {
    if user.role == Role::Patient { return Ok(()); }
    Err(AppError::forbidden("patient_role_required", "Only patients can use this"))
}

/// Patients see every doctor then every staff member; clinicians see every patient.
/// The caller never appears in its own list.
pub fn list_contacts<D: UserDirectory + ?Sized>(directory: &D, me: &User) -> Vec<Contact> {
    let candidates = match me.role {
        Role::Patient => {
            let mut v = directory.find_users_by_role(Role::Doctor);
            v.extend(directory.find_users_by_role(Role::Staff));
            v
        }
        Role::Doctor | Role::Staff => directory.find_users_by_role(Role::Patient),
    };
    candidates.iter().filter(|u| u.id != me.id).map(Contact::from).collect()
}

/// Any two distinct existing users may view their shared thread; no role pairing is
/// imposed here.
pub fn can_view_thread(me: &User, other: &User) -> bool {
    me.id != other.id
}

pub fn can_view_patient_record(me: &User, patient_id: PatientId) -> bool {
    if me.role.is_clinical() { return true; }
    me.role == Role::Patient && me.patient_id == Some(patient_id)
}
