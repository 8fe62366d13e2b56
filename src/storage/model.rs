//! Entity types held by the directory store.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub type UserId = u64;
pub type PatientId = u64;
pub type PractitionerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Patient,
    Doctor,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "PATIENT",
            Role::Doctor => "DOCTOR",
            Role::Staff => "STAFF",
        }
    }

    /// DOCTOR or STAFF.
    pub fn is_clinical(&self) -> bool {
        matches!(self, Role::Doctor | Role::Staff)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PATIENT" => Ok(Role::Patient),
            "DOCTOR" => Ok(Role::Doctor),
            "STAFF" => Ok(Role::Staff),
            other => Err(AppError::invalid("invalid_role".to_string(), format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    #[serde(default)]
    pub practitioner_id: Option<PractitionerId>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub patient_id: Option<PatientId>,
    pub practitioner_id: Option<PractitionerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    pub personal_number: String,
    pub name: String,
    #[serde(default)]
    pub contact_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Practitioner {
    pub id: PractitionerId,
    pub name: String,
}

/// A clinical note recorded against a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: u64,
    pub patient_id: PatientId,
    #[serde(default)]
    pub practitioner_id: Option<PractitionerId>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct NewEncounter {
    pub patient_id: PatientId,
    pub practitioner_id: Option<PractitionerId>,
    pub start_time: DateTime<Utc>,
    pub notes: String,
}

/// A diagnosis recorded against a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub id: u64,
    pub patient_id: PatientId,
    pub code: String,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub onset_date: Option<NaiveDate>,
    #[serde(default)]
    pub asserted_by_practitioner_id: Option<PractitionerId>,
}

#[derive(Debug, Clone)]
pub struct NewCondition {
    pub patient_id: PatientId,
    pub code: String,
    pub display: Option<String>,
    pub onset_date: Option<NaiveDate>,
    pub asserted_by_practitioner_id: Option<PractitionerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub sender_user_id: UserId,
    pub receiver_user_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_user_id: UserId,
    pub receiver_user_id: UserId,
    pub content: String,
    /// Stamped with the current time on save when absent.
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!("patient".parse::<Role>().unwrap(), Role::Patient);
        assert_eq!(" Doctor ".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!("STAFF".parse::<Role>().unwrap(), Role::Staff);
        let err = "nurse".parse::<Role>().unwrap_err();
        assert!(err.is_invalid());
    }

    #[test]
    fn clinical_roles() {
        assert!(!Role::Patient.is_clinical());
        assert!(Role::Doctor.is_clinical());
        assert!(Role::Staff.is_clinical());
        assert_eq!(serde_json::to_value(Role::Doctor).unwrap(), "DOCTOR");
    }
}
