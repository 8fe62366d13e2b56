//! Patient clinical records: notes (encounters) and diagnoses (conditions).
//!
//! Every operation takes an already authenticated user. The role gate always runs
//! before any patient lookup, so a patient probing for records learns nothing about
//! which patient ids or names exist.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{can_view_patient_record, require_clinical_role, require_patient_role};
use crate::storage::{
    Condition, Encounter, NewCondition, NewEncounter, Patient, PatientId, SharedStore, Store, User,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteRequest {
    #[serde(default)]
    pub note_text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteByNameRequest {
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub note_text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiagnosisRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    /// ISO `YYYY-MM-DD`; blank means unknown.
    #[serde(default)]
    pub onset_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiagnosisByNameRequest {
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(flatten)]
    pub diagnosis: CreateDiagnosisRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub patient: Patient,
    pub notes: Vec<Encounter>,
    pub conditions: Vec<Condition>,
}

fn patient_not_found() -> AppError { AppError::not_found("patient_not_found", "Patient not found") }

fn parse_onset(raw: Option<&str>) -> AppResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::invalid("malformed_date".to_string(), format!("onsetDate '{}' is not YYYY-MM-DD", s))),
    }
}

fn write_note(store: &mut Store, me: &User, patient: &Patient, text: Option<&str>) -> AppResult<Encounter> {
    let text = text.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(AppError::invalid("empty_note", "noteText is required"));
    }
    let enc = store.insert_encounter(NewEncounter {
        patient_id: patient.id,
        practitioner_id: me.practitioner_id,
        start_time: Utc::now(),
        notes: text.to_string(),
    })?;
    info!(target: "carelink::records", "note.created id={} patient={} by={}", enc.id, patient.id, me.id);
    Ok(enc)
}

fn write_diagnosis(store: &mut Store, me: &User, patient: &Patient, req: &CreateDiagnosisRequest) -> AppResult<Condition> {
    let code = req.code.as_deref().map(str::trim).unwrap_or_default();
    if code.is_empty() {
        return Err(AppError::invalid("missing_code", "code is required"));
    }
    let onset_date = parse_onset(req.onset_date.as_deref())?;
    let asserted_by = me.practitioner_id.filter(|id| store.find_practitioner_by_id(*id).is_some());
    let cond = store.insert_condition(NewCondition {
        patient_id: patient.id,
        code: code.to_string(),
        display: req.display.clone(),
        onset_date,
        asserted_by_practitioner_id: asserted_by,
    })?;
    info!(target: "carelink::records", "diagnosis.created id={} patient={} code={} by={}", cond.id, patient.id, cond.code, me.id);
    Ok(cond)
}

fn summarize(store: &Store, patient: Patient) -> PatientSummary {
    let notes = store.encounters_for_patient(patient.id);
    let conditions = store.conditions_for_patient(patient.id);
    PatientSummary { patient, notes, conditions }
}

fn patient_by_name(store: &Store, name: Option<&str>) -> AppResult<Patient> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::invalid("missing_patient_name", "patientName is required"));
    }
    store.find_patient_by_name(name).ok_or_else(patient_not_found)
}

pub fn create_note(store: &SharedStore, me: &User, patient_id: PatientId, req: &CreateNoteRequest) -> AppResult<Encounter> {
    require_clinical_role(me)?;
    let mut guard = store.0.lock();
    let patient = guard.find_patient_by_id(patient_id).ok_or_else(patient_not_found)?;
    write_note(&mut guard, me, &patient, req.note_text.as_deref())
}

pub fn create_note_by_name(store: &SharedStore, me: &User, req: &CreateNoteByNameRequest) -> AppResult<Encounter> {
    require_clinical_role(me)?;
    let mut guard = store.0.lock();
    let patient = patient_by_name(&guard, req.patient_name.as_deref())?;
    write_note(&mut guard, me, &patient, req.note_text.as_deref())
}

pub fn create_diagnosis(store: &SharedStore, me: &User, patient_id: PatientId, req: &CreateDiagnosisRequest) -> AppResult<Condition> {
    require_clinical_role(me)?;
    let mut guard = store.0.lock();
    let patient = guard.find_patient_by_id(patient_id).ok_or_else(patient_not_found)?;
    write_diagnosis(&mut guard, me, &patient, req)
}

pub fn create_diagnosis_by_name(store: &SharedStore, me: &User, req: &CreateDiagnosisByNameRequest) -> AppResult<Condition> {
    require_clinical_role(me)?;
    let mut guard = store.0.lock();
    let patient = patient_by_name(&guard, req.patient_name.as_deref())?;
    write_diagnosis(&mut guard, me, &patient, &req.diagnosis)
}

/// Clinician view of a patient's full record, looked up by name.
pub fn full_record_by_name(store: &SharedStore, me: &User, patient_name: &str) -> AppResult<PatientSummary> {
    require_clinical_role(me)?;
    let guard = store.0.lock();
    let patient = patient_by_name(&guard, Some(patient_name))?;
    Ok(summarize(&guard, patient))
}

/// Record by id for anyone allowed to see it: clinicians, or the patient it belongs to.
pub fn patient_record(store: &SharedStore, me: &User, patient_id: PatientId) -> AppResult<PatientSummary> {
    if !can_view_patient_record(me, patient_id) {
        return Err(AppError::forbidden("record_not_visible", "Not allowed to view this record"));
    }
    let guard = store.0.lock();
    let patient = guard.find_patient_by_id(patient_id).ok_or_else(patient_not_found)?;
    Ok(summarize(&guard, patient))
}

/// The calling patient's own record.
pub fn my_record(store: &SharedStore, me: &User) -> AppResult<PatientSummary> {
    require_patient_role(me)?;
    let Some(patient_id) = me.patient_id else {
        return Err(AppError::invalid("no_patient_linked", "No patient linked to this user"));
    };
    patient_record(store, me, patient_id)
}
