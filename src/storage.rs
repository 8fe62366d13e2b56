//!
//! carelink storage module
//! -----------------------
//! In-process directory store for users, patients, practitioners, clinical notes,
//! diagnoses and messages. Each entity kind lives in its own id-ordered table with a
//! monotonically increasing id counter, so a table scan always returns rows in
//! insertion order.
//!
//! When the store is opened with a data root, every mutation rewrites a JSON snapshot
//! under that root (see `snapshot`); without a root the store is purely in-memory.
//!
//! The public API centers around the `Store` type, which is wrapped in a thread-safe
//! `SharedStore` (`Arc<Mutex<Store>>`) and handed to every request handler. The core
//! only sees it through the `UserDirectory` and `MessageLog` traits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};

pub mod model;
mod snapshot;

pub use model::{
    Condition, Encounter, Message, NewCondition, NewEncounter, NewMessage, NewUser, Patient, PatientId,
    Practitioner, PractitionerId, Role, User, UserId,
};

/// Id-ordered rows of one entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table<T> {
    next_id: u64,
    rows: BTreeMap<u64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self { Self { next_id: 1, rows: BTreeMap::new() } }
}

impl<T: Clone> Table<T> {
    fn insert_with(&mut self, build: impl FnOnce(u64) -> T) -> T {
        let id = self.next_id;
        self.next_id += 1;
        let row = build(id);
        self.rows.insert(id, row.clone());
        row
    }

    fn get(&self, id: u64) -> Option<&T> { self.rows.get(&id) }

    fn scan(&self) -> impl Iterator<Item = &T> { self.rows.values() }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    users: Table<User>,
    #[serde(default)]
    patients: Table<Patient>,
    #[serde(default)]
    practitioners: Table<Practitioner>,
    #[serde(default)]
    encounters: Table<Encounter>,
    #[serde(default)]
    conditions: Table<Condition>,
    #[serde(default)]
    messages: Table<Message>,
}

/// Directory store handle. Optionally backed by a snapshot file under `root`.
#[derive(Debug, Default)]
pub struct Store {
    root: Option<PathBuf>,
    data: StoreData,
    in_transaction: bool,
}

impl Store {
    /// Purely in-memory store; contents die with the process.
    pub fn in_memory() -> Self { Self::default() }

    /// Open a store persisted under `root`, loading the existing snapshot if there is one.
    /// The directory is created if it does not already exist.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let data = snapshot::load(&root)?.unwrap_or_default();
        debug!(
            target: "carelink::storage",
            "store opened root='{}' users={} messages={}",
            root.display(), data.users.rows.len(), data.messages.rows.len()
        );
        Ok(Self { root: Some(root), data, in_transaction: false })
    }

    pub fn is_empty(&self) -> bool { self.data.users.rows.is_empty() }

    fn persist(&self) -> Result<()> {
        match &self.root {
            Some(root) => snapshot::save(root, &self.data),
            None => Ok(()),
        }
    }

    /// Apply `change` and write one snapshot at the end. If `change` or the snapshot
    /// write fails, the in-memory data is restored to its state before the call.
    /// Mutators called inside `change` join the enclosing transaction.
    pub fn transaction<R>(&mut self, change: impl FnOnce(&mut Store) -> AppResult<R>) -> AppResult<R> {
        if self.in_transaction {
            return change(&mut *self);
        }
        let backup = self.data.clone();
        self.in_transaction = true;
        let out = change(&mut *self).and_then(|r| {
            self.persist()?;
            Ok(r)
        });
        self.in_transaction = false;
        if let Err(e) = &out {
            debug!(target: "carelink::storage", "transaction rolled back: {}", e);
            self.data = backup;
        }
        out
    }

    // ---- users ----

    pub fn find_user_by_id(&self, id: UserId) -> Option<User> { self.data.users.get(id).cloned() }

    pub fn find_user_by_username(&self, username: &str) -> Option<User> {
        self.data.users.scan().find(|u| u.username == username).cloned()
    }

    pub fn find_users_by_role(&self, role: Role) -> Vec<User> {
        self.data.users.scan().filter(|u| u.role == role).cloned().collect()
    }

    pub fn list_users(&self) -> Vec<User> { self.data.users.scan().cloned().collect() }

    pub fn username_exists(&self, username: &str) -> bool {
        self.data.users.scan().any(|u| u.username == username)
    }

    pub fn insert_user(&mut self, new: NewUser) -> AppResult<User> {
        self.transaction(|s| {
            if s.username_exists(&new.username) {
                return Err(AppError::conflict("username_taken".to_string(), format!("Username '{}' already exists", new.username)));
            }
            Ok(s.data.users.insert_with(|id| User {
                id,
                username: new.username,
                password_hash: new.password_hash,
                role: new.role,
                patient_id: new.patient_id,
                practitioner_id: new.practitioner_id,
            }))
        })
    }

    /// Remove a user; returns the removed row. Messages and clinical data stay in place.
    pub fn delete_user(&mut self, id: UserId) -> AppResult<Option<User>> {
        if !self.data.users.rows.contains_key(&id) {
            return Ok(None);
        }
        self.transaction(|s| Ok(s.data.users.rows.remove(&id)))
    }

    // ---- patients & practitioners ----

    pub fn find_patient_by_id(&self, id: PatientId) -> Option<Patient> { self.data.patients.get(id).cloned() }

    /// First patient (in insertion order) whose name matches exactly.
    pub fn find_patient_by_name(&self, name: &str) -> Option<Patient> {
        self.data.patients.scan().find(|p| p.name == name).cloned()
    }

    pub fn insert_patient(&mut self, personal_number: &str, name: &str) -> AppResult<Patient> {
        self.transaction(|s| {
            if s.data.patients.scan().any(|p| p.personal_number == personal_number) {
                return Err(AppError::conflict("personal_number_taken".to_string(), format!("Patient '{}' already exists", personal_number)));
            }
            Ok(s.data.patients.insert_with(|id| Patient {
                id,
                personal_number: personal_number.to_string(),
                name: name.to_string(),
                contact_info: None,
            }))
        })
    }

    pub fn find_practitioner_by_id(&self, id: PractitionerId) -> Option<Practitioner> {
        self.data.practitioners.get(id).cloned()
    }

    pub fn insert_practitioner(&mut self, name: &str) -> AppResult<Practitioner> {
        self.transaction(|s| Ok(s.data.practitioners.insert_with(|id| Practitioner { id, name: name.to_string() })))
    }

    // ---- clinical notes & diagnoses ----

    pub fn insert_encounter(&mut self, new: NewEncounter) -> AppResult<Encounter> {
        self.transaction(|s| {
            Ok(s.data.encounters.insert_with(|id| Encounter {
                id,
                patient_id: new.patient_id,
                practitioner_id: new.practitioner_id,
                start_time: new.start_time,
                end_time: None,
                notes: new.notes,
            }))
        })
    }

    pub fn encounters_for_patient(&self, patient_id: PatientId) -> Vec<Encounter> {
        self.data.encounters.scan().filter(|e| e.patient_id == patient_id).cloned().collect()
    }

    pub fn insert_condition(&mut self, new: NewCondition) -> AppResult<Condition> {
        self.transaction(|s| {
            Ok(s.data.conditions.insert_with(|id| Condition {
                id,
                patient_id: new.patient_id,
                code: new.code,
                display: new.display,
                onset_date: new.onset_date,
                asserted_by_practitioner_id: new.asserted_by_practitioner_id,
            }))
        })
    }

    pub fn conditions_for_patient(&self, patient_id: PatientId) -> Vec<Condition> {
        self.data.conditions.scan().filter(|c| c.patient_id == patient_id).cloned().collect()
    }

    // ---- messages ----

    pub fn save_message(&mut self, new: NewMessage) -> AppResult<Message> {
        let sent_at = new.sent_at.unwrap_or_else(Utc::now);
        self.transaction(|s| {
            Ok(s.data.messages.insert_with(|id| Message {
                id,
                sender_user_id: new.sender_user_id,
                receiver_user_id: new.receiver_user_id,
                content: new.content,
                sent_at,
                read: false,
            }))
        })
    }

    /// Messages exchanged between `a` and `b` in either direction, in insertion order.
    pub fn find_messages_between(&self, a: UserId, b: UserId) -> Vec<Message> {
        self.data
            .messages
            .scan()
            .filter(|m| {
                (m.sender_user_id == a && m.receiver_user_id == b)
                    || (m.sender_user_id == b && m.receiver_user_id == a)
            })
            .cloned()
            .collect()
    }
}

/// User lookups consumed by the session and access-policy layer.
pub trait UserDirectory: Send + Sync {
    fn find_user_by_id(&self, id: UserId) -> Option<User>;
    fn find_user_by_username(&self, username: &str) -> Option<User>;
    fn find_users_by_role(&self, role: Role) -> Vec<User>;
}

/// Message persistence consumed by thread assembly and sending.
pub trait MessageLog: Send + Sync {
    fn find_messages_between(&self, a: UserId, b: UserId) -> Vec<Message>;
    /// Assigns the id and stamps `sent_at` when absent.
    fn save_message(&self, new: NewMessage) -> AppResult<Message>;
}

#[derive(Clone, Default)]
pub struct SharedStore(pub Arc<Mutex<Store>>);

impl SharedStore {
    pub fn in_memory() -> Self { Self(Arc::new(Mutex::new(Store::in_memory()))) }

    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Store::open(root)?))))
    }
}

impl UserDirectory for SharedStore {
    fn find_user_by_id(&self, id: UserId) -> Option<User> { self.0.lock().find_user_by_id(id) }
    fn find_user_by_username(&self, username: &str) -> Option<User> { self.0.lock().find_user_by_username(username) }
    fn find_users_by_role(&self, role: Role) -> Vec<User> { self.0.lock().find_users_by_role(role) }
}

impl MessageLog for SharedStore {
    fn find_messages_between(&self, a: UserId, b: UserId) -> Vec<Message> { self.0.lock().find_messages_between(a, b) }
    fn save_message(&self, new: NewMessage) -> AppResult<Message> { self.0.lock().save_message(new) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_user(name: &str, role: Role) -> NewUser {
        NewUser { username: name.into(), password_hash: "x".into(), role, patient_id: None, practitioner_id: None }
    }

    #[test]
    fn ids_are_assigned_in_insertion_order() {
        let mut s = Store::in_memory();
        let a = s.insert_user(new_user("anna", Role::Patient)).unwrap();
        let b = s.insert_user(new_user("bert", Role::Doctor)).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        let names: Vec<_> = s.list_users().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["anna", "bert"]);
        assert_eq!(s.find_users_by_role(Role::Doctor).len(), 1);
    }

    #[test]
    fn duplicate_username_conflicts() {
        let mut s = Store::in_memory();
        s.insert_user(new_user("anna", Role::Patient)).unwrap();
        let err = s.insert_user(new_user("anna", Role::Staff)).unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn save_message_stamps_sent_at_and_unread() {
        let mut s = Store::in_memory();
        let before = Utc::now();
        let m = s.save_message(NewMessage { sender_user_id: 1, receiver_user_id: 2, content: "hi".into(), sent_at: None }).unwrap();
        assert!(m.sent_at >= before);
        assert!(!m.read);
        assert_eq!(m.id, 1);
    }

    #[test]
    fn messages_between_covers_both_directions_only() {
        let mut s = Store::in_memory();
        for (from, to) in [(1, 2), (2, 1), (1, 3), (3, 2)] {
            s.save_message(NewMessage { sender_user_id: from, receiver_user_id: to, content: "x".into(), sent_at: None }).unwrap();
        }
        let ids: Vec<_> = s.find_messages_between(2, 1).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn snapshot_round_trips_through_data_root() {
        let tmp = tempdir().unwrap();
        {
            let mut s = Store::open(tmp.path()).unwrap();
            let p = s.insert_patient("19900101-1234", "Anna").unwrap();
            let mut nu = new_user("anna", Role::Patient);
            nu.patient_id = Some(p.id);
            s.insert_user(nu).unwrap();
        }
        let s = Store::open(tmp.path()).unwrap();
        let u = s.find_user_by_username("anna").unwrap();
        assert_eq!(u.patient_id, Some(1));
        assert_eq!(s.find_patient_by_name("Anna").unwrap().personal_number, "19900101-1234");
        // counters survive too
        let mut s = s;
        assert_eq!(s.insert_user(new_user("bert", Role::Doctor)).unwrap().id, 2);
    }

    #[test]
    fn failed_snapshot_write_leaves_store_unchanged() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("data");
        let mut s = Store::open(&root).unwrap();
        s.insert_user(new_user("anna", Role::Patient)).unwrap();

        // a plain file where the data root should be makes every save fail
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"not a directory").unwrap();

        let err = s.insert_user(new_user("bert", Role::Doctor)).unwrap_err();
        assert_eq!(err.http_status(), 500);
        assert!(s.find_user_by_username("bert").is_none());
        assert!(s.save_message(NewMessage { sender_user_id: 1, receiver_user_id: 2, content: "x".into(), sent_at: None }).is_err());
        assert!(s.find_messages_between(1, 2).is_empty());
        assert!(s.delete_user(1).is_err());
        assert!(s.find_user_by_id(1).is_some());

        std::fs::remove_file(&root).unwrap();
        std::fs::create_dir_all(&root).unwrap();
        // the retry is not a conflict and reuses the id the failed insert had taken
        assert_eq!(s.insert_user(new_user("bert", Role::Doctor)).unwrap().id, 2);
    }

    #[test]
    fn transaction_rolls_back_every_step() {
        let mut s = Store::in_memory();
        let res: AppResult<()> = s.transaction(|tx| {
            tx.insert_patient("p1", "Anna")?;
            tx.insert_user(new_user("anna", Role::Patient))?;
            Err(AppError::internal("boom", "late failure"))
        });
        assert!(res.is_err());
        assert!(s.is_empty());
        assert!(s.find_patient_by_name("Anna").is_none());
        assert_eq!(s.insert_patient("p1", "Anna").unwrap().id, 1);
    }
}
