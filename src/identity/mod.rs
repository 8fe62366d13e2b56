//! Sessions, credentials and the role-based access policy.
//! Keep the public surface thin and split implementation across sub-modules.

mod session;
mod password;
mod provider;
mod authorizer;

pub use session::{SessionRegistry, SessionToken};
pub use password::{hash_password, verify_password};
pub use provider::{AuthProvider, LocalAuthProvider, LoginRequest, LoginResponse, RegisterRequest};
pub use authorizer::{
    Contact, can_view_patient_record, can_view_thread, list_contacts, require_authenticated,
    require_clinical_role, require_patient_role,
};
