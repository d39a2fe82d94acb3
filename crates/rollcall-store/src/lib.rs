//! rollcall-store — SQLite persistence for employee profiles, encrypted
//! face templates and attendance rows.

pub mod cipher;
pub mod schema;
pub mod store;

pub use cipher::{CipherError, TemplateCipher};
pub use store::{EmployeeUpdate, NewEmployee, Store, StoreError};
