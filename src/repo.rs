mod memory;
mod postgres;
mod signups;

pub use memory::InMemorySignupStore;
pub use postgres::PgSignupStore;
pub use signups::{SignupRecord, SignupStore, StoreError, StoreResult};
