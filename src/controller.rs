/// Signup request and confirmation endpoints
pub mod signups;
