mod email_address;
mod group_id;
mod signup;

pub use email_address::EmailAddress;
pub use group_id::{GroupId, Whitelist};
pub use signup::{SignupId, SignupState};
