mod directory;
mod email_client;

pub use directory::{DirectoryClient, DirectoryError, GoogleDirectoryClient};
pub use email_client::{EmailAuthorizationToken, EmailClient, Notifier};
