pub mod google;
pub mod manager;
pub mod provider;
pub mod store;

pub use google::{ClientSecrets, GoogleOAuthProvider};
pub use manager::CredentialStore;
pub use provider::{CredentialProvider, UnconfiguredProvider};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
