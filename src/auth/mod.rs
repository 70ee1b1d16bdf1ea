//! Credential storage and password authentication.
//!
//! Provides:
//! - Salted PBKDF2-HMAC-SHA256 password hashing (200k rounds, 16-byte salt)
//! - A JSON credential file mapping username to `salt$hash`, bootstrapped
//!   with a configurable default account on first run
//! - Login and change-password flows with generic, non-revealing failures

pub mod password;
pub mod store;

pub use password::{hash_password, hash_password_with_salt, verify_password};
pub use store::{
    AuthError, AuthenticatedUser, BootstrapAccount, CredentialBackend, CredentialStore,
    Credentials, FileBackend,
};
