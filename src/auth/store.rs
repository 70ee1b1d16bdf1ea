//! File-backed credential store.
//!
//! The store is a JSON object mapping username to `salt$hash`. It is read in
//! full on every operation and rewritten in full on every change; there is no
//! in-memory cache. Concurrent writers are last-writer-wins.

use super::password::{hash_password, verify_password};
use crate::util::write_atomic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

/// Username → stored hash.
pub type Credentials = BTreeMap<String, String>;

/// Dummy stored hash used to equalize timing when the username is unknown.
const DUMMY_STORED_HASH: &str =
    "00000000000000000000000000000000$0000000000000000000000000000000000000000000000000000000000000000";

/// Failures from the credential store and the authentication flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("current password incorrect")]
    CurrentPasswordIncorrect,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("credential store {location} is corrupt: {source}")]
    CorruptStore {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// True for outcomes caused by the caller's input rather than the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::CurrentPasswordIncorrect | Self::PasswordMismatch
        )
    }
}

/// The account seeded into an empty store on first run.
#[derive(Debug, Clone)]
pub struct BootstrapAccount {
    pub username: String,
    pub password: String,
}

impl Default for BootstrapAccount {
    fn default() -> Self {
        Self {
            username: "admin".into(),
            password: "secret123".into(),
        }
    }
}

/// A user whose password has just been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Whole-document persistence for the credential mapping.
pub trait CredentialBackend: Send + Sync {
    fn exists(&self) -> std::io::Result<bool>;
    fn read(&self) -> std::io::Result<String>;
    fn write(&self, contents: &str) -> std::io::Result<()>;
    /// Human-readable location for log and error messages.
    fn describe(&self) -> String;
}

/// Credential file on local disk, replaced atomically on write.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialBackend for FileBackend {
    fn exists(&self) -> std::io::Result<bool> {
        self.path.try_exists()
    }

    fn read(&self) -> std::io::Result<String> {
        std::fs::read_to_string(&self.path)
    }

    fn write(&self, contents: &str) -> std::io::Result<()> {
        write_atomic(&self.path, contents.as_bytes())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Credential store plus the login / change-password flows built on it.
pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    bootstrap: BootstrapAccount,
}

impl CredentialStore {
    /// Open the credential file at `path`. Nothing is touched on disk until
    /// the first operation.
    pub fn open(path: impl Into<PathBuf>, bootstrap: BootstrapAccount) -> Self {
        Self::with_backend(Box::new(FileBackend::new(path)), bootstrap)
    }

    pub fn with_backend(
        backend: Box<dyn CredentialBackend>,
        bootstrap: BootstrapAccount,
    ) -> Self {
        Self { backend, bootstrap }
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Create the store with the bootstrap account if it does not exist yet.
    /// Returns `true` when the store was created by this call.
    pub fn ensure_initialized(&self) -> Result<bool, AuthError> {
        if self.backend.exists()? {
            return Ok(false);
        }

        let mut users = Credentials::new();
        users.insert(
            self.bootstrap.username.clone(),
            hash_password(&self.bootstrap.password),
        );
        self.write_all(&users)?;

        tracing::warn!(
            location = %self.backend.describe(),
            "Created credential store with default credentials: {} / {} (change this password after first login)",
            self.bootstrap.username,
            self.bootstrap.password
        );
        Ok(true)
    }

    /// Read the full mapping, bootstrapping the store first if needed.
    pub fn load(&self) -> Result<Credentials, AuthError> {
        self.ensure_initialized()?;
        let raw = self.backend.read()?;
        serde_json::from_str(&raw).map_err(|source| AuthError::CorruptStore {
            location: self.backend.describe(),
            source,
        })
    }

    /// Overwrite the store with the full mapping.
    pub fn save(&self, users: &Credentials) -> Result<(), AuthError> {
        self.write_all(users)
    }

    fn write_all(&self, users: &Credentials) -> Result<(), AuthError> {
        let body = serde_json::to_string(users).map_err(|source| AuthError::CorruptStore {
            location: self.backend.describe(),
            source,
        })?;
        self.backend.write(&body)?;
        Ok(())
    }

    // ── Authentication flow ─────────────────────────────────────────

    /// Verify a username + password pair.
    ///
    /// Unknown user and wrong password both yield
    /// [`AuthError::InvalidCredentials`].
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        let users = self.load()?;
        match users.get(username) {
            Some(stored) if verify_password(password, stored) => Ok(AuthenticatedUser {
                username: username.to_string(),
            }),
            Some(_) => Err(AuthError::InvalidCredentials),
            None => {
                // Perform dummy verification to prevent timing side-channel
                let _ = verify_password(password, DUMMY_STORED_HASH);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Change `username`'s password after checking the current one.
    pub fn change_password(
        &self,
        username: &str,
        current: &str,
        new_password: &str,
        confirm: &str,
    ) -> Result<(), AuthError> {
        let mut users = self.load()?;
        let current_ok = users
            .get(username)
            .is_some_and(|stored| verify_password(current, stored));
        if !current_ok {
            return Err(AuthError::CurrentPasswordIncorrect);
        }
        if new_password != confirm {
            return Err(AuthError::PasswordMismatch);
        }

        users.insert(username.to_string(), hash_password(new_password));
        self.save(&users)?;
        tracing::info!(username, "Password changed");
        Ok(())
    }

    /// Create or overwrite an account's password without checking the old
    /// one. Operator use only.
    pub fn set_password(&self, username: &str, new_password: &str) -> Result<(), AuthError> {
        let mut users = self.load()?;
        let created = users
            .insert(username.to_string(), hash_password(new_password))
            .is_none();
        self.save(&users)?;
        tracing::info!(username, created, "Password set by operator");
        Ok(())
    }

    /// Whether `password` is the configured first-run password.
    pub fn is_bootstrap_password(&self, password: &str) -> bool {
        password
            .as_bytes()
            .ct_eq(self.bootstrap.password.as_bytes())
            .into()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, CredentialStore) {
        let tmp = TempDir::new().unwrap();
        let store =
            CredentialStore::open(tmp.path().join("users.json"), BootstrapAccount::default());
        (tmp, store)
    }

    #[test]
    fn bootstrap_creates_single_default_entry() {
        let (tmp, store) = test_store();
        assert!(!tmp.path().join("users.json").exists());

        assert!(store.ensure_initialized().unwrap());
        let users = store.load().unwrap();

        assert_eq!(users.len(), 1);
        let stored = users.get("admin").unwrap();
        assert!(verify_password("secret123", stored));
    }

    #[test]
    fn bootstrap_runs_only_once() {
        let (_tmp, store) = test_store();

        assert!(store.ensure_initialized().unwrap());
        let first = store.load().unwrap();
        assert!(!store.ensure_initialized().unwrap());
        let second = store.load().unwrap();

        // Same salt+hash, i.e. the file was not regenerated.
        assert_eq!(first, second);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a plain-text fmt subscriber and return what it logged.
    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let value = tracing::subscriber::with_default(subscriber, f);
        let output = String::from_utf8_lossy(&logs.0.lock()).into_owned();
        (value, output)
    }

    #[test]
    fn bootstrap_logs_default_credentials() {
        let (_tmp, store) = test_store();

        let (created, output) = with_captured_logs(|| store.ensure_initialized());
        assert!(created.unwrap());
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("admin / secret123"), "{output}");
        assert!(output.contains(&format!("location={}", store.location())), "{output}");

        let (created, output) = with_captured_logs(|| store.ensure_initialized());
        assert!(!created.unwrap());
        assert!(!output.contains("secret123"), "{output}");
    }

    #[test]
    fn load_bootstraps_missing_store() {
        let (tmp, store) = test_store();
        let users = store.load().unwrap();
        assert!(users.contains_key("admin"));
        assert!(tmp.path().join("users.json").exists());
    }

    #[test]
    fn bootstrap_account_is_configurable() {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::open(
            tmp.path().join("users.json"),
            BootstrapAccount {
                username: "owner".into(),
                password: "hunter2hunter2".into(),
            },
        );

        let users = store.load().unwrap();
        assert_eq!(users.keys().collect::<Vec<_>>(), vec!["owner"]);
        assert!(store.authenticate("owner", "hunter2hunter2").is_ok());
        assert!(store.is_bootstrap_password("hunter2hunter2"));
        assert!(!store.is_bootstrap_password("secret123"));
    }

    #[test]
    fn store_file_is_plain_json_map() {
        let (tmp, store) = test_store();
        store.ensure_initialized().unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("users.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let stored = parsed["admin"].as_str().unwrap();
        assert_eq!(stored.matches('$').count(), 1);
    }

    #[test]
    fn corrupt_store_fails_loudly() {
        let (tmp, store) = test_store();
        std::fs::write(tmp.path().join("users.json"), "not json at all").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, AuthError::CorruptStore { .. }));
        assert!(!err.is_rejection());

        let err = store.authenticate("admin", "secret123").unwrap_err();
        assert!(matches!(err, AuthError::CorruptStore { .. }));
    }

    #[test]
    fn wrong_shape_json_is_corrupt() {
        let (tmp, store) = test_store();
        std::fs::write(tmp.path().join("users.json"), r#"["admin"]"#).unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            AuthError::CorruptStore { .. }
        ));
    }

    #[test]
    fn save_overwrites_whole_mapping() {
        let (_tmp, store) = test_store();
        store.ensure_initialized().unwrap();

        let mut users = Credentials::new();
        users.insert("alice".into(), hash_password("alice-pw"));
        store.save(&users).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.contains_key("admin"));
    }

    #[test]
    fn authenticate_default_user() {
        let (_tmp, store) = test_store();
        let user = store.authenticate("admin", "secret123").unwrap();
        assert_eq!(user.username, "admin");
    }

    #[test]
    fn authenticate_failures_are_indistinguishable() {
        let (_tmp, store) = test_store();

        let wrong_password = store.authenticate("admin", "nope").unwrap_err();
        let unknown_user = store.authenticate("ghost", "secret123").unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[test]
    fn change_password_end_to_end() {
        let (_tmp, store) = test_store();

        assert!(store.authenticate("admin", "secret123").is_ok());
        store
            .change_password("admin", "secret123", "NewPass!23", "NewPass!23")
            .unwrap();

        assert!(matches!(
            store.authenticate("admin", "secret123").unwrap_err(),
            AuthError::InvalidCredentials
        ));
        assert!(store.authenticate("admin", "NewPass!23").is_ok());
    }

    #[test]
    fn change_password_uses_fresh_salt() {
        let (_tmp, store) = test_store();
        let before = store.load().unwrap()["admin"].clone();

        // Same new password as the old one: only the salt can differ.
        store
            .change_password("admin", "secret123", "secret123", "secret123")
            .unwrap();
        let after = store.load().unwrap()["admin"].clone();

        let old_salt = before.split_once('$').unwrap().0;
        let new_salt = after.split_once('$').unwrap().0;
        assert_ne!(old_salt, new_salt);
        assert!(verify_password("secret123", &after));
    }

    #[test]
    fn change_password_rejects_wrong_current() {
        let (_tmp, store) = test_store();
        let err = store
            .change_password("admin", "wrong", "NewPass!23", "NewPass!23")
            .unwrap_err();
        assert!(matches!(err, AuthError::CurrentPasswordIncorrect));
        assert!(err.is_rejection());
        assert!(store.authenticate("admin", "secret123").is_ok());
    }

    #[test]
    fn change_password_rejects_unknown_user() {
        let (_tmp, store) = test_store();
        let err = store
            .change_password("ghost", "secret123", "a", "a")
            .unwrap_err();
        assert!(matches!(err, AuthError::CurrentPasswordIncorrect));
    }

    #[test]
    fn change_password_rejects_mismatched_confirmation() {
        let (_tmp, store) = test_store();
        let err = store
            .change_password("admin", "secret123", "NewPass!23", "NewPass!24")
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordMismatch));
        assert!(store.authenticate("admin", "secret123").is_ok());
    }

    #[test]
    fn wrong_current_is_reported_before_mismatch() {
        let (_tmp, store) = test_store();
        let err = store.change_password("admin", "wrong", "a", "b").unwrap_err();
        assert!(matches!(err, AuthError::CurrentPasswordIncorrect));
    }

    #[test]
    fn set_password_creates_and_overwrites() {
        let (_tmp, store) = test_store();

        store.set_password("bob", "bob-pw").unwrap();
        assert!(store.authenticate("bob", "bob-pw").is_ok());
        assert!(store.authenticate("admin", "secret123").is_ok());

        store.set_password("admin", "rotated").unwrap();
        assert!(store.authenticate("admin", "rotated").is_ok());
        assert!(store.authenticate("admin", "secret123").is_err());
    }

    #[test]
    fn malformed_stored_hash_is_a_plain_mismatch() {
        let (tmp, store) = test_store();
        std::fs::write(
            tmp.path().join("users.json"),
            r#"{"admin":"not-a-valid-format"}"#,
        )
        .unwrap();

        assert!(matches!(
            store.authenticate("admin", "secret123").unwrap_err(),
            AuthError::InvalidCredentials
        ));
    }
}
