//! Opt-in remembered login password.
//!
//! Only the password typed into the login form is kept here, in the OS
//! keychain under the username it was typed with. Access credentials never
//! touch the keychain; they live in memory for the life of the process.

use anyhow::{Context, Result};
use keyring::Entry;

/// Keychain service the remembered passwords are filed under
const SERVICE_NAME: &str = "sessionward";

pub struct PasswordVault;

impl PasswordVault {
    fn entry(username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, username)
            .with_context(|| format!("Failed to open keychain entry for {}", username))
    }

    /// Remember the login password after a successful login
    pub fn store(username: &str, password: &str) -> Result<()> {
        Self::entry(username)?
            .set_password(password)
            .context("Failed to remember login password")
    }

    /// Password remembered for `username`, if any
    pub fn get_password(username: &str) -> Result<String> {
        Self::entry(username)?
            .get_password()
            .with_context(|| format!("No remembered password for {}", username))
    }

    /// Forget the remembered password when the user opts out
    pub fn delete(username: &str) -> Result<()> {
        Self::entry(username)?
            .delete_credential()
            .context("Failed to forget login password")
    }
}
