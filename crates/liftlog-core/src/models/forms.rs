//! User input for sign-up, profile edits and avatar uploads.
//!
//! Validation happens client-side before any request is sent, so the
//! backend only ever sees well-formed payloads.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Minimum password length accepted by the backend
const MIN_PASSWORD_LEN: usize = 6;

/// Largest avatar image the backend accepts (5 MB)
pub const MAX_AVATAR_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name is required")]
    NameRequired,

    #[error("E-mail is required")]
    EmailRequired,

    #[error("Invalid e-mail")]
    EmailInvalid,

    #[error("Password is required")]
    PasswordRequired,

    #[error("Password must be at least 6 characters")]
    PasswordTooShort,

    #[error("Password confirmation is required")]
    ConfirmationRequired,

    #[error("Password confirmation does not match")]
    ConfirmationMismatch,

    #[error("Current password is required to set a new one")]
    OldPasswordRequired,

    #[error("Image is too large ({size} bytes, max 5 MB)")]
    AvatarTooLarge { size: u64 },

    #[error("Unsupported image file: {0}")]
    AvatarUnsupported(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignUpForm {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub confirm_password: String,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::NameRequired);
        }
        if self.email.trim().is_empty() {
            return Err(ValidationError::EmailRequired);
        }
        if !looks_like_email(self.email.trim()) {
            return Err(ValidationError::EmailInvalid);
        }
        if self.password.is_empty() {
            return Err(ValidationError::PasswordRequired);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort);
        }
        if self.confirm_password.is_empty() {
            return Err(ValidationError::ConfirmationRequired);
        }
        if self.confirm_password != self.password {
            return Err(ValidationError::ConfirmationMismatch);
        }
        Ok(())
    }
}

/// Profile edit. Empty password fields leave the password unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub name: String,
    pub old_password: String,
    pub password: String,
    pub confirm_password: String,
}

/// Wire shape of `PUT /users`
#[derive(Debug, Serialize)]
pub(crate) struct ProfileUpdateBody<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<&'a str>,
}

impl ProfileForm {
    pub fn changes_password(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::NameRequired);
        }
        if !self.changes_password() {
            return Ok(());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort);
        }
        if self.confirm_password.is_empty() {
            return Err(ValidationError::ConfirmationRequired);
        }
        if self.confirm_password != self.password {
            return Err(ValidationError::ConfirmationMismatch);
        }
        if self.old_password.is_empty() {
            return Err(ValidationError::OldPasswordRequired);
        }
        Ok(())
    }

    pub(crate) fn body(&self) -> ProfileUpdateBody<'_> {
        let changes = self.changes_password();
        ProfileUpdateBody {
            name: self.name.trim(),
            password: changes.then_some(self.password.as_str()),
            old_password: changes.then_some(self.old_password.as_str()),
        }
    }
}

/// An avatar image ready for multipart upload.
#[derive(Clone)]
pub struct AvatarUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for AvatarUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl AvatarUpload {
    /// Build an upload named after the user, e.g. `ana silva.jpg`.
    pub fn new(user_name: &str, extension: &str, bytes: Vec<u8>) -> Result<Self, ValidationError> {
        let extension = extension.trim_start_matches('.').to_lowercase();
        if extension.is_empty() {
            return Err(ValidationError::AvatarUnsupported(user_name.to_string()));
        }
        let size = bytes.len() as u64;
        if size > MAX_AVATAR_BYTES {
            return Err(ValidationError::AvatarTooLarge { size });
        }
        Ok(Self {
            file_name: format!("{}.{}", user_name, extension).to_lowercase(),
            mime_type: format!("image/{}", extension),
            bytes,
        })
    }

    /// Read an image from disk, checking its size before loading it.
    pub fn from_path(user_name: &str, path: &Path) -> anyhow::Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ValidationError::AvatarUnsupported(path.display().to_string()))?;

        let size = std::fs::metadata(path)?.len();
        if size > MAX_AVATAR_BYTES {
            return Err(ValidationError::AvatarTooLarge { size }.into());
        }

        let bytes = std::fs::read(path)?;
        Ok(Self::new(user_name, extension, bytes)?)
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}
