//! Data models for the workout backend.
//!
//! - `User`, `TokenPair`: the signed-in account and its credentials
//! - `Exercise`, `HistoryEntry`, `HistoryDay`: catalog and training log
//! - `SignUpForm`, `ProfileForm`, `AvatarUpload`: validated user input

mod de;
pub mod exercise;
pub mod forms;
pub mod user;

pub use exercise::{Exercise, HistoryDay, HistoryEntry};
pub use forms::{AvatarUpload, ProfileForm, SignUpForm, ValidationError, MAX_AVATAR_BYTES};
pub use user::{TokenPair, User};
