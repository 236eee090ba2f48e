//! Session management.
//!
//! This module provides:
//! - `SessionManager`: the single owner of the signed-in user, the loading
//!   flag and the persisted session records
//! - `SessionSnapshot`: an observable view of that state for front ends
//!
//! A session is restored from storage at startup and ends either by an
//! explicit sign-out or by a forced sign-out when the API client can no
//! longer refresh the access token.

pub mod session;
pub mod state;

pub use session::{SessionError, SessionManager};
pub use state::SessionSnapshot;
