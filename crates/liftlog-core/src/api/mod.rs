//! REST API client for the workout backend.
//!
//! This module provides the `ApiClient` for signing in, browsing the
//! exercise catalog, logging history and editing the profile.
//!
//! Authenticated requests carry the current access token as a bearer
//! header. When the backend rejects an expired token, the client trades
//! the refresh token for a new pair and replays the request; callers only
//! ever see `ApiError::SessionExpired` when that exchange fails.

pub mod client;
pub mod error;
pub mod events;
mod refresh;

pub use client::{ApiClient, SessionResponse};
pub use error::ApiError;
pub use events::Subscription;
