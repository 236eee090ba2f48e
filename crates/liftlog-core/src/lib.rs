//! Core library for liftlog.
//!
//! Provides everything a liftlog front end needs besides rendering:
//!
//! - [`api`]: REST client for the workout backend, including transparent
//!   access-token refresh
//! - [`auth`]: the [`SessionManager`], the single owner of "who is signed in"
//! - [`storage`]: device-local persistence for the signed-in user and tokens
//! - [`models`]: users, exercises, history and form validation
//! - [`config`]: application configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError, Subscription};
pub use auth::{SessionError, SessionManager, SessionSnapshot};
pub use config::{Config, StorageBackend};
pub use storage::{SessionRecords, Storage, StorageError};
