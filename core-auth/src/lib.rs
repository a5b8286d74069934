//! # Authentication Module
//!
//! Credential providers for destination requests.
//!
//! ## Overview
//!
//! The backup pipeline never runs an interactive consent flow. It is handed a
//! long-lived OAuth refresh token (obtained once, out of band) and exchanges
//! it for short-lived access tokens as needed. Both providers implement
//! [`CredentialProvider`](bridge_traits::auth::CredentialProvider):
//!
//! - [`StaticCredentials`] - a fixed bearer token (tests, short CI jobs)
//! - [`RefreshTokenCredentials`] - OAuth 2.0 `refresh_token` grant with an
//!   in-memory cached access token, refreshed shortly before expiry or after
//!   the destination rejected it

pub mod credentials;
pub mod error;
pub mod types;

pub use credentials::{OAuthClientConfig, RefreshTokenCredentials, StaticCredentials};
pub use error::{AuthError, Result};
pub use types::AccessToken;
