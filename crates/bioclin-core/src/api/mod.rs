//! REST client for the Bioclin API.
//!
//! This module provides the `ApiClient` for making authenticated calls
//! against the Bioclin service: users, organizations, projects, runs,
//! parameters, analysis types and cloud storage access.
//!
//! The API authenticates with cookies (`access_token`, `csrf_token`) plus an
//! `X-CSRF-Token` header, obtained through the `/identity/login` endpoint.

pub mod client;
pub mod error;

pub use client::{build_http_client, ApiClient, Body, HttpMethod, Payload};
pub use error::ApiError;
