//! Credential core of the organization-management platform
//!
//! Password accounts, JWT access/refresh sessions, password reset, MAX
//! Mini-App sign-in and scoped roles, exposed over an HTTP JSON surface.

pub mod audit;
pub mod config;
pub mod error;
pub mod jwt;
pub mod max_auth;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod password;
pub mod repositories;
pub mod reset;
pub mod retry;
pub mod roles;
pub mod routes;
pub mod service;
pub mod session;
pub mod validation;

use service::CredentialService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: CredentialService,
}
