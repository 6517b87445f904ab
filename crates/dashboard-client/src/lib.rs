//! Authenticated client for the project-management dashboard API.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod redirect;
pub mod renewal;
pub mod resources;

pub use auth::SessionStatus;
pub use client::{DashboardClient, RefreshTokenRequest};
pub use config::{ClientConfig, ConfigError, normalize_base_url};
pub use error::{ApiClientError, RefreshError, format_http_error};
pub use redirect::{LoginRedirect, TracingRedirect};
pub use renewal::{RenewalOutcome, RenewalTimer};
pub use resources::{Resource, UnknownResource};
