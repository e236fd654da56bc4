//! Common utilities and types shared across VolunteerX services.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, header inspection, iat checks)
pub mod jwt;
