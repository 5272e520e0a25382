//! TourGuard: authentication and session security for the tour-booking API.

pub mod auth;
pub mod config;
