//! Order and payment reconciliation backend for the bookstore.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
