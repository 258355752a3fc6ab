//! # Resource Sample
//!
//! A user-management service built on `resource_framework`.
//!
//! - [`config`] - [`AppConfig`](config::AppConfig), read from the environment.
//! - [`resources`] - the document database and cache, both [`Resource`](resource_framework::Resource)s.
//! - [`model`] - the [`User`](model::User) entity and its payloads.
//! - [`user_repository`] - the [`UserRepository`](user_repository::UserRepository)
//!   contract with a document-backed and an in-memory implementation.
//! - [`services`] - validation and business rules in [`UserService`](services::UserService).
//! - [`error`] - the status-code carrying [`AppError`](error::AppError).
//! - [`httpclient`] - [`HttpClient`](httpclient::HttpClient) for calls to other
//!   services, with retry, backoff and a circuit breaker.
//! - [`lifecycle`] - [`App`](lifecycle::App), which connects everything at startup and
//!   closes it at shutdown.
//!
//! The binary in `main.rs` runs one user through create, read, update and delete.

pub mod config;
pub mod error;
pub mod httpclient;
pub mod lifecycle;
pub mod model;
pub mod resources;
pub mod services;
pub mod user_repository;
