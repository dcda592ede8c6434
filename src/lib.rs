/// Basic application code
pub mod app;
/// REST clients for outside services
pub mod client;
/// Controllers for REST endpoints
pub mod controller;
/// Cryptography-related objects
pub mod crypto;
/// Domain objects
pub mod domain;
/// Repositories
pub mod repo;
/// Application settings
pub mod settings;
/// Application telemetry for tracing and logging
pub mod telemetry;
/// The signup confirmation state machine
pub mod workflow;
