pub mod admin;
pub mod app;
pub mod bindings;
pub mod checkin;
pub mod commands;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod gateway;
pub mod heist;
pub mod ledger;
pub mod models;
pub mod reconciliation;
pub mod routes;
pub mod store;
pub mod templates;
pub mod website;
pub mod window;
