// Library exports for the interior tracker
// Integration tests drive the router and the registries through these

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod images;
pub mod models;
pub mod notify;
pub mod pins;
pub mod projects;
pub mod routes;
pub mod state;
