//! High-level services: manifest interpretation and the update orchestrator.

pub mod manifest;
pub mod updater;
