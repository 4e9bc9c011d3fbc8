//! Host-facing vocabulary: commands, events, sensor data models and settings

pub mod commands;
pub mod events;
pub mod models;
pub mod settings;
