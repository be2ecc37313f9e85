pub mod bridge;
pub mod camera;
pub mod challenge;
pub mod config;
pub mod error;
pub mod geo;
pub mod pose;
pub mod reward;
pub mod tracking;
