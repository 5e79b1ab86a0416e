pub mod generation;
pub mod models;
pub mod services;
