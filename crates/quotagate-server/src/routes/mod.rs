pub mod access;
pub mod health;
pub mod resources;
pub mod usage;
