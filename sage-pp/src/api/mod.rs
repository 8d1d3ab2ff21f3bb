//! HTTP surface

pub mod health;
pub mod profile;
