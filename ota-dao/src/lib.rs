//! Data-access layer for OTA users, apps, deployments and packages.
//!
//! The backing store offers single-row writes, a conditional insert, and
//! equality lookups on a partition key. Uniqueness and the secondary lookups
//! (email, access key, deployment key, collaborator) are maintained here
//! through index tables written by ordered, compensating write plans.

pub mod codec;
pub mod config;
pub mod dao;
pub mod models;
pub mod services;
pub mod store;

pub use dao::Dao;
pub use services::DaoError;
