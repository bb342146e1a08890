pub mod auth;
pub mod availability;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod schedule;
pub mod store;
pub mod sweeper;
pub mod tenant;
pub mod token;
pub mod validate;
pub mod wal;
