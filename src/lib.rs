pub mod auth;
pub mod config;
pub mod gateway;
pub mod records;
pub mod util;
