pub mod config;
pub mod daemon;
pub mod pending;
pub mod request;
pub mod review;
pub mod rules;
