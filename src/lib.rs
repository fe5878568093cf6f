pub mod capture;
pub mod catalog;
pub mod config;
pub mod error;
pub mod screencast;
pub mod tray;
