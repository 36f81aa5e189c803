pub mod age;
pub mod auth;
pub mod blocklist;
pub mod board;
pub mod config;
pub mod convert;
pub mod db;
pub mod gmail;
pub mod mail;
pub mod models;
pub mod store;
pub mod sync;
