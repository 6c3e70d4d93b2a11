pub mod config;
pub mod context;
pub mod logging;
pub mod rpc;
pub mod services;
pub mod web;
