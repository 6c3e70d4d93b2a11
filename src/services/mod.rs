//! Services exposed over the RPC engine.
//!
//! Domain services plug in here as endpoints; the engine itself knows
//! nothing about them beyond their method tables.

pub mod auth;
pub mod debug;
pub mod server;

use std::sync::Arc;

use crate::context::AppContext;
use crate::rpc::{Endpoint, RouterError};

pub use debug::DebugService;
pub use server::ServerService;

/// Endpoints to mount for the given configuration.
pub fn endpoints(ctx: &AppContext) -> Result<Vec<Endpoint>, RouterError> {
    let mut endpoints = vec![Arc::new(ServerService::new(ctx.clone())).endpoint()?];

    if ctx.config.debug_endpoints {
        endpoints.push(Arc::new(DebugService::new()).endpoint()?);
    }

    Ok(endpoints)
}
