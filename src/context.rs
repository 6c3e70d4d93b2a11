use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::rpc::SessionRegistry;

/// Process-wide state handed to services and the server.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown: broadcast::Sender<()>,
}

impl AppContext {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            shutdown,
        }
    }

    /// Ask the server to stop accepting connections and exit.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
