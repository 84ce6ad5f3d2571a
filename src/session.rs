//! Per-invocation session
//!
//! Everything a command needs from its environment is carried here instead of
//! living in globals: the loaded configuration, the backend client and the
//! event stream connector.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, HttpBackend};
use crate::common::config::Config;
use crate::common::Result;
use crate::monitor::{JsonRenderer, Renderer, TerminalRenderer};
use crate::stream::{Connector, WebSocketConnector};

/// How progress is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputMode {
    pub json: bool,
    pub color: bool,
    pub show_logs: bool,
}

impl OutputMode {
    pub fn renderer(self) -> Box<dyn Renderer> {
        if self.json {
            Box::new(JsonRenderer::stdout())
        } else {
            Box::new(TerminalRenderer::stdout(self.color, self.show_logs))
        }
    }
}

pub struct Session {
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub connector: Arc<dyn Connector>,
}

impl Session {
    pub fn new(config: Config, backend: Arc<dyn Backend>, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            backend,
            connector,
        }
    }

    /// Session talking to the backend named in `config`
    pub fn connect(config: Config) -> Result<Self> {
        let backend = HttpBackend::from_config(&config.backend)?;
        let connector = WebSocketConnector::from_config(&config.backend);
        tracing::debug!(
            backend = backend.url(),
            stream = connector.url(),
            "Session configured"
        );
        Ok(Self::new(config, Arc::new(backend), Arc::new(connector)))
    }

    pub fn abort_wait(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.abort_secs)
    }
}
