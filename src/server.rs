//! Composition root
//!
//! A `Server` owns the call table, the channel bus and the listener
//! settings. Calls are registered on `&mut Server`; `run` consumes the
//! server and freezes the table, so nothing can be registered once clients
//! are being served.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::bus::ChannelBus;
use crate::config::Settings;
use crate::dispatcher::{CallTable, Dispatcher, Handler};
use crate::transport::WsTransport;
use crate::upstream::{MemoryUpstream, RedisUpstream, Upstream};
use crate::utils::error::{RegisterError, RelayError};

pub struct Server {
    settings: Settings,
    bus: Arc<ChannelBus>,
    calls: CallTable,
}

impl Server {
    /// Server with the upstream the settings ask for: Redis, or an
    /// in-process bus when `standalone` is set.
    pub fn new(settings: Settings) -> Self {
        let upstream: Arc<dyn Upstream> = if settings.upstream.standalone {
            info!("Standalone mode, using in-process bus");
            Arc::new(MemoryUpstream::new())
        } else {
            Arc::new(RedisUpstream::new(settings.upstream_addr()))
        };
        Self::with_upstream(settings, upstream)
    }

    pub fn with_upstream(settings: Settings, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            settings,
            bus: ChannelBus::new(upstream),
            calls: CallTable::new(),
        }
    }

    pub fn register<H: Handler>(&mut self, name: &str, handler: H) -> Result<(), RegisterError> {
        self.calls.register(name, handler)
    }

    /// Call table, for applications installing several calls at once.
    pub fn calls_mut(&mut self) -> &mut CallTable {
        &mut self.calls
    }

    pub fn bus(&self) -> &Arc<ChannelBus> {
        &self.bus
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(self.settings.bind_addr()).await?;
        self.run_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve an already bound listener until `shutdown` resolves, then
    /// close every connection and the bus.
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            settings,
            bus,
            calls,
        } = self;
        info!(calls = ?calls.names(), "Call table frozen");

        let dispatcher = Arc::new(Dispatcher::new(calls));
        let transport = WsTransport::new(dispatcher, Arc::clone(&bus), &settings.server.path);
        transport.serve(listener, shutdown).await;

        bus.close().await;
        info!("Server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("settings", &self.settings)
            .field("calls", &self.calls)
            .finish()
    }
}
