//! # herald
//!
//! Session host for the Herald chat bot.
//!
//! This binary wires together:
//! - **Durable store** of observed messages and contacts, flushed on a timer
//! - **Connection supervisor** that owns the transport session and recovers
//!   it after drops, re-pairing when the account was logged out
//! - **Memory watchdog** that ends the process above the configured limit
//!
//! No messaging SDK is linked into this build; sessions run over the
//! in-process loopback transport.

mod cli;
mod logging;

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use herald_net::{LoopbackTransport, TransportHandle};
use herald_session::{
    AppContext, CredentialVault, Handler, MemoryWatchdog, MessageEvent, ProcStatusProbe, Router,
    SessionConfig, Supervisor,
};
use herald_shared::constants::{EXIT_FATAL_CONFIG, EXIT_MEMORY_LIMIT, USER_SERVER};
use herald_shared::{HeraldError, Jid};
use herald_store::{spawn_flush_task, Store};
use tracing::{error, info};

use crate::cli::Cli;

/// Logs every message that reaches the business layer.
struct LogMessages;

#[async_trait]
impl Handler<MessageEvent> for LogMessages {
    async fn handle(
        &self,
        _handle: Arc<dyn TransportHandle>,
        event: MessageEvent,
    ) -> Result<(), HeraldError> {
        info!(
            conversation = %event.conversation(),
            id = %event.message.key.id,
            text = event.text().unwrap_or(""),
            "message received"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Logging and configuration
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    info!("Starting Herald v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig::from_env().with_overrides(cli.overrides());
    let ctx = match AppContext::from_config(config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(EXIT_FATAL_CONFIG);
        }
    };
    let config = &ctx.config;
    info!(
        data_dir = %config.data_dir.display(),
        pairing_code = config.pairing_code,
        public = config.public,
        anticall = config.anticall,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 2. Store and background tasks
    // -----------------------------------------------------------------------
    let store = Store::open_at(config.store_path()).await;
    info!(
        messages = store.message_count().await,
        contacts = store.contact_count().await,
        "Store ready"
    );
    let flusher = spawn_flush_task(store.clone(), config.flush_interval);

    let watchdog = MemoryWatchdog::new(
        Box::new(ProcStatusProbe),
        config.memory_limit_mb,
        config.memory_probe_interval,
    );
    let _watchdog = watchdog.spawn(|err| {
        std::process::exit(err.exit_code().unwrap_or(EXIT_MEMORY_LIMIT));
    });

    // -----------------------------------------------------------------------
    // 3. Transport and supervisor
    // -----------------------------------------------------------------------
    let own = ctx
        .owner_jid()
        .unwrap_or_else(|| Jid::new("herald", USER_SERVER));
    let (transport, controller) = LoopbackTransport::new(own);
    controller.set_auto_open(true);

    let vault = CredentialVault::new(config.session_dir.clone());
    let router = Router::new(Arc::clone(&ctx)).on_message(LogMessages);
    let supervisor = Supervisor::new(
        Arc::clone(&ctx),
        Arc::new(transport),
        vault,
        store,
        router,
    );

    // -----------------------------------------------------------------------
    // 4. Run until Ctrl+C
    // -----------------------------------------------------------------------
    // The periodic flusher stops before the supervisor's final flush.
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
        flusher.abort();
    };

    if let Err(e) = supervisor.run(shutdown).await {
        error!(error = %e, kind = ?e.kind(), "shutdown incomplete");
    }

    Ok(())
}
