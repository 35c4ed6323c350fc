//! # certmcp - local MCP control-plane for the certificate records database
//!
//! Exposes a fixed set of read-mostly tools and resources over the Model
//! Context Protocol so an agent can inspect award records, team members and
//! attachments without unrestricted access. Every call passes through one
//! security policy: mutations are refused unless unlocked, identity and phone
//! numbers are masked, and attachment reads are capped.
//!
//! ## Features
//!
//! - **Fixed tool catalog** - declared once, validated before any handler runs
//! - **Three bindings** - stdio, event-stream (`/sse`) and single-shot HTTP
//! - **Loopback only** - network bindings refuse non-loopback addresses
//! - **Supervisor** - health-probed child process with bounded restart
//! - **Debug console** - Basic-auth web surface relayed through `/sse`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use certmcp::config::ResolvedConfig;
//! use certmcp::protocol::Dispatcher;
//! use certmcp::shutdown::ShutdownCoordinator;
//!
//! # async fn example() -> certmcp::error::Result<()> {
//! let config = ResolvedConfig::load().await?;
//! let registry = certmcp::open_registry(&config).await?;
//! let shutdown = ShutdownCoordinator::new();
//! certmcp::transport::serve(&config, Dispatcher::new(registry), shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod exit;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod shutdown;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use config::{ResolvedConfig, TransportKind};
pub use error::{CertMcpError, Result};
pub use exit::ExitCode;
pub use protocol::Dispatcher;
pub use registry::ToolRegistry;
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{ProcessState, Supervisor};

use error::StoreError;
use std::sync::Arc;
use store::{Collaborators, FsAttachmentReader, SqliteStore};
use tooling::logging::format_bytes;
use tracing::info;

/// Open the external collaborators named by `config`
///
/// The database is opened read-only unless writes are allowed, and the
/// mutation interface is only wired in that case.
pub async fn open_collaborators(config: &ResolvedConfig) -> std::result::Result<Collaborators, StoreError> {
    let attachments_dir = &config.paths.attachments_dir;
    if !attachments_dir.is_dir() {
        return Err(StoreError::Unavailable(format!(
            "attachment root {} is not a directory",
            attachments_dir.display()
        )));
    }

    let writable = config.policy.allow_write;
    let store = Arc::new(SqliteStore::open(&config.paths.db_path, writable).await?);
    let attachments = Arc::new(FsAttachmentReader::new(attachments_dir));

    let collaborators = Collaborators::new(store.clone(), attachments);
    Ok(if writable {
        collaborators.with_mutations(store)
    } else {
        collaborators
    })
}

/// Build the tool registry for `config`
pub async fn open_registry(config: &ResolvedConfig) -> Result<ToolRegistry> {
    let collaborators = open_collaborators(config).await?;
    let registry = ToolRegistry::new(collaborators, Arc::new(config.policy));
    info!(
        transport = %config.transport,
        allow_write = config.policy.allow_write,
        redact_pii = config.policy.redact_pii,
        max_bytes = %format_bytes(config.policy.max_bytes),
        "Control-plane ready"
    );
    Ok(registry)
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
