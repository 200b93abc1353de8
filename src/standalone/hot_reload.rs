//! Hot reload for `cloudgate serve`.
//!
//! Watches cloudgate.toml with `notify`. Each change (debounced 100ms)
//! re-parses and validates the config and builds a fresh gateway. On success
//! the inner `Arc<Gateway>` is swapped and every connected peer is told the
//! tool list changed; on failure the previous gateway stays in service.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify::Watcher;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::standalone::server::{GatewayHandle, PeersHandle};

/// Watch `config_path` and swap in a rebuilt gateway on each change.
/// Returns when `cancel` fires or the watcher channel closes.
pub async fn run_hot_reload(
    config_path: PathBuf,
    gateway_handle: GatewayHandle,
    peers_handle: PeersHandle,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    // notify's EventHandler is implemented for FnMut, not for tokio senders
    let mut watcher = match notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to create file watcher for hot reload");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
        tracing::error!(
            path = %config_path.display(),
            error = %e,
            "failed to watch config file for hot reload"
        );
        return;
    }

    // Dropping the watcher silently stops events
    let _watcher = watcher;

    tracing::info!(path = %config_path.display(), "hot reload watching config file");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(Ok(_)) => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        while rx.try_recv().is_ok() {}

                        match reload_gateway(&config_path).await {
                            Ok(gateway) => {
                                let tools = gateway.registry().len();
                                let skills = gateway.skills().count();
                                {
                                    let mut guard = gateway_handle.write().await;
                                    *guard = Arc::new(gateway);
                                }
                                tracing::info!(
                                    tools,
                                    skills,
                                    path = %config_path.display(),
                                    "config reloaded"
                                );
                                notify_peers(&peers_handle).await;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    path = %config_path.display(),
                                    "hot reload failed, keeping previous gateway"
                                );
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "file watcher error during hot reload");
                    }
                    None => {
                        tracing::debug!("hot reload watcher channel closed");
                        return;
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("hot reload cancelled");
                return;
            }
        }
    }
}

/// Send tools-list-changed to every peer, dropping peers whose transport is gone.
async fn notify_peers(peers_handle: &PeersHandle) {
    let mut peers = peers_handle.lock().await;
    let mut live = Vec::with_capacity(peers.len());
    for peer in peers.drain(..) {
        match peer.notify_tool_list_changed().await {
            Ok(_) => live.push(peer),
            Err(e) => {
                tracing::debug!(error = %e, "pruning stale peer after tools-list-changed error");
            }
        }
    }
    *peers = live;
}

async fn reload_gateway(config_path: &Path) -> crate::Result<Gateway> {
    let config = GatewayConfig::load(config_path).await?;
    Gateway::from_config(&config)
}
