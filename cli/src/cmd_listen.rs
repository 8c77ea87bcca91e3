//! `carbonwatch listen` and `carbonwatch history`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use carbonwatch_core::{EndpointConfig, EventCatalog, ListenerError};
use carbonwatch_evm::ContractInterface;
use carbonwatch_stream::{
    ConnectionManager, EventSink, LineFormat, LineSink, ListenerConfig, ReconnectConfig,
    SubscriptionRegistry, WsTransport,
};
use tokio_util::sync::CancellationToken;

use crate::{CmdResult, EndpointArgs};

/// Reconnect flags of `listen`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectArgs {
    pub reconnect: bool,
    pub max_reconnects: u32,
    pub backfill: bool,
}

pub async fn listen(args: &EndpointArgs, reconnect: ReconnectArgs, abi: Option<&Path>) -> CmdResult {
    let endpoint = resolve_endpoint(args)?;
    let config = ListenerConfig {
        handshake_timeout_ms: args.handshake_timeout_ms,
        reconnect: ReconnectConfig {
            enabled: reconnect.reconnect,
            max_attempts: reconnect.max_reconnects,
            backfill: reconnect.backfill,
            ..Default::default()
        },
    };
    let registry = catalog_registry(abi, line_format(args))?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    tracing::info!(%endpoint, reconnect = reconnect.reconnect, "starting listener");
    let mut manager =
        ConnectionManager::new(endpoint, config, Arc::new(WsTransport::new()), registry, cancel);
    let result = manager.run().await;

    let metrics = manager.metrics();
    tracing::info!(
        decoded = metrics.events_decoded,
        dropped = metrics.events_dropped,
        decode_errors = metrics.decode_errors,
        sink_errors = metrics.sink_errors,
        reconnections = metrics.reconnections,
        state = %manager.state(),
        "listener stopped"
    );
    result?;
    Ok(())
}

pub async fn history(
    args: &EndpointArgs,
    from_block: u64,
    to_block: Option<u64>,
    abi: Option<&Path>,
) -> CmdResult {
    if let Some(to) = to_block {
        if to < from_block {
            bail!("--to-block {to} is before --from-block {from_block}");
        }
    }
    let endpoint = resolve_endpoint(args)?;
    let config = ListenerConfig {
        handshake_timeout_ms: args.handshake_timeout_ms,
        ..Default::default()
    };
    let registry = catalog_registry(abi, line_format(args))?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let mut manager =
        ConnectionManager::new(endpoint, config, Arc::new(WsTransport::new()), registry, cancel);
    let delivered = manager
        .history(from_block, to_block)
        .await
        .with_context(|| format!("querying logs from block {from_block}"))?;
    tracing::info!(delivered, from_block, ?to_block, "history complete");
    Ok(())
}

fn resolve_endpoint(args: &EndpointArgs) -> Result<EndpointConfig, ListenerError> {
    let endpoint = EndpointConfig::resolve(
        args.contract.as_deref(),
        args.ws_url.as_deref(),
        args.url.as_deref(),
    )?;
    Ok(endpoint)
}

fn line_format(args: &EndpointArgs) -> LineFormat {
    if args.json {
        LineFormat::Json
    } else {
        LineFormat::Text
    }
}

/// One stdout sink subscribed to every catalog event. A descriptor the ABI
/// rejects is skipped; an empty registry is an error.
fn catalog_registry(abi: Option<&Path>, format: LineFormat) -> anyhow::Result<SubscriptionRegistry> {
    let registry = match abi {
        Some(path) => {
            let interface = ContractInterface::from_path(path)
                .with_context(|| format!("loading ABI from {}", path.display()))?;
            SubscriptionRegistry::with_interface(interface)
        }
        None => SubscriptionRegistry::new(),
    };

    let sink: Arc<dyn EventSink> = Arc::new(LineSink::stdout(format));
    for descriptor in &EventCatalog::carbon_credit() {
        match registry.subscribe_shared(descriptor.clone(), Arc::clone(&sink)) {
            Ok(handle) => tracing::debug!(%handle, event = %descriptor.name, "subscribed"),
            Err(e) => {
                let err = ListenerError::from(e);
                if err.is_fatal() {
                    return Err(err.into());
                }
                tracing::warn!(event = %descriptor.name, error = %err, "subscription rejected");
            }
        }
    }
    if registry.is_empty() {
        bail!("no catalog event could be subscribed");
    }
    Ok(registry)
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                cancel.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(contract: Option<&str>, ws: Option<&str>, url: Option<&str>) -> EndpointArgs {
        EndpointArgs {
            contract: contract.map(Into::into),
            ws_url: ws.map(Into::into),
            url: url.map(Into::into),
            handshake_timeout_ms: 10_000,
            json: false,
        }
    }

    #[test]
    fn missing_contract_is_a_config_error() {
        let err = resolve_endpoint(&args(None, Some("ws://localhost:8545"), None)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn streaming_url_is_preferred() {
        let endpoint = resolve_endpoint(&args(
            Some("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
            Some("ws://stream:8546"),
            Some("http://node:8545"),
        ))
        .unwrap();
        assert!(endpoint.transport_url.starts_with("ws://stream:8546"));
    }

    #[test]
    fn catalog_subscribes_every_event() {
        let registry = catalog_registry(None, LineFormat::Text).unwrap();
        assert_eq!(registry.len(), EventCatalog::carbon_credit().len());
    }

    #[test]
    fn rejected_event_leaves_the_others_subscribed() {
        let dir = std::env::temp_dir().join(format!("carbonwatch-abi-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("issued-only.json");
        std::fs::write(
            &path,
            r#"[{"type":"event","name":"CreditsIssued","anonymous":false,"inputs":[
                {"name":"to","type":"address","indexed":true},
                {"name":"amount","type":"uint256","indexed":false}]}]"#,
        )
        .unwrap();
        let registry = catalog_registry(Some(&path), LineFormat::Text).unwrap();
        assert_eq!(registry.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn catalog_is_checked_against_the_artifact() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures/abi/CarbonCredit.json");
        let registry = catalog_registry(Some(&path), LineFormat::Json).unwrap();
        assert_eq!(registry.len(), 3);
    }
}
