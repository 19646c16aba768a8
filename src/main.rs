// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Validator announce node entrypoint (systemd-friendly): loads
//! `AnnounceConfig`, wires up the keystore, membership, proxy and
//! transport collaborators into an `AnnounceCore`, then runs the
//! control loop alongside the inbound-message dispatch loop and the
//! `/metrics` + `/healthz` HTTP server until shut down.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use istanbul_announce::announce::core::AnnounceCore;
use istanbul_announce::announce::{handlers, loop_};
use istanbul_announce::codec::MessageCode;
use istanbul_announce::config::AnnounceConfig;
use istanbul_announce::crypto::keystore::Keystore;
use istanbul_announce::membership::{RegistrySetProvider, StaticSetProvider, ValidatorSetProvider};
use istanbul_announce::monitoring::metrics::Metrics;
use istanbul_announce::proxy::{NoProxy, ProxyEngine};
use istanbul_announce::tables::val_enode::ValEnodeTable;
use istanbul_announce::tables::version_certificate::VersionCertificateTable;
use istanbul_announce::transport::{AnnounceTransport, GossipsubTransport, TransportConfig};
use istanbul_announce::types::EnodeUrl;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt().with_target(false).with_level(true);
    let result = if cfg!(feature = "production") {
        subscriber.json().try_init()
    } else {
        subscriber.compact().try_init()
    };
    let _ = result;
}

fn build_membership(
    config: &AnnounceConfig,
    self_address: istanbul_announce::types::Address,
) -> Result<Arc<dyn ValidatorSetProvider>, Box<dyn std::error::Error>> {
    match config.registry_policy()? {
        Some((policy, signer_address)) => {
            let path = config
                .validator_registry
                .as_ref()
                .expect("registry_policy() returned Some only when configured")
                .path
                .to_string_lossy()
                .into_owned();
            Ok(Arc::new(RegistrySetProvider::standalone(path, signer_address, policy, self_address)))
        }
        None => {
            warn!("no validator_registry configured; running with a single-member static connection set");
            Ok(Arc::new(StaticSetProvider::standalone(self_address, HashSet::from([self_address]))))
        }
    }
}

async fn dispatch_inbound(core: Arc<AnnounceCore>, mut inbound: tokio::sync::mpsc::Receiver<istanbul_announce::transport::InboundMessage>) {
    while let Some(msg) = inbound.recv().await {
        let Ok(code) = MessageCode::try_from(msg.code) else {
            core.metrics.announce_invalid_envelope_total.inc();
            continue;
        };
        // The transport identifies senders by libp2p `NodeId`, not by
        // validator `Address` (that mapping doesn't exist until the
        // envelope is decoded and its signature recovered inside the
        // handler), so per-peer dedup buckets on the zero address.
        let from_peer = istanbul_announce::types::Address::ZERO;
        let result = match code {
            MessageCode::QueryEnode => handlers::handle_query_enode(&core, from_peer, &msg.payload).await,
            MessageCode::VersionCertificates => handlers::handle_version_certificates(&core, from_peer, &msg.payload).await,
            MessageCode::EnodeCertificate => handlers::handle_enode_certificate(&core, from_peer, &msg.payload).await,
        };
        if let Err(e) = result {
            warn!(peer = %msg.peer, err = ?e, "inbound announce message rejected");
        }
    }
    warn!("inbound message channel closed; dispatch loop exiting");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| env("ANNOUNCE_CONFIG_PATH", "config.toml"));
    let config = AnnounceConfig::load(std::path::Path::new(&config_path))?;
    std::fs::create_dir_all(&config.data_dir)?;

    let data_dir_str = config.data_dir.to_string_lossy().into_owned();
    let keystore = Arc::new(Keystore::open(&data_dir_str)?);
    let self_address = keystore.address();
    info!(address = %self_address, data_dir = %data_dir_str, "announce identity loaded");

    let metrics = Arc::new(Metrics::new()?);

    let db_path = config.data_dir.join("db");
    let db = sled::open(&db_path)?;
    let val_enode_table = ValEnodeTable::open(&db)?;
    let version_certificate_table = VersionCertificateTable::open(&db)?;

    let membership = build_membership(&config, self_address)?;

    let proxy: Arc<dyn ProxyEngine> = Arc::new(NoProxy);

    let self_node = EnodeUrl::parse(&config.p2p.self_enode)?;
    let transport_cfg = TransportConfig {
        listen_addr: config.p2p.listen_addr.clone(),
        data_dir: data_dir_str,
        bootstrap: config.p2p.bootstrap.clone(),
        self_node,
    };
    let (transport, transport_task) = GossipsubTransport::spawn(transport_cfg, metrics.clone())?;
    let inbound = transport.take_inbound();
    let transport: Arc<dyn AnnounceTransport> = Arc::new(transport);

    let core = Arc::new(AnnounceCore::new(
        keystore,
        membership,
        proxy,
        transport,
        val_enode_table,
        version_certificate_table,
        metrics.clone(),
    ));

    let metrics_addr = config.metrics_addr.parse()?;
    let metrics_for_http = metrics.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = istanbul_announce::monitoring::http::serve(metrics_addr, metrics_for_http).await {
            error!(err = ?e, "monitoring HTTP server exited");
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (_handle, loop_task) = loop_::spawn(core.clone(), config.loop_config(), shutdown_rx);
    let dispatch_task = tokio::spawn(dispatch_inbound(core, inbound));

    info!("announce node running; waiting for ctrl-c");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = loop_task.await;
    dispatch_task.abort();
    http_task.abort();
    transport_task.abort();
    Ok(())
}
