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

//! The announce control loop (§4.6): a single cooperative task multiplexing
//! eight wakeup sources over timers and two 1-slot coalescing channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::announce::core::AnnounceCore;

/// Tunable timing constants for the control loop (§4.6, §9 "configuration"
/// ambient-stack addition). Defaults match the spec's stated periods
/// exactly so production behavior needs no overrides; tests shrink them.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// *shouldAnnounceCheck* period (spec: 5 s).
    pub should_announce_check_period: Duration,
    /// *shareCerts* period (spec: 5 min).
    pub share_certs_period: Duration,
    /// *pruneTick* period (spec: 10 min).
    pub prune_period: Duration,
    /// *updateVersionTick* period while announcing (spec: 5 min).
    pub update_version_period: Duration,
    /// Ticker period while in `HighFreqBeforeFirstPeer` /
    /// `HighFreqAfterFirstPeer` (spec: 1 min).
    pub query_enode_high_freq_period: Duration,
    /// Ticker period while in `LowFreq` (spec: implementation-configured;
    /// see DESIGN.md for the chosen default).
    pub query_enode_low_freq_period: Duration,
    /// Consensus epoch duration in blocks; epochs `<= 10` select the
    /// short first-emission delay and aggressive (`HighFreqBeforeFirstPeer`)
    /// initial frequency state, matching short-epoch test networks
    /// (spec: "5 s when configured epoch <= 10").
    pub epoch: u64,
    /// Emissions spent in `HighFreqAfterFirstPeer` before falling back to
    /// `LowFreq` (spec: 10).
    pub high_freq_after_first_peer_emissions: u32,
}

impl LoopConfig {
    /// Defaults matching spec §4.6 exactly, for a normal (non-test) epoch.
    pub fn production(epoch: u64) -> Self {
        Self {
            should_announce_check_period: Duration::from_secs(5),
            share_certs_period: Duration::from_secs(5 * 60),
            prune_period: Duration::from_secs(10 * 60),
            update_version_period: Duration::from_secs(5 * 60),
            query_enode_high_freq_period: Duration::from_secs(60),
            query_enode_low_freq_period: Duration::from_secs(10 * 60),
            epoch,
            high_freq_after_first_peer_emissions: 10,
        }
    }

    fn is_aggressive_epoch(&self) -> bool {
        self.epoch <= 10
    }

    fn first_emission_delay(&self) -> Duration {
        if self.is_aggressive_epoch() {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(60)
        }
    }
}

/// Adaptive frequency state for the query-enode publication ticker
/// (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryEnodeFrequencyState {
    HighFreqBeforeFirstPeer,
    HighFreqAfterFirstPeer,
    LowFreq,
}

/// Senders for the loop's two 1-slot coalescing channels (§4.6 items 6,
/// 7; §5 "Coalescing"). Cloneable; any number of external callers
/// (inbound handlers, tests, an RPC surface) may hold one.
#[derive(Clone)]
pub struct AnnounceLoopHandle {
    publication_tx: mpsc::Sender<()>,
    external_version_update_tx: mpsc::Sender<()>,
}

impl AnnounceLoopHandle {
    /// Request a query-enode publication. Non-blocking; a pending request
    /// already queued makes this a no-op (coalescing).
    pub fn request_publication(&self) {
        let _ = self.publication_tx.try_send(());
    }

    /// Request `updateAnnounceVersion` to run. Non-blocking; coalesced
    /// the same way.
    pub fn request_external_version_update(&self) {
        let _ = self.external_version_update_tx.try_send(());
    }
}

fn make_interval(period: Duration) -> Interval {
    let mut iv = interval(period);
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    iv
}

/// Run the announce control loop until `shutdown` is signalled (§4.6 item
/// 8, §5 "Cancellation"). Returns the handle used to drive items 6/7 from
/// outside the loop (e.g. from inbound handlers answering a query that
/// just learned of a new peer).
pub fn spawn(core: Arc<AnnounceCore>, config: LoopConfig, shutdown: watch::Receiver<bool>) -> (AnnounceLoopHandle, tokio::task::JoinHandle<()>) {
    let (publication_tx, publication_rx) = mpsc::channel(1);
    let (external_version_update_tx, external_version_update_rx) = mpsc::channel(1);
    let handle = AnnounceLoopHandle { publication_tx, external_version_update_tx };

    let join = tokio::spawn(run(core, config, shutdown, publication_rx, external_version_update_rx, handle.clone()));
    (handle, join)
}

async fn run(
    core: Arc<AnnounceCore>,
    config: LoopConfig,
    mut shutdown: watch::Receiver<bool>,
    mut publication_rx: mpsc::Receiver<()>,
    mut external_version_update_rx: mpsc::Receiver<()>,
    handle: AnnounceLoopHandle,
) {
    let mut should_announce_check = make_interval(config.should_announce_check_period);
    let mut share_certs_tick = make_interval(config.share_certs_period);
    let mut prune_tick = make_interval(config.prune_period);

    let mut announcing = false;
    let mut update_version_tick: Option<Interval> = None;
    let mut query_enode_tick: Option<Interval> = None;
    let mut frequency_state = QueryEnodeFrequencyState::LowFreq;
    let mut emissions_in_high_freq_after_first_peer: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("announce loop: shutdown signal received, stopping");
                    return;
                }
            }

            _ = should_announce_check.tick() => {
                let should_announce = core.should_announce();
                if should_announce && !announcing {
                    announcing = true;
                    info!("announce loop: transitioning to announcing");
                    if let Err(e) = core.update_announce_version().await {
                        warn!(err = ?e, "announce loop: updateAnnounceVersion failed on transition");
                    }

                    let delay = config.first_emission_delay();
                    let first_emission_handle = handle.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        first_emission_handle.request_publication();
                    });

                    frequency_state = if config.is_aggressive_epoch() {
                        QueryEnodeFrequencyState::HighFreqBeforeFirstPeer
                    } else {
                        QueryEnodeFrequencyState::LowFreq
                    };
                    emissions_in_high_freq_after_first_peer = 0;

                    let initial_period = match frequency_state {
                        QueryEnodeFrequencyState::LowFreq => config.query_enode_low_freq_period,
                        _ => config.query_enode_high_freq_period,
                    };
                    query_enode_tick = Some(make_interval(initial_period));
                    update_version_tick = Some(make_interval(config.update_version_period));
                } else if !should_announce && announcing {
                    announcing = false;
                    info!("announce loop: transitioning out of announcing");
                    query_enode_tick = None;
                    update_version_tick = None;
                }
            }

            _ = share_certs_tick.tick() => {
                if let Err(e) = share_version_certificates(&core).await {
                    warn!(err = ?e, "announce loop: shareCerts failed");
                }
            }

            _ = prune_tick.tick() => {
                prune(&core);
            }

            _ = tick_if_some(&mut update_version_tick), if announcing && update_version_tick.is_some() => {
                if let Err(e) = core.update_announce_version().await {
                    warn!(err = ?e, "announce loop: periodic updateAnnounceVersion failed");
                }
            }

            _ = tick_if_some(&mut query_enode_tick), if announcing && query_enode_tick.is_some() => {
                handle.request_publication();
            }

            Some(()) = publication_rx.recv() => {
                if core.should_announce() {
                    advance_frequency_state_and_publish(&core, &config, &mut frequency_state, &mut emissions_in_high_freq_after_first_peer, &mut query_enode_tick).await;
                }
            }

            Some(()) = external_version_update_rx.recv() => {
                drain_coalesced(&mut external_version_update_rx);
                if let Err(e) = core.update_announce_version().await {
                    warn!(err = ?e, "announce loop: externalVersionUpdate failed");
                }
            }
        }
    }
}

/// Poll an `Option<Interval>`, pending forever if `None` so the branch
/// above's `if announcing && ...is_some()` guard controls scheduling.
async fn tick_if_some(iv: &mut Option<Interval>) {
    match iv {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn drain_coalesced(rx: &mut mpsc::Receiver<()>) {
    while rx.try_recv().is_ok() {}
}

async fn advance_frequency_state_and_publish(
    core: &AnnounceCore,
    config: &LoopConfig,
    frequency_state: &mut QueryEnodeFrequencyState,
    emissions_in_high_freq_after_first_peer: &mut u32,
    query_enode_tick: &mut Option<Interval>,
) {
    if *frequency_state == QueryEnodeFrequencyState::HighFreqBeforeFirstPeer {
        let any_peer_connected = !core.transport.find_peers(None).await.is_empty();
        if any_peer_connected {
            *frequency_state = QueryEnodeFrequencyState::HighFreqAfterFirstPeer;
            *emissions_in_high_freq_after_first_peer = 0;
            debug!("announce loop: first peer connected, HighFreqBeforeFirstPeer -> HighFreqAfterFirstPeer");
        }
    }

    if *frequency_state == QueryEnodeFrequencyState::HighFreqAfterFirstPeer {
        *emissions_in_high_freq_after_first_peer += 1;
        if *emissions_in_high_freq_after_first_peer >= config.high_freq_after_first_peer_emissions {
            *frequency_state = QueryEnodeFrequencyState::LowFreq;
            *query_enode_tick = Some(make_interval(config.query_enode_low_freq_period));
            debug!("announce loop: HighFreqAfterFirstPeer -> LowFreq after {} emissions", config.high_freq_after_first_peer_emissions);
        }
    }

    let enforce_retry_backoff = *frequency_state == QueryEnodeFrequencyState::LowFreq;
    let version = core.announce_version();
    if let Err(e) = core.generate_and_gossip_query_enode(version, enforce_retry_backoff).await {
        warn!(err = ?e, "announce loop: generateAndGossipQueryEnode failed");
    }
}

/// *shareCerts* (§4.6 item 2): snapshot the whole version-certificate
/// table and gossip it verbatim. Receivers upsert novel entries and
/// regossip only those that advanced a stored version (§4.7), so
/// epidemic convergence happens without amplifying duplicates even
/// though every node broadcasts its whole table every 5 minutes.
async fn share_version_certificates(core: &AnnounceCore) -> Result<(), crate::announce::core::AnnounceError> {
    let all = core.version_certificate_table.get_all()?;
    if all.is_empty() {
        return Ok(());
    }
    let certs: Vec<_> = all.into_values().collect();
    let inner = crate::codec::VersionCertificatesMsg(certs).encode();
    let envelope = crate::codec::Envelope::unsigned(crate::codec::MessageCode::VersionCertificates, inner);
    let wire = envelope.encode();
    core.transport.gossip(crate::codec::MessageCode::VersionCertificates as u8, wire.clone()).await?;
    core.gossip.mark_processed_by_self(&wire);
    core.metrics.announce_version_certificates_sent_total.inc();
    Ok(())
}

/// *pruneTick* (§4.6 item 3): drop table/map rows for addresses outside
/// the current validator connection set.
fn prune(core: &AnnounceCore) {
    let keep_set = core.membership.validator_conn_set();
    let now = crate::announce::core::now_secs() as u64;

    match core.val_enode_table.prune_entries(&keep_set) {
        Ok(n) if n > 0 => debug!(removed = n, "announce loop: pruned val-enode table"),
        Ok(_) => {}
        Err(e) => warn!(err = ?e, "announce loop: val-enode prune failed"),
    }
    match core.version_certificate_table.prune(&keep_set) {
        Ok(n) if n > 0 => debug!(removed = n, "announce loop: pruned version-certificate table"),
        Ok(_) => {}
        Err(e) => warn!(err = ?e, "announce loop: version-certificate prune failed"),
    }
    core.gossip.prune(&keep_set, now);

    if let Ok(entries) = core.val_enode_table.get_val_enodes(None) {
        core.metrics.val_enode_table_size.set(entries.len() as i64);
    }
    if let Ok(entries) = core.version_certificate_table.get_all() {
        core.metrics.version_certificate_table_size.set(entries.len() as i64);
    }
}
