//! Network reachability probe.
//!
//! `ProbeMonitor` opens a TCP connection to a well-known address on a fixed
//! interval and publishes the result as a [`Reachability`] on a watch channel.
//! Only transitions are published, so a session subscribed to it sees one
//! change per outage.

use std::time::Duration;

use mqttchat_session::{Reachability, TransportKind};
use tokio::{net::TcpStream, sync::watch, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::config::probe::ReachabilityConfig;

#[derive(Debug)]
pub struct ProbeMonitor {
    address: String,
    interval: Duration,
    timeout: Duration,
    state_tx: watch::Sender<Reachability>,
}

impl ProbeMonitor {
    /// Starts in the optimistic online state until the first probe says otherwise.
    pub fn new(config: &ReachabilityConfig) -> Self {
        let (state_tx, _) = watch::channel(Reachability::default());
        Self {
            address: config.probe_address.clone(),
            interval: config.interval(),
            timeout: config.timeout(),
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> Reachability {
        *self.state_tx.borrow()
    }

    /// Publishes `state` if its `online` flag differs from the current one.
    pub fn set_state(&self, state: Reachability) -> bool {
        let mut old = None;
        let changed = self.state_tx.send_if_modified(|current| {
            if current.online == state.online {
                return false;
            }
            old = Some(*current);
            *current = state;
            true
        });
        if let Some(old) = old {
            info!(
                "Reachability changed: {} ({}) -> {} ({})",
                label(old.online),
                old.transport,
                label(state.online),
                state.transport
            );
        }
        changed
    }

    /// One TCP connect attempt bounded by the timeout.
    pub async fn probe(&self) -> Reachability {
        match time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Reachability::online(TransportKind::Unknown),
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.address, e);
                Reachability::offline()
            }
            Err(_) => {
                debug!("Probe to {} timed out after {:?}", self.address, self.timeout);
                Reachability::offline()
            }
        }
    }

    /// Probes forever until every receiver is gone.
    pub async fn run(self) {
        debug!(
            "Reachability probe started: {} every {:?}",
            self.address, self.interval
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.state_tx.is_closed() {
                break;
            }
            let state = self.probe().await;
            if !state.online && self.current_state().online {
                warn!("Network unreachable via {}", self.address);
            }
            self.set_state(state);
        }
        debug!("Reachability probe stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

fn label(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}
