//! The select loop driving one node.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use murmur_transport::{BeaconFrame, BeaconSocket, Inbound, MurmurTransportError};

use crate::mailbox::MailboxSender;

use super::{Command, Engine};

/// Run the engine until `Stop` arrives or the command channel closes.
///
/// The mailbox sender is dropped on return, which unblocks an application
/// waiting in `recv()`.
pub(crate) async fn run_loop(
    mut engine: Engine,
    mut commands: mpsc::Receiver<Command>,
    mailbox: MailboxSender,
) {
    let mut beacon_tick = interval(Duration::from_millis(engine.config.interval_ms));
    beacon_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let sweep_period = (engine.config.evasive_ms / 2).clamp(100, 5_000);
    let mut sweep_tick = interval(Duration::from_millis(sweep_period));
    sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut gossip_tick = interval(Duration::from_millis(engine.config.interval_ms));
    gossip_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = beacon_tick.tick() => engine.broadcast_beacon().await,
            result = recv_beacon(&engine.beacon) => match result {
                Ok((frame, src)) => engine.handle_beacon(frame, src, &mailbox),
                Err(e) => debug!("beacon receive failed: {e}"),
            },
            Some(inbound) = engine.inbound_rx.recv() => {
                engine.handle_inbound(inbound, &mailbox);
            }
            Some(internal) = engine.internal_rx.recv() => {
                engine.handle_internal(internal);
            }
            Some(inbound) = recv_gossip(&mut engine.gossip_rx) => {
                engine.handle_gossip(inbound, &mailbox);
            }
            _ = sweep_tick.tick() => engine.sweep(&mailbox),
            _ = gossip_tick.tick() => engine.gossip_tick(),
            command = commands.recv() => match command {
                Some(Command::Stop) | None => break,
                Some(command) => engine.handle_command(command, &mailbox),
            },
        }
    }
    engine.shutdown().await;
}

async fn recv_beacon(
    beacon: &Option<BeaconSocket>,
) -> Result<(BeaconFrame, SocketAddr), MurmurTransportError> {
    match beacon {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_gossip(rx: &mut Option<mpsc::Receiver<Inbound>>) -> Option<Inbound> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
