//! Command handlers for the GattMsg CLI

use std::time::Duration;

use gattmsg_ble::{spawn_central_adapter, spawn_peripheral_adapter};
use gattmsg_core::{
    observer_channel, spawn_central, spawn_peripheral, CentralHandle, Observer, ObserverEvent,
    ObserverReceiver, PeerId, ServiceDescriptor,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::printer::ConsolePrinter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Scan { seconds } => {
                let seconds = seconds.unwrap_or(config.cli.scan_seconds);
                Self::handle_scan_command(config, seconds).await
            }
            Commands::Chat { peer_id, seconds } => {
                let seconds = seconds.unwrap_or(config.cli.discovery_seconds);
                Self::handle_chat_command(config, PeerId::new(peer_id), seconds).await
            }
            Commands::Serve => Self::handle_serve_command(config).await,
        }
    }

    fn start_central(config: &AppConfig) -> (CentralHandle, JoinHandle<()>, ObserverReceiver) {
        // Both commands need a scan even when auto-scan is configured off
        let central_config = config.central.clone().with_scan_on_power_on(true);
        let (commands, events) = spawn_central_adapter(config.radio.to_ble_config());
        let (observer_tx, observer_rx) = observer_channel();
        let (central, task) = spawn_central(
            central_config,
            ServiceDescriptor::default(),
            commands,
            events,
            observer_tx,
        );
        (central, task, observer_rx)
    }

    /// Give an actor a moment to push its last commands to the radio
    async fn wait_for_actor(task: JoinHandle<()>) {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("Actor did not stop within {:?}", SHUTDOWN_GRACE);
        }
    }

    /// Handle the scan command
    async fn handle_scan_command(config: AppConfig, seconds: u64) -> Result<()> {
        info!("Scanning for {}s", seconds);
        let (central, task, mut observer) = Self::start_central(&config);
        let mut printer = ConsolePrinter::stdout();

        let deadline = sleep(Duration::from_secs(seconds));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                event = observer.recv() => match event {
                    Some(event) => event.deliver(&mut printer),
                    None => break,
                },
            }
        }

        let peers = central.peers().await?;
        println!("{} peer(s) found", peers.len());
        for peer in peers {
            let rssi = peer
                .last_seen_rssi
                .map_or_else(|| "?".to_string(), |r| r.to_string());
            println!("  {}  {}  rssi {}", peer.peer_id, peer.name_or_unknown(), rssi);
        }

        central.shutdown()?;
        Self::wait_for_actor(task).await;
        Ok(())
    }

    /// Handle the chat command
    async fn handle_chat_command(config: AppConfig, peer_id: PeerId, seconds: u64) -> Result<()> {
        let (central, task, mut observer) = Self::start_central(&config);
        let mut printer = ConsolePrinter::stdout();

        Self::wait_for_peer(&mut observer, &mut printer, &peer_id, seconds).await?;
        central.connect(peer_id.clone()).await?;
        Self::wait_for_subscription(&mut observer, &mut printer, &peer_id).await?;

        println!("Type a message and press enter. Ctrl+C quits.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => match line? {
                    Some(line) => {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = central.send_message(line.as_bytes().to_vec()).await {
                            warn!("Message not sent: {}", e);
                            println!("not sent: {}", e);
                        }
                    }
                    None => {
                        debug!("stdin closed");
                        break;
                    }
                },
                event = observer.recv() => match event {
                    Some(event) => {
                        let ended = matches!(event, ObserverEvent::Disconnected { .. });
                        event.deliver(&mut printer);
                        if ended {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        central.disconnect()?;
        central.shutdown()?;
        Self::wait_for_actor(task).await;
        Ok(())
    }

    async fn wait_for_peer<O: Observer>(
        observer: &mut ObserverReceiver,
        printer: &mut O,
        peer_id: &PeerId,
        seconds: u64,
    ) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(seconds);
        loop {
            let event = tokio::time::timeout_at(deadline, observer.recv())
                .await
                .map_err(|_| CliError::PeerNotFound {
                    peer_id: peer_id.to_string(),
                    seconds,
                })?;
            let Some(event) = event else {
                return Err(CliError::SessionEnded {
                    peer_id: peer_id.to_string(),
                    reason: "central stopped".to_string(),
                });
            };
            let found = matches!(&event, ObserverEvent::PeerDiscovered { peer_id: seen, .. } if seen == peer_id);
            event.deliver(printer);
            if found {
                return Ok(());
            }
        }
    }

    async fn wait_for_subscription<O: Observer>(
        observer: &mut ObserverReceiver,
        printer: &mut O,
        peer_id: &PeerId,
    ) -> Result<()> {
        while let Some(event) = observer.recv().await {
            let outcome = match &event {
                ObserverEvent::Subscribed { .. } => Some(Ok(())),
                ObserverEvent::ConnectFailed { error, .. }
                | ObserverEvent::DiscoveryFailed { error, .. } => Some(Err(error.to_string())),
                ObserverEvent::Disconnected { reason, .. } => Some(Err(reason
                    .clone()
                    .unwrap_or_else(|| "disconnected".to_string()))),
                _ => None,
            };
            event.deliver(printer);
            match outcome {
                Some(Ok(())) => return Ok(()),
                Some(Err(reason)) => {
                    return Err(CliError::SessionEnded {
                        peer_id: peer_id.to_string(),
                        reason,
                    })
                }
                None => {}
            }
        }
        Err(CliError::SessionEnded {
            peer_id: peer_id.to_string(),
            reason: "central stopped".to_string(),
        })
    }

    /// Handle the serve command
    async fn handle_serve_command(config: AppConfig) -> Result<()> {
        let (commands, events) = spawn_peripheral_adapter(config.radio.to_ble_config());
        let (observer_tx, mut observer) = observer_channel();
        let (peripheral, task) = spawn_peripheral(
            config.peripheral.clone(),
            ServiceDescriptor::default(),
            commands,
            events,
            observer_tx,
        );
        let mut printer = ConsolePrinter::stdout();
        info!("Serving as '{}'", config.peripheral.local_name);

        // Lines typed here go out to every subscriber
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line(), if stdin_open => match line? {
                    Some(line) => {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = peripheral.send_notification(line.as_bytes().to_vec()).await {
                            warn!("Notification not sent: {}", e);
                            println!("not sent: {}", e);
                        }
                    }
                    None => {
                        debug!("stdin closed, still serving");
                        stdin_open = false;
                    }
                },
                event = observer.recv() => match event {
                    Some(event) => {
                        if event == ObserverEvent::ServiceRegistered {
                            peripheral.start_advertising()?;
                        }
                        event.deliver(&mut printer);
                    }
                    None => break,
                },
            }
        }

        peripheral.shutdown()?;
        Self::wait_for_actor(task).await;
        Ok(())
    }
}
