//! Monitor control
//!
//! Owns the receive worker: `start` binds the multicast socket and spawns
//! the loop, `stop` asks it to wind down cooperatively.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::config::Config;
use crate::display::{DisplaySink, MonitorEvent};
use crate::hamclock::DxNotifier;
use crate::qrz::CallsignLookup;
use crate::udp::listener::open_multicast_socket;
use crate::udp::{MonitorState, ReceiveLoop};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor already running")]
    AlreadyRunning,

    #[error("invalid multicast group: {0:?}")]
    InvalidGroup(String),

    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("failed to join multicast group {group}: {source}")]
    Join {
        group: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("UDP receive error: {0}")]
    Receive(#[source] io::Error),
}

pub struct Monitor {
    config: Config,
    state: Arc<MonitorState>,
    worker: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Arc::new(MonitorState::new()),
            worker: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Bind, join the group and spawn the receive worker.
    ///
    /// `Connected` is delivered before the first row. Every start gets a
    /// fresh station tracker, so the first STATUS after a restart is
    /// always looked up.
    pub fn start<L, N, S>(&mut self, lookup: L, notifier: N, mut sink: S) -> Result<(), MonitorError>
    where
        L: CallsignLookup + 'static,
        N: DxNotifier + 'static,
        S: DisplaySink + 'static,
    {
        if self.state.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }
        // A worker that was asked to stop may still be finishing its last row
        self.join();

        let group = self.config.multicast_group_addr()?;
        let port = self.config.multicast_port;
        let socket = open_multicast_socket(group, port, self.config.receive_timeout())?;

        self.state.set_running(true);
        sink.deliver(MonitorEvent::Connected { group, port });

        let receive_loop = ReceiveLoop::new(Box::new(lookup), Box::new(notifier), Box::new(sink));
        let state = self.state.clone();
        self.worker = Some(thread::spawn(move || {
            if let Err(e) = receive_loop.run(socket, &state) {
                log::error!("Monitor stopped on error: {}", e);
            }
        }));

        log::info!("Started monitor on {}:{}", group, port);
        Ok(())
    }

    /// Ask the worker to stop. Returns immediately; an in-flight lookup
    /// still completes and its row is delivered.
    pub fn stop(&self) {
        if self.state.is_running() {
            log::info!("Stopping monitor");
        }
        self.state.set_running(false);
    }

    /// Wait for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Monitor worker panicked");
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
