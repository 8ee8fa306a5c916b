//! In-process loopback endpoint.
//!
//! Echoes every `audio` message back to the session and records everything
//! it receives. Fault injection (refused connects, connect delays, severed
//! links, injected remote messages) makes it the transport for integration
//! tests and for `voxlink --loopback`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Connection, Connector, RemoteEnd, WireMessage, LINK_CAPACITY};
use crate::error::{Result, VoxError};

#[derive(Debug)]
enum Control {
    Sever,
    Inject(WireMessage),
}

#[derive(Default)]
struct State {
    failures_remaining: usize,
    connect_delay: Option<Duration>,
    attempts: usize,
    received: Vec<WireMessage>,
    control: Option<mpsc::UnboundedSender<Control>>,
}

/// Cloneable handle; clones share one endpoint.
#[derive(Clone)]
pub struct LoopbackConnector {
    state: Arc<Mutex<State>>,
    echo: bool,
    capacity: usize,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            echo: true,
            capacity: LINK_CAPACITY,
        }
    }

    /// Refuse the next `n` connect attempts.
    pub fn with_failures(self, n: usize) -> Self {
        self.fail_next(n);
        self
    }

    /// Hold every connect attempt for `delay` before answering.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.lock().connect_delay = Some(delay);
        self
    }

    /// Record audio without echoing it.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn fail_next(&self, n: usize) {
        self.state.lock().failures_remaining = n;
    }

    /// Connect attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Every message received, across all links.
    pub fn received(&self) -> Vec<WireMessage> {
        self.state.lock().received.clone()
    }

    /// Sequence numbers of the audio received so far.
    pub fn received_audio_seqs(&self) -> Vec<u64> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(|m| match m {
                WireMessage::Audio { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    pub fn is_linked(&self) -> bool {
        self.state
            .lock()
            .control
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Drop the active link from the remote side. Returns `false` if none.
    pub fn sever(&self) -> bool {
        self.send_control(Control::Sever)
    }

    /// Deliver `msg` to the session as if the remote had sent it.
    pub fn inject(&self, msg: WireMessage) -> bool {
        self.send_control(Control::Inject(msg))
    }

    fn send_control(&self, control: Control) -> bool {
        self.state
            .lock()
            .control
            .as_ref()
            .is_some_and(|c| c.send(control).is_ok())
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<Connection> {
        let delay = {
            let mut state = self.state.lock();
            state.attempts += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state.lock();
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                debug!(attempt = state.attempts, "loopback refusing connection");
                return Err(VoxError::Transport("loopback endpoint refused connection".into()));
            }
        }

        let (connection, remote) = Connection::pair(self.capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.state.lock().control = Some(control_tx);
        tokio::spawn(serve(remote, control_rx, Arc::clone(&self.state), self.echo));
        info!("loopback link opened");
        Ok(connection)
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

async fn serve(
    remote: RemoteEnd,
    mut control: mpsc::UnboundedReceiver<Control>,
    state: Arc<Mutex<State>>,
    echo: bool,
) {
    let RemoteEnd {
        to_session,
        mut from_session,
    } = remote;

    loop {
        tokio::select! {
            msg = from_session.recv() => {
                let Some(msg) = msg else { break };
                state.lock().received.push(msg.clone());
                match msg {
                    WireMessage::Audio { .. } if echo => {
                        if to_session.send(msg).await.is_err() {
                            break;
                        }
                    }
                    WireMessage::SessionEnd { .. } => break,
                    _ => {}
                }
            }
            ctl = control.recv() => match ctl {
                Some(Control::Inject(msg)) => {
                    if to_session.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Control::Sever) | None => break,
            },
        }
    }
    // Mark the link closed before the session sees inbound end.
    drop(control);
    debug!("loopback link closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireSample;

    fn audio(seq: u64) -> WireMessage {
        WireMessage::Audio {
            seq,
            sample_rate: 16_000,
            data: WireSample::from_pcm16(&[seq as i16]),
        }
    }

    #[tokio::test]
    async fn echoes_audio_and_records_everything() {
        let lb = LoopbackConnector::new();
        let mut conn = lb.connect().await.unwrap();

        conn.outbound.send(WireMessage::session_start(16_000, 512)).await.unwrap();
        conn.outbound.send(audio(1)).await.unwrap();
        assert_eq!(conn.inbound.recv().await, Some(audio(1)));
        assert_eq!(lb.received().len(), 2);
        assert_eq!(lb.received_audio_seqs(), vec![1]);
    }

    #[tokio::test]
    async fn refuses_the_configured_number_of_attempts() {
        let lb = LoopbackConnector::new().with_failures(2);
        assert!(lb.connect().await.is_err());
        assert!(lb.connect().await.is_err());
        assert!(lb.connect().await.is_ok());
        assert_eq!(lb.attempts(), 3);
    }

    #[tokio::test]
    async fn sever_closes_inbound() {
        let lb = LoopbackConnector::new();
        let mut conn = lb.connect().await.unwrap();
        assert!(lb.sever());
        assert_eq!(conn.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn inject_reaches_the_session() {
        let lb = LoopbackConnector::new().without_echo();
        let mut conn = lb.connect().await.unwrap();
        let err = WireMessage::Error {
            code: Some("busy".into()),
            message: "try later".into(),
        };
        assert!(lb.inject(err.clone()));
        assert_eq!(conn.inbound.recv().await, Some(err));
    }

    #[tokio::test]
    async fn session_end_closes_the_link() {
        let lb = LoopbackConnector::new();
        let mut conn = lb.connect().await.unwrap();
        conn.outbound.send(WireMessage::session_end("done")).await.unwrap();
        assert_eq!(conn.inbound.recv().await, None);
        assert!(!lb.is_linked());
    }
}
