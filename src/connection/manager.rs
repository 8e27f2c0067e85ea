//! Connection manager with a persistent controller link and automatic reconnection

use crate::transport::{LinkConnector, TextLink};
use anyhow::{anyhow, Result};
use playback_shared::{
    state_machine::{ConnectionState, Effect, LinkEvent, LinkStateMachine},
    timing, Backoff, CommandOutcome, CommandToken,
};
use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Link to the controller is open
    Connected { transport: &'static str },
    /// Link to the controller is gone; a reconnect is scheduled
    Disconnected { reason: String },
    /// Controller issued a command
    Command(CommandToken),
}

/// Outcome of a relayed command, handed back for acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    pub token: CommandToken,
    pub outcome: CommandOutcome,
}

/// Sender half used by the command relay to report outcomes
pub type ReportSender = mpsc::UnboundedSender<OutcomeReport>;

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Controller endpoint
    pub endpoint: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Growth factor of the reconnection delay
    pub reconnect_multiplier: f64,
    /// Keepalive interval while connected
    pub probe_interval: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: timing::CONTROLLER_ENDPOINT.into(),
            reconnect_delay: Duration::from_millis(timing::RECONNECT_INITIAL_MS),
            max_reconnect_delay: Duration::from_millis(timing::RECONNECT_MAX_MS),
            reconnect_multiplier: timing::RECONNECT_MULTIPLIER,
            probe_interval: Duration::from_millis(timing::PROBE_INTERVAL_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
        }
    }
}

impl ConnectionConfig {
    fn backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_delay,
            self.max_reconnect_delay,
            self.reconnect_multiplier,
        )
    }
}

#[derive(Debug)]
enum Control {
    Reconnect,
    Shutdown,
}

/// Control requests from the manager handle; a dropped handle counts as shutdown
struct Controls {
    rx: mpsc::UnboundedReceiver<Control>,
    open: bool,
}

impl Controls {
    async fn next(&mut self) -> Control {
        if !self.open {
            return pending().await;
        }
        match self.rx.recv().await {
            Some(control) => control,
            None => {
                self.open = false;
                Control::Shutdown
            }
        }
    }
}

/// Manages the persistent link to the controller
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// Channel for outcomes that may need an acknowledgment
    report_tx: ReportSender,
    control_tx: mpsc::UnboundedSender<Control>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new<C: LinkConnector>(config: ConnectionConfig, connector: C) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let controls = Controls {
            rx: control_rx,
            open: true,
        };
        let connection = ConnectionLoop::new(config.clone(), connector, controls, event_tx);
        let task = tokio::spawn(connection.run(report_rx));

        Self {
            config,
            report_tx,
            control_tx,
            event_rx,
            task,
        }
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Get a clone of the sender for outcome reports
    pub fn report_sender(&self) -> ReportSender {
        self.report_tx.clone()
    }

    /// Connect now instead of waiting for the scheduled reconnect
    pub fn reconnect(&self) -> Result<()> {
        self.control_tx
            .send(Control::Reconnect)
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Close the link, cancel all timers and wait for the loop to exit
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already be gone; joining below tells us either way
        let _ = self.control_tx.send(Control::Shutdown);
        self.task.await?;
        Ok(())
    }

    /// Get the controller endpoint
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

enum Flow {
    Continue,
    Halt,
}

/// Owns the link, the state machine and every timer handle
struct ConnectionLoop<C: LinkConnector> {
    config: ConnectionConfig,
    connector: C,
    fsm: LinkStateMachine,
    link: Option<C::Link>,
    probe: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    /// Events produced while applying effects, handled before waiting again
    pending: VecDeque<LinkEvent>,
    /// First error seen on the current link, reported when it finishes closing
    close_reason: Option<String>,
    controls: Controls,
    event_tx: mpsc::Sender<ConnectionEvent>,
}

impl<C: LinkConnector> ConnectionLoop<C> {
    fn new(
        config: ConnectionConfig,
        connector: C,
        controls: Controls,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let fsm = LinkStateMachine::new(config.backoff());
        Self {
            config,
            connector,
            fsm,
            link: None,
            probe: None,
            reconnect: None,
            pending: VecDeque::new(),
            close_reason: None,
            controls,
            event_tx,
        }
    }

    async fn run(mut self, mut report_rx: mpsc::UnboundedReceiver<OutcomeReport>) {
        info!("Connection loop starting: {}", self.config.endpoint);
        self.pending.push_back(LinkEvent::ConnectRequested);

        let mut reports_open = true;

        loop {
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => {
                    tokio::select! {
                        _ = next_tick(&mut self.probe) => LinkEvent::ProbeTick,
                        _ = next_fire(&mut self.reconnect) => {
                            self.reconnect = None;
                            LinkEvent::ReconnectTimerFired
                        }
                        received = next_payload(&mut self.link) => match received {
                            Ok(Some(payload)) => LinkEvent::Received(payload),
                            Ok(None) => {
                                self.link = None;
                                LinkEvent::TransportClosed {
                                    reason: "controller closed connection".into(),
                                }
                            }
                            Err(e) => LinkEvent::TransportError {
                                reason: e.to_string(),
                            },
                        },
                        report = report_rx.recv(), if reports_open => match report {
                            Some(OutcomeReport { token, outcome }) => {
                                LinkEvent::OutcomeReported { token, outcome }
                            }
                            None => {
                                reports_open = false;
                                continue;
                            }
                        },
                        control = self.controls.next() => match control {
                            Control::Reconnect => LinkEvent::ConnectRequested,
                            Control::Shutdown => LinkEvent::ShutdownRequested,
                        },
                    }
                }
            };

            if let Flow::Halt = self.step(event).await {
                break;
            }
        }

        info!("Connection loop stopped");
    }

    /// Feed one event through the state machine and carry out its effects
    async fn step(&mut self, event: LinkEvent) -> Flow {
        let from = self.fsm.state();
        let closed_reason = match &event {
            LinkEvent::TransportError { reason } | LinkEvent::SendFailed { reason } => {
                if from == ConnectionState::Open || from == ConnectionState::Connecting {
                    warn!("Transport error: {}", reason);
                    self.close_reason.get_or_insert_with(|| reason.clone());
                }
                None
            }
            LinkEvent::TransportClosed { reason } => Some(reason.clone()),
            LinkEvent::OutcomeReported { token, outcome } => {
                match outcome {
                    CommandOutcome::Success if from != ConnectionState::Open => {
                        warn!("Dropping ack for {}: not connected", token)
                    }
                    CommandOutcome::Failure(reason) => {
                        debug!("Command {} failed, no ack sent: {}", token, reason)
                    }
                    CommandOutcome::Success => {}
                }
                None
            }
            LinkEvent::Received(payload) => {
                debug!("Received from controller: {:?}", payload);
                None
            }
            _ => None,
        };

        let effects = self.fsm.handle(event);
        let to = self.fsm.state();

        if from != to {
            debug!("Connection state: {:?} -> {:?}", from, to);
            if to == ConnectionState::Open {
                let _ = self
                    .event_tx
                    .send(ConnectionEvent::Connected {
                        transport: self.connector.name(),
                    })
                    .await;
            } else if to == ConnectionState::Disconnected {
                let reason = self
                    .close_reason
                    .take()
                    .or(closed_reason)
                    .unwrap_or_else(|| "connection closed".into());
                let _ = self
                    .event_tx
                    .send(ConnectionEvent::Disconnected { reason })
                    .await;
            }
        }

        for effect in effects {
            if let Flow::Halt = self.apply(effect).await {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }

    async fn apply(&mut self, effect: Effect) -> Flow {
        match effect {
            Effect::OpenTransport => {
                debug!("Connecting to {} via {}", self.config.endpoint, self.connector.name());
                let attempt = timeout(self.config.connect_timeout, self.connector.connect());
                let event = match unless_shutdown(&mut self.controls, attempt).await {
                    Some(Ok(Ok(link))) => {
                        self.link = Some(link);
                        LinkEvent::TransportReady
                    }
                    Some(Ok(Err(e))) => LinkEvent::TransportError {
                        reason: format!("connect failed: {:#}", e),
                    },
                    Some(Err(_)) => LinkEvent::TransportError {
                        reason: format!("connect timed out after {:?}", self.config.connect_timeout),
                    },
                    // Dropping the attempt abandons the half-open connection
                    None => LinkEvent::ShutdownRequested,
                };
                self.pending.push_back(event);
            }
            Effect::CloseTransport => {
                let mut interrupted = false;
                if let Some(mut link) = self.link.take() {
                    let closing = timeout(self.config.connect_timeout, link.close());
                    match unless_shutdown(&mut self.controls, closing).await {
                        Some(Ok(Ok(()))) => {}
                        Some(Ok(Err(e))) => debug!("Error while closing link: {}", e),
                        Some(Err(_)) => debug!("Timed out closing link"),
                        None => interrupted = true,
                    }
                }
                self.pending.push_back(LinkEvent::TransportClosed {
                    reason: "closed by relay".into(),
                });
                if interrupted {
                    self.pending.push_back(LinkEvent::ShutdownRequested);
                }
            }
            Effect::StartProbe => {
                let period = self.config.probe_interval;
                let mut probe = interval_at(Instant::now() + period, period);
                probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.probe = Some(probe);
            }
            Effect::CancelProbe => {
                self.probe = None;
            }
            Effect::ScheduleReconnect(delay) => {
                info!("Reconnecting in {:?}", delay);
                self.reconnect = Some(Box::pin(sleep(delay)));
            }
            Effect::CancelReconnect => {
                self.reconnect = None;
            }
            Effect::Send(payload) => {
                let result = match self.link.as_mut() {
                    Some(link) => link.send_text(&payload).await,
                    None => Err(anyhow!("no open link")),
                };
                match result {
                    Ok(()) => debug!("Sent to controller: {:?}", payload),
                    Err(e) => self.pending.push_back(LinkEvent::SendFailed {
                        reason: format!("send failed: {:#}", e),
                    }),
                }
            }
            Effect::Forward(token) => {
                info!("Received command: {}", token);
                let _ = self.event_tx.send(ConnectionEvent::Command(token)).await;
            }
            Effect::Halt => return Flow::Halt,
        }
        Flow::Continue
    }
}

/// Drive `work` to completion unless a shutdown request arrives first
async fn unless_shutdown<F: Future>(controls: &mut Controls, work: F) -> Option<F::Output> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return Some(output),
            control = controls.next() => match control {
                Control::Shutdown => return None,
                Control::Reconnect => debug!("Reconnect request ignored, link is busy"),
            },
        }
    }
}

async fn next_tick(probe: &mut Option<Interval>) {
    match probe {
        Some(probe) => {
            probe.tick().await;
        }
        None => pending().await,
    }
}

async fn next_fire(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn next_payload<L: TextLink>(link: &mut Option<L>) -> Result<Option<String>> {
    match link {
        Some(link) => link.recv_text().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Controller side of an in-memory link
    struct Peer {
        to_relay: mpsc::UnboundedSender<String>,
        from_relay: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        fn say(&self, payload: &str) {
            self.to_relay.send(payload.to_string()).unwrap();
        }

        /// Drop our sending half so the relay sees the link close
        fn hang_up(&mut self) {
            let (detached, _) = mpsc::unbounded_channel();
            self.to_relay = detached;
        }

        fn drain(&mut self) -> Vec<String> {
            let mut sent = Vec::new();
            while let Ok(payload) = self.from_relay.try_recv() {
                sent.push(payload);
            }
            sent
        }
    }

    struct MockLink {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl TextLink for MockLink {
        async fn send_text(&mut self, payload: &str) -> Result<()> {
            self.outbound
                .send(payload.to_string())
                .map_err(|_| anyhow!("peer gone"))
        }

        async fn recv_text(&mut self) -> Result<Option<String>> {
            Ok(self.inbound.recv().await)
        }

        async fn close(&mut self) -> Result<()> {
            self.inbound.close();
            Ok(())
        }
    }

    fn mock_pair() -> (MockLink, Peer) {
        let (to_relay, inbound) = mpsc::unbounded_channel();
        let (outbound, from_relay) = mpsc::unbounded_channel();
        (MockLink { inbound, outbound }, Peer { to_relay, from_relay })
    }

    /// Hands out prepared links in order and refuses once they run out
    #[derive(Clone, Default)]
    struct MockConnector {
        links: Arc<Mutex<VecDeque<MockLink>>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl MockConnector {
        fn push_link(&self) -> Peer {
            let (link, peer) = mock_pair();
            self.links.lock().unwrap().push_back(link);
            peer
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LinkConnector for MockConnector {
        type Link = MockLink;

        async fn connect(&self) -> Result<MockLink> {
            self.attempts.lock().unwrap().push(Instant::now());
            self.links
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("connection refused"))
        }

        fn name(&self) -> &'static str {
            "Mock"
        }
    }

    fn gaps(attempts: &[Instant]) -> Vec<Duration> {
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delays_follow_backoff() {
        let connector = MockConnector::default();
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());

        // 0, 5, 12.5, 23.75, 40.625, 65.9375, 95.9375, 125.9375 seconds
        sleep(Duration::from_secs(126)).await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 8);

        // Timers fire on the next whole millisecond, so 25312.5ms shows up as 25313ms
        let mut backoff = Backoff::default();
        for gap in gaps(&attempts) {
            let delay = backoff.next_delay();
            assert!(
                gap >= delay && gap - delay < Duration::from_millis(1),
                "gap {:?}, expected {:?}",
                gap,
                delay
            );
        }
        assert_eq!(backoff.current(), Duration::from_millis(30000));

        match manager.recv().await {
            Some(ConnectionEvent::Disconnected { reason }) => {
                assert!(reason.contains("connection refused"), "reason: {}", reason)
            }
            other => panic!("unexpected event: {:?}", other),
        }
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_resets_backoff() {
        let connector = MockConnector::default();
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());

        // Fail at 0s and 5s, then succeed at 12.5s
        sleep(Duration::from_secs(6)).await;
        let peer = connector.push_link();
        sleep(Duration::from_secs(7)).await;
        assert_eq!(connector.attempts().len(), 3);

        loop {
            if let Some(ConnectionEvent::Connected { transport }) = manager.recv().await {
                assert_eq!(transport, "Mock");
                break;
            }
        }

        // Peer drops; the next reconnect waits the initial delay again
        let drop_at = Instant::now();
        drop(peer);
        sleep(Duration::from_secs(6)).await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[3] - drop_at, Duration::from_millis(5000));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_runs_only_while_open() {
        let connector = MockConnector::default();
        let mut first = connector.push_link();
        let manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());

        // No immediate ping on open; one per interval afterwards
        sleep(Duration::from_millis(9_999)).await;
        assert!(first.drain().is_empty());
        sleep(Duration::from_secs(30)).await;
        assert_eq!(first.drain(), vec!["ping", "ping", "ping"]);

        // Controller goes away: no pings while disconnected
        let mut second = connector.push_link();
        first.hang_up();
        sleep(Duration::from_millis(4_999)).await;
        assert!(first.drain().is_empty());
        assert!(second.drain().is_empty());

        // Reconnected at +5s; exactly one probe timer is running
        sleep(Duration::from_millis(1)).await;
        sleep(Duration::from_secs(35)).await;
        assert_eq!(second.drain(), vec!["ping"; 3]);
        assert!(first.drain().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_forwarded_and_acked() {
        let connector = MockConnector::default();
        let mut peer = connector.push_link();
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());

        assert!(matches!(
            manager.recv().await,
            Some(ConnectionEvent::Connected { .. })
        ));

        peer.say("hello");
        peer.say("pause");
        peer.say("play");

        assert_eq!(
            manager.recv().await,
            Some(ConnectionEvent::Command(CommandToken::Pause))
        );
        assert_eq!(
            manager.recv().await,
            Some(ConnectionEvent::Command(CommandToken::Play))
        );

        let reports = manager.report_sender();
        for (token, outcome) in [
            (CommandToken::Pause, CommandOutcome::Success),
            (CommandToken::Play, CommandOutcome::Failure("no target".into())),
            (CommandToken::Play, CommandOutcome::Success),
        ] {
            reports.send(OutcomeReport { token, outcome }).unwrap();
        }
        sleep(Duration::from_millis(10)).await;

        assert_eq!(peer.drain(), vec!["ack_pause", "ack_play"]);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_supersedes_timer() {
        let connector = MockConnector::default();
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts().len(), 1);

        let _peer = connector.push_link();
        manager.reconnect().unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts().len(), 2);

        // The timer scheduled after the first failure never fires a second connect
        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 2);

        let mut connected = 0;
        while let Ok(event) = manager.event_rx.try_recv() {
            if matches!(event, ConnectionEvent::Connected { .. }) {
                connected += 1;
            }
        }
        assert_eq!(connected, 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tokens_not_replayed_after_reconnect() {
        let connector = MockConnector::default();
        let first = connector.push_link();
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());
        assert!(matches!(
            manager.recv().await,
            Some(ConnectionEvent::Connected { .. })
        ));

        first.say("pause");
        assert_eq!(
            manager.recv().await,
            Some(ConnectionEvent::Command(CommandToken::Pause))
        );

        let second = connector.push_link();
        drop(first);
        assert!(matches!(
            manager.recv().await,
            Some(ConnectionEvent::Disconnected { .. })
        ));
        assert!(matches!(
            manager.recv().await,
            Some(ConnectionEvent::Connected { .. })
        ));

        second.say("play");
        assert_eq!(
            manager.recv().await,
            Some(ConnectionEvent::Command(CommandToken::Play))
        );
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnecting() {
        let connector = MockConnector::default();
        let _peer = connector.push_link();
        let manager = ConnectionManager::new(ConnectionConfig::default(), connector.clone());

        sleep(Duration::from_millis(10)).await;
        manager.shutdown().await.unwrap();

        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts().len(), 1);
    }

    /// Never finishes connecting
    struct HangingConnector;

    #[async_trait]
    impl LinkConnector for HangingConnector {
        type Link = MockLink;

        async fn connect(&self) -> Result<MockLink> {
            pending().await
        }

        fn name(&self) -> &'static str {
            "Hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_pending_connect() {
        let manager = ConnectionManager::new(ConnectionConfig::default(), HangingConnector);
        sleep(Duration::from_secs(1)).await;

        let started = Instant::now();
        manager.shutdown().await.unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "shutdown took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_ignored_while_connecting() {
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), HangingConnector);
        sleep(Duration::from_secs(1)).await;
        manager.reconnect().unwrap();

        // The pending attempt still runs into its own timeout
        let started = Instant::now();
        match manager.recv().await {
            Some(ConnectionEvent::Disconnected { reason }) => {
                assert!(reason.contains("timed out"), "reason: {}", reason)
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), HangingConnector);
        match manager.recv().await {
            Some(ConnectionEvent::Disconnected { reason }) => {
                assert!(reason.contains("timed out"), "reason: {}", reason)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
