//! DF1 / DH485 link-layer session.
//!
//! One spawned task per link drives a `select!` loop over a cancellation
//! token, a 20 ms tick, the request channel and the framed byte stream.
//! The task owns the transaction table, the TNS counter, the ACK/NAK
//! handshake state and the DH485 token overlay; callers talk to it through
//! a [`LinkHandle`], and every exchange resolves through the waiter parked
//! in its transaction slot.

pub mod state;

use crate::protocol::codec::{ControlOctet, LinkCodec, RxEvent, TxFrame};
use crate::protocol::error::{ProtocolError, Sts};
use crate::protocol::frame::{
    self,
    defs::{CMD_REPLY_FLAG, DH485_CTRL_ACK, DH485_CTRL_DATA_NIBBLE, DH485_CTRL_TOKEN_PASS},
    PcccCommand, PcccReply,
};
use crate::types::{ChecksumKind, Df1ChannelConfig, ProtocolKind};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use state::{LinkState, SessionEvent, TnsCounter, TransactionTable};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// Wait-loop granularity; budgets are counted in ticks of this size.
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);
/// Link-level retransmissions after the first attempt.
const MAX_SEND_RETRIES: u8 = 2;
/// Turnaround compensation growth per corrupted frame, and its ceiling.
const TURNAROUND_STEP: Duration = Duration::from_millis(50);
const TURNAROUND_MAX: Duration = Duration::from_millis(400);

/// Link-layer parameters extracted from the channel configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub protocol: ProtocolKind,
    pub checksum: ChecksumKind,
    pub my_node: u8,
    pub target_node: u8,
    pub max_ticks: u32,
}

impl From<&Df1ChannelConfig> for LinkConfig {
    fn from(cfg: &Df1ChannelConfig) -> Self {
        Self {
            protocol: cfg.protocol,
            checksum: cfg.checksum,
            my_node: cfg.my_node,
            target_node: cfg.target_node,
            max_ticks: cfg.max_ticks,
        }
    }
}

/// How long an exchange keeps the caller waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// Wait for the link acknowledge and the matching reply frame.
    Full,
    /// Resolve as soon as the frame is on the wire (async write mode).
    FireAndForget,
}

enum LinkRequest {
    Exchange {
        command: PcccCommand,
        mode: ExchangeMode,
        reply: oneshot::Sender<Result<PcccReply, ProtocolError>>,
    },
    Probe {
        ticks: u32,
        reply: oneshot::Sender<Result<(), ProtocolError>>,
    },
}

/// Handle to a running link session.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<LinkRequest>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl LinkHandle {
    /// Spawn the session task over any byte transport.
    pub fn spawn<T>(io: T, config: LinkConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (events, _) = broadcast::channel(64);
        Self::spawn_with_events(io, config, events)
    }

    /// Spawn the session task publishing onto an existing event channel,
    /// so subscribers survive link reopen cycles.
    pub fn spawn_with_events<T>(
        io: T,
        config: LinkConfig,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (requests, request_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        tokio::spawn(run_link(
            io,
            config,
            request_rx,
            events.clone(),
            cancel.clone(),
        ));
        Self {
            requests,
            events,
            cancel,
        }
    }

    /// Run one PCCC exchange and return the parsed reply.
    ///
    /// A non-zero controller status is surfaced as
    /// [`ProtocolError::Status`].
    pub async fn exchange(
        &self,
        command: PcccCommand,
        mode: ExchangeMode,
    ) -> Result<PcccReply, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(LinkRequest::Exchange {
                command,
                mode,
                reply: tx,
            })
            .await
            .map_err(|_| ProtocolError::LinkClosed)?;
        rx.await.map_err(|_| ProtocolError::LinkClosed)?
    }

    /// Send a bare ENQ and wait up to `ticks` ticks for any ACK or NAK.
    pub async fn probe(&self, ticks: u32) -> Result<(), ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(LinkRequest::Probe { ticks, reply: tx })
            .await
            .map_err(|_| ProtocolError::LinkClosed)?;
        rx.await.map_err(|_| ProtocolError::LinkClosed)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Tear the session down; pending waiters resolve with `LinkClosed`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitAck,
    AwaitReply,
}

/// Send-side bookkeeping for the one in-flight exchange. The caller's
/// waiter lives in the transaction table under `slot`.
struct ActiveExchange {
    slot: u8,
    tns: u16,
    payload: Bytes,
    attempts: u8,
    nak_seen: bool,
    ticks: u32,
    phase: Phase,
}

impl ActiveExchange {
    fn exhausted_error(&self) -> ProtocolError {
        if self.nak_seen {
            ProtocolError::NotAcknowledged
        } else {
            ProtocolError::NoResponse
        }
    }
}

struct ProbeState {
    ticks: u32,
    budget: u32,
    reply: Option<oneshot::Sender<Result<(), ProtocolError>>>,
}

impl ProbeState {
    fn complete(mut self, result: Result<(), ProtocolError>) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(result);
        }
    }
}

/// What the tick or NAK handlers decided to do next with the active
/// exchange; acted on after all borrows are released.
enum SendAction {
    None,
    Resend(Bytes),
    Fail,
    FailTimeout,
}

async fn run_link<T>(
    io: T,
    config: LinkConfig,
    mut requests: mpsc::Receiver<LinkRequest>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec = LinkCodec::new(config.checksum, config.protocol, config.my_node);
    let mut framed = Framed::new(io, codec);

    let mut table = TransactionTable::new();
    let mut tns = TnsCounter::new();
    let mut turnaround = Duration::ZERO;
    let mut last_response_was_nak = false;
    let mut active: Option<ActiveExchange> = None;
    let mut probe: Option<ProbeState> = None;
    // DH485 one-slot outbound queue; cleared only by the peer's link ACK.
    let mut pending_out: Option<Bytes> = None;

    let mut tick = interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let _ = events.send(SessionEvent::LifecycleChanged(LinkState::Open));
    let mut failure: Option<String> = None;

    loop {
        select! {
            _ = cancel.cancelled() => {
                if let Some(a) = active.take() {
                    table.complete(a.slot, Err(ProtocolError::LinkClosed));
                }
                if let Some(p) = probe.take() {
                    p.complete(Err(ProtocolError::LinkClosed));
                }
                break;
            }

            _ = tick.tick() => {
                let probe_expired = match probe.as_mut() {
                    Some(p) => {
                        p.ticks += 1;
                        p.ticks >= p.budget
                    }
                    None => false,
                };
                if probe_expired {
                    if let Some(p) = probe.take() {
                        p.complete(Err(ProtocolError::NoResponse));
                    }
                }

                let action = match active.as_mut() {
                    Some(a) => {
                        a.ticks += 1;
                        if a.ticks < config.max_ticks {
                            SendAction::None
                        } else {
                            match a.phase {
                                Phase::AwaitReply => SendAction::FailTimeout,
                                Phase::AwaitAck if a.attempts > MAX_SEND_RETRIES => SendAction::Fail,
                                Phase::AwaitAck => {
                                    a.attempts += 1;
                                    a.ticks = 0;
                                    tracing::debug!(attempt = a.attempts, tns = a.tns, "resend after silence");
                                    if config.protocol == ProtocolKind::Df1 {
                                        SendAction::Resend(a.payload.clone())
                                    } else {
                                        // DH485 retransmission is token-driven:
                                        // the queued frame goes out again at
                                        // the next token pass.
                                        SendAction::None
                                    }
                                }
                            }
                        }
                    }
                    None => SendAction::None,
                };
                match action {
                    SendAction::None => {}
                    SendAction::FailTimeout => {
                        if let Some(a) = active.take() {
                            table.complete(a.slot, Err(ProtocolError::Timeout));
                        }
                    }
                    SendAction::Fail => {
                        pending_out = None;
                        if let Some(a) = active.take() {
                            let err = a.exhausted_error();
                            table.complete(a.slot, Err(err));
                        }
                    }
                    SendAction::Resend(payload) => {
                        if !turnaround.is_zero() {
                            sleep(turnaround).await;
                        }
                        if let Err(e) = framed.send(TxFrame::Payload(payload)).await {
                            failure = Some(e.to_string());
                            if let Some(a) = active.take() {
                                table.complete(a.slot, Err(ProtocolError::Io(e)));
                            }
                            break;
                        }
                    }
                }
            }

            req = requests.recv(), if active.is_none() && probe.is_none() => {
                match req {
                    None => break,
                    Some(LinkRequest::Probe { ticks, reply }) => {
                        if let Err(e) = framed.send(TxFrame::Enq).await {
                            let _ = reply.send(Err(ProtocolError::Io(e)));
                            failure = Some("probe write failed".to_string());
                            break;
                        }
                        probe = Some(ProbeState { ticks: 0, budget: ticks.max(1), reply: Some(reply) });
                    }
                    Some(LinkRequest::Exchange { command, mode, reply }) => {
                        let t = tns.next();
                        let slot = t as u8;
                        table.reset(slot);
                        let payload = match config.protocol {
                            ProtocolKind::Df1 => {
                                frame::encode_df1(config.target_node, config.my_node, t, &command)
                            }
                            ProtocolKind::Dh485 => frame::encode_dh485(
                                config.target_node,
                                config.my_node,
                                DH485_CTRL_DATA_NIBBLE,
                                t,
                                &command,
                            ),
                        };
                        match config.protocol {
                            ProtocolKind::Df1 => {
                                if !turnaround.is_zero() {
                                    sleep(turnaround).await;
                                }
                                if let Err(e) = framed.send(TxFrame::Payload(payload.clone())).await {
                                    let _ = reply.send(Err(ProtocolError::Io(e)));
                                    failure = Some("command write failed".to_string());
                                    break;
                                }
                            }
                            ProtocolKind::Dh485 => {
                                pending_out = Some(payload.clone());
                            }
                        }
                        if mode == ExchangeMode::FireAndForget {
                            let _ = reply.send(Ok(PcccReply {
                                command: command.command | CMD_REPLY_FLAG,
                                status: Sts(0),
                                tns: t,
                                data: Bytes::new(),
                            }));
                        } else {
                            table.arm(slot, reply);
                            active = Some(ActiveExchange {
                                slot,
                                tns: t,
                                payload,
                                attempts: 1,
                                nak_seen: false,
                                ticks: 0,
                                phase: Phase::AwaitAck,
                            });
                        }
                    }
                }
            }

            item = framed.next() => {
                let event = match item {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        failure = Some(e.to_string());
                        if let Some(a) = active.take() {
                            table.complete(a.slot, Err(ProtocolError::Io(e)));
                        }
                        break;
                    }
                    None => {
                        failure = Some("transport closed".to_string());
                        if let Some(a) = active.take() {
                            table.complete(a.slot, Err(ProtocolError::NoResponse));
                        }
                        if let Some(p) = probe.take() {
                            p.complete(Err(ProtocolError::NoResponse));
                        }
                        break;
                    }
                };

                match event {
                    RxEvent::Control(ControlOctet::Ack) => {
                        if let Some(p) = probe.take() {
                            p.complete(Ok(()));
                        }
                        if let Some(a) = active.as_mut() {
                            if a.phase == Phase::AwaitAck {
                                a.phase = Phase::AwaitReply;
                                a.ticks = 0;
                            }
                        }
                    }
                    RxEvent::Control(ControlOctet::Nak) => {
                        if let Some(p) = probe.take() {
                            // Any reply proves the framing settings agree.
                            p.complete(Ok(()));
                        }
                        let action = match active.as_mut() {
                            Some(a) if a.phase == Phase::AwaitAck => {
                                a.nak_seen = true;
                                if a.attempts > MAX_SEND_RETRIES {
                                    SendAction::Fail
                                } else {
                                    a.attempts += 1;
                                    a.ticks = 0;
                                    tracing::debug!(attempt = a.attempts, tns = a.tns, "resend after NAK");
                                    SendAction::Resend(a.payload.clone())
                                }
                            }
                            _ => SendAction::None,
                        };
                        match action {
                            SendAction::Resend(payload) => {
                                if !turnaround.is_zero() {
                                    sleep(turnaround).await;
                                }
                                if let Err(e) = framed.send(TxFrame::Payload(payload)).await {
                                    failure = Some(e.to_string());
                                    if let Some(a) = active.take() {
                                        table.complete(a.slot, Err(ProtocolError::Io(e)));
                                    }
                                    break;
                                }
                            }
                            SendAction::Fail => {
                                if let Some(a) = active.take() {
                                    let err = a.exhausted_error();
                                    table.complete(a.slot, Err(err));
                                }
                            }
                            _ => {}
                        }
                    }
                    RxEvent::Control(ControlOctet::Enq) => {
                        let answer = if last_response_was_nak {
                            TxFrame::Nak
                        } else {
                            TxFrame::Ack
                        };
                        if let Err(e) = framed.send(answer).await {
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                    RxEvent::Frame(link_frame) => {
                        if !link_frame.checksum_ok {
                            tracing::warn!("inbound frame failed checksum, sending NAK");
                            last_response_was_nak = true;
                            turnaround = (turnaround + TURNAROUND_STEP).min(TURNAROUND_MAX);
                            if let Err(e) = framed.send(TxFrame::Nak).await {
                                failure = Some(e.to_string());
                                break;
                            }
                            // The corrupted frame was this exchange's
                            // response; unblock the waiter with the local
                            // checksum failure.
                            if let Some(a) = active.take() {
                                table.complete(a.slot, Err(ProtocolError::LocalChecksum));
                            }
                            continue;
                        }

                        last_response_was_nak = false;
                        let body = link_frame.body;
                        match config.protocol {
                            ProtocolKind::Df1 => {
                                if let Err(e) = framed.send(TxFrame::Ack).await {
                                    failure = Some(e.to_string());
                                    break;
                                }
                                if let Some(echo) = handle_app_frame(
                                    &config,
                                    &mut table,
                                    &mut active,
                                    &events,
                                    &body,
                                ) {
                                    if let Err(e) = framed.send(TxFrame::Payload(echo)).await {
                                        failure = Some(e.to_string());
                                        break;
                                    }
                                }
                            }
                            ProtocolKind::Dh485 => {
                                let Some(&control) = body.get(1) else { continue };
                                if control == DH485_CTRL_TOKEN_PASS {
                                    let out = pending_out.clone().unwrap_or_else(|| {
                                        frame::encode_dh485_token_pass(
                                            config.target_node,
                                            config.my_node,
                                        )
                                    });
                                    if let Err(e) = framed.send(TxFrame::Payload(out)).await {
                                        failure = Some(e.to_string());
                                        break;
                                    }
                                } else if control == DH485_CTRL_ACK {
                                    pending_out = None;
                                    if let Some(a) = active.as_mut() {
                                        if a.phase == Phase::AwaitAck {
                                            a.phase = Phase::AwaitReply;
                                            a.ticks = 0;
                                        }
                                    }
                                } else if control & 0x0F == DH485_CTRL_DATA_NIBBLE {
                                    let peer = body.get(2).copied().unwrap_or(0) & 0x7F;
                                    let ack = frame::encode_dh485_ack(peer, config.my_node);
                                    if let Err(e) = framed.send(TxFrame::Payload(ack)).await {
                                        failure = Some(e.to_string());
                                        break;
                                    }
                                    if let Some(echo) = handle_app_frame(
                                        &config,
                                        &mut table,
                                        &mut active,
                                        &events,
                                        &body,
                                    ) {
                                        if let Err(e) = framed.send(TxFrame::Payload(echo)).await {
                                            failure = Some(e.to_string());
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let final_state = match failure {
        Some(reason) => {
            tracing::warn!(%reason, "link session terminated");
            LinkState::Failed(reason)
        }
        None => LinkState::Closed,
    };
    let _ = events.send(SessionEvent::LifecycleChanged(final_state));
}

/// Route a verified application frame: replies complete the waiter parked
/// in their transaction slot; unsolicited commands return the echo frame
/// to transmit.
fn handle_app_frame(
    config: &LinkConfig,
    table: &mut TransactionTable,
    active: &mut Option<ActiveExchange>,
    events: &broadcast::Sender<SessionEvent>,
    body: &Bytes,
) -> Option<Bytes> {
    let slot = frame::reply_slot(config.protocol, body);
    let command = frame::command_byte(config.protocol, body)?;

    if frame::is_reply_command(command) {
        match frame::parse_reply(config.protocol, body) {
            Ok(reply) => {
                let _ = events.send(SessionEvent::DataReceived { tns: reply.tns });
                if table.complete(slot, reply.check())
                    && active.as_ref().is_some_and(|a| a.slot == slot)
                {
                    active.take();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed reply");
                if table.complete(slot, Err(e))
                    && active.as_ref().is_some_and(|a| a.slot == slot)
                {
                    active.take();
                }
            }
        }
        return None;
    }

    // Unsolicited command from the controller: answer with the reply flag
    // and the echoed TNS, then notify subscribers.
    match frame::parse_reply(config.protocol, body) {
        Ok(message) => {
            let echo = match config.protocol {
                ProtocolKind::Df1 => {
                    let source = body.get(1).copied().unwrap_or(config.target_node);
                    frame::encode_df1_reply(source, config.my_node, command, message.tns)
                }
                ProtocolKind::Dh485 => {
                    let source = body.get(2).copied().unwrap_or(0) & 0x7F;
                    frame::encode_dh485(
                        source,
                        config.my_node,
                        DH485_CTRL_DATA_NIBBLE,
                        message.tns,
                        &PcccCommand {
                            command: command | CMD_REPLY_FLAG,
                            function: None,
                            data: Bytes::new(),
                        },
                    )
                }
            };
            let _ = events.send(SessionEvent::UnsolicitedMessage {
                command,
                tns: message.tns,
                data: message.data,
            });
            Some(echo)
        }
        Err(e) => {
            tracing::warn!(error = %e, "discarding malformed unsolicited frame");
            None
        }
    }
}
