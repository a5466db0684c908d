//! Shared controller simulator for integration tests.
//!
//! The simulator sits on the far end of an in-memory duplex pipe and
//! behaves like a small SLC-class controller: it answers the link
//! handshake, serves protected-typed reads and writes out of an in-memory
//! file store, reports a configurable processor family, and can be
//! scripted to NAK, corrupt replies, ignore probes, or originate
//! unsolicited commands.

use async_trait::async_trait;
use bytes::Bytes;
use df1_driver::protocol::codec::{ControlOctet, LinkCodec, RxEvent, TxFrame};
use df1_driver::{
    ChecksumKind, Connector, Df1ChannelConfig, Df1Client, Parity, ProcessorFamily, ProtocolError,
    ProtocolKind, Transport,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::Level;

static INIT_TRACING: Once = Once::new();

/// Install a compact tracing subscriber once per test binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// When the simulator answers a bare ENQ probe.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqPolicy {
    Always,
    Never,
    /// Answer only when the client is configured exactly like this.
    Match {
        baud_rate: u32,
        parity: Parity,
        checksum: ChecksumKind,
    },
}

/// Scripted behavior for one simulated controller.
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub family: ProcessorFamily,
    /// Bare-NAK this many inbound frames before serving normally.
    pub nak_first: usize,
    /// Corrupt the checksum of this many replies before serving normally.
    pub corrupt_replies: usize,
    /// Record inbound frames without ever answering them.
    pub mute: bool,
    pub enq_policy: EnqPolicy,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            family: ProcessorFamily::Slc503,
            nak_first: 0,
            corrupt_replies: 0,
            mute: false,
            enq_policy: EnqPolicy::Always,
        }
    }
}

/// Everything the simulator observed, for assertions.
#[derive(Debug, Default)]
pub struct SimState {
    /// Application bodies of every frame received from the client.
    pub frames_received: Vec<Vec<u8>>,
    /// Bare control octets received from the client.
    pub controls_received: Vec<ControlOctet>,
    /// Data-table storage keyed by (file number, file type code).
    pub files: HashMap<(u8, u8), Vec<u8>>,
}

impl SimState {
    /// Bodies of protected-typed read/write commands only.
    pub fn typed_exchanges(&self) -> Vec<&Vec<u8>> {
        self.frames_received
            .iter()
            .filter(|b| {
                b.get(2) == Some(&0x0F)
                    && matches!(b.get(6).copied(), Some(0xA1 | 0xA2 | 0xAA | 0xAB))
            })
            .collect()
    }

    pub fn file(&self, file_number: u8, type_code: u8) -> &[u8] {
        self.files
            .get(&(file_number, type_code))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn seed_file(&mut self, file_number: u8, type_code: u8, data: Vec<u8>) {
        self.files.insert((file_number, type_code), data);
    }
}

pub type SharedSim = Arc<Mutex<SimState>>;

/// Out-of-band scripting of a live simulator connection.
pub enum SimCommand {
    /// Frame this application body and send it to the client.
    SendFrame(Vec<u8>),
}

/// Connector that starts a fresh simulator for every connect call.
pub struct SimConnector {
    pub options: SimOptions,
    pub state: SharedSim,
    commands: Mutex<Option<mpsc::Sender<SimCommand>>>,
}

impl SimConnector {
    pub fn new(options: SimOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Arc::new(Mutex::new(SimState::default())),
            commands: Mutex::new(None),
        })
    }

    /// Command channel of the most recent connection.
    pub fn commands(&self) -> mpsc::Sender<SimCommand> {
        self.commands
            .lock()
            .unwrap()
            .clone()
            .expect("no simulator connection yet")
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn connect(&self, config: &Df1ChannelConfig) -> Result<Box<dyn Transport>, ProtocolError> {
        let (client_io, sim_io) = duplex(4096);
        let mut options = self.options.clone();
        options.enq_policy = match &self.options.enq_policy {
            EnqPolicy::Match {
                baud_rate,
                parity,
                checksum,
            } => {
                let matches = config.serial.baud_rate == *baud_rate
                    && config.serial.parity == *parity
                    && config.checksum == *checksum;
                if matches {
                    EnqPolicy::Always
                } else {
                    EnqPolicy::Never
                }
            }
            other => other.clone(),
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        *self.commands.lock().unwrap() = Some(cmd_tx);
        tokio::spawn(run_simulator(
            sim_io,
            config.checksum,
            config.protocol,
            config.my_node,
            config.target_node,
            options,
            Arc::clone(&self.state),
            cmd_rx,
        ));
        Ok(Box::new(client_io))
    }
}

/// Build a client wired to a fresh simulator; returns the client and the
/// connector for state access and scripting.
pub fn sim_client(options: SimOptions) -> (Df1Client, Arc<SimConnector>) {
    sim_client_with(options, |_| {})
}

/// Like [`sim_client`], with a hook to adjust the channel configuration.
pub fn sim_client_with(
    options: SimOptions,
    tweak: impl FnOnce(&mut Df1ChannelConfig),
) -> (Df1Client, Arc<SimConnector>) {
    init_tracing();
    let connector = SimConnector::new(options);
    let mut config = Df1ChannelConfig::new("sim");
    config.max_ticks = 25;
    tweak(&mut config);
    let client = Df1Client::with_connector(config, Arc::clone(&connector) as Arc<dyn Connector>);
    (client, connector)
}

fn read_address_field(data: &[u8], at: &mut usize) -> u16 {
    if data.get(*at) == Some(&0xFF) {
        let value = u16::from_le_bytes([data[*at + 1], data[*at + 2]]);
        *at += 3;
        value
    } else {
        let value = u16::from(data[*at]);
        *at += 1;
        value
    }
}

fn element_width(type_code: u8) -> usize {
    match type_code {
        0x86 | 0x87 | 0x88 => 6,
        0x8A | 0x91 => 4,
        0x8D => 84,
        0x92 => 50,
        0x93 => 46,
        0x94 => 12,
        _ => 2,
    }
}

/// Serve one protected-typed command against the file store; returns the
/// reply data section.
fn serve_typed(state: &SharedSim, function: u8, data: &[u8]) -> Vec<u8> {
    let mut at = 0usize;
    let size = usize::from(data[at]);
    at += 1;
    let file_number = data[at];
    at += 1;
    let type_code = data[at];
    at += 1;
    let element = read_address_field(data, &mut at);
    let sub_element = if function == 0xA1 {
        0
    } else {
        read_address_field(data, &mut at)
    };
    let offset =
        usize::from(element) * element_width(type_code) + usize::from(sub_element) * 2;

    let mut sim = state.lock().unwrap();
    let storage = sim.files.entry((file_number, type_code)).or_default();
    match function {
        0xA1 | 0xA2 => {
            if storage.len() < offset + size {
                storage.resize(offset + size, 0);
            }
            storage[offset..offset + size].to_vec()
        }
        0xAA => {
            let payload = &data[at..];
            if storage.len() < offset + payload.len() {
                storage.resize(offset + payload.len(), 0);
            }
            storage[offset..offset + payload.len()].copy_from_slice(payload);
            Vec::new()
        }
        0xAB => {
            let set_mask = u16::from_le_bytes([data[at], data[at + 1]]);
            let value_mask = u16::from_le_bytes([data[at + 2], data[at + 3]]);
            if storage.len() < offset + 2 {
                storage.resize(offset + 2, 0);
            }
            let mut word = u16::from_le_bytes([storage[offset], storage[offset + 1]]);
            word = (word & !set_mask) | (value_mask & set_mask);
            storage[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn serve_df1(state: &SharedSim, family: ProcessorFamily, body: &[u8]) -> Option<Vec<u8>> {
    let command = body[2];
    if command > 0x1F {
        // Reply frame from the client (unsolicited echo); record only.
        return None;
    }
    let tns = [body[4], body[5]];
    let reply_data = match (command, body.get(6).copied()) {
        (0x06, Some(0x03)) => {
            let mut status = vec![0u8; 11];
            status[3] = family.code();
            status
        }
        (0x0F, Some(function)) if matches!(function, 0xA1 | 0xA2 | 0xAA | 0xAB) => {
            serve_typed(state, function, &body[7..])
        }
        _ => Vec::new(),
    };
    let mut reply = vec![body[1], body[0], command | 0x40, 0x00, tns[0], tns[1]];
    reply.extend_from_slice(&reply_data);
    Some(reply)
}

fn serve_dh485(state: &SharedSim, family: ProcessorFamily, body: &[u8]) -> Option<Vec<u8>> {
    // Command layout:
    // [dst|80][ctrl][src|80][88][src|80][01][01][len][cmd][sts][tl][th][fnc][data]
    if body.len() < 12 {
        return None;
    }
    let client = body[2] & 0x7F;
    let me = body[0] & 0x7F;
    let command = body[8];
    if command > 0x1F {
        return None;
    }
    let tns = [body[10], body[11]];
    let reply_data = match (command, body.get(12).copied()) {
        (0x06, Some(0x03)) => {
            let mut status = vec![0u8; 11];
            status[3] = family.code();
            status
        }
        (0x0F, Some(function)) if matches!(function, 0xA1 | 0xA2 | 0xAA | 0xAB) => {
            serve_typed(state, function, &body[13..])
        }
        _ => Vec::new(),
    };
    // Reply layout: [dst|80][ctrl][src|80][88][src|80][len][cmd][sts][tl][th][data]
    let mut reply = vec![
        client | 0x80,
        0x08,
        me | 0x80,
        0x88,
        me | 0x80,
        (4 + reply_data.len()) as u8,
        command | 0x40,
        0x00,
        tns[0],
        tns[1],
    ];
    reply.extend_from_slice(&reply_data);
    Some(reply)
}

#[allow(clippy::too_many_arguments)]
async fn run_simulator(
    io: DuplexStream,
    checksum: ChecksumKind,
    protocol: ProtocolKind,
    client_node: u8,
    my_node: u8,
    options: SimOptions,
    state: SharedSim,
    mut commands: mpsc::Receiver<SimCommand>,
) {
    // The simulator's decoder must accept frames addressed to it; for
    // DH485 that means filtering on its own node number.
    let codec = LinkCodec::new(checksum, protocol, my_node);
    let encoder = LinkCodec::new(checksum, protocol, my_node);
    let mut framed = Framed::new(io, codec);
    let mut naks_left = options.nak_first;
    let mut corrupt_left = options.corrupt_replies;
    let mut commands_open = true;

    let mut token_timer = tokio::time::interval(Duration::from_millis(20));

    loop {
        select! {
            _ = token_timer.tick(), if protocol == ProtocolKind::Dh485 => {
                let token = vec![client_node | 0x80, 0x00, my_node | 0x80];
                if framed.send(TxFrame::Payload(Bytes::from(token))).await.is_err() {
                    break;
                }
            }

            cmd = commands.recv(), if commands_open => {
                match cmd {
                    Some(SimCommand::SendFrame(body)) => {
                        if framed.send(TxFrame::Payload(Bytes::from(body))).await.is_err() {
                            break;
                        }
                    }
                    None => commands_open = false,
                }
            }

            item = framed.next() => {
                let event = match item {
                    Some(Ok(event)) => event,
                    _ => break,
                };
                match event {
                    RxEvent::Control(ControlOctet::Enq) => {
                        state.lock().unwrap().controls_received.push(ControlOctet::Enq);
                        if options.enq_policy == EnqPolicy::Always
                            && framed.send(TxFrame::Ack).await.is_err()
                        {
                            break;
                        }
                    }
                    RxEvent::Control(octet) => {
                        state.lock().unwrap().controls_received.push(octet);
                    }
                    RxEvent::Frame(frame) => {
                        if !frame.checksum_ok {
                            let _ = framed.send(TxFrame::Nak).await;
                            continue;
                        }
                        let body = frame.body.to_vec();
                        if options.mute {
                            state.lock().unwrap().frames_received.push(body);
                            continue;
                        }

                        if protocol == ProtocolKind::Df1 {
                            if naks_left > 0 {
                                naks_left -= 1;
                                state.lock().unwrap().frames_received.push(body);
                                if framed.send(TxFrame::Nak).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                            if framed.send(TxFrame::Ack).await.is_err() {
                                break;
                            }
                            state.lock().unwrap().frames_received.push(body.clone());
                            if let Some(reply) = serve_df1(&state, options.family, &body) {
                                if send_reply(&mut framed, &encoder, reply, &mut corrupt_left)
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        } else {
                            let Some(&control) = body.get(1) else { continue };
                            if control == 0x00 {
                                // Token came back with nothing queued.
                                continue;
                            }
                            if control == 0x18 {
                                continue;
                            }
                            if control & 0x0F == 0x08 {
                                state.lock().unwrap().frames_received.push(body.clone());
                                // Link-level acknowledge, then the reply.
                                let ack = vec![client_node | 0x80, 0x18, my_node | 0x80];
                                if framed.send(TxFrame::Payload(Bytes::from(ack))).await.is_err() {
                                    break;
                                }
                                if let Some(reply) = serve_dh485(&state, options.family, &body) {
                                    if send_reply(&mut framed, &encoder, reply, &mut corrupt_left)
                                        .await
                                        .is_err()
                                    {
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

/// Send a reply body, corrupting its trailer while the corruption budget
/// lasts.
async fn send_reply(
    framed: &mut Framed<DuplexStream, LinkCodec>,
    encoder: &LinkCodec,
    reply: Vec<u8>,
    corrupt_left: &mut usize,
) -> std::io::Result<()> {
    if *corrupt_left > 0 {
        *corrupt_left -= 1;
        let mut wire = encoder.frame_payload(&reply).to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        framed.get_mut().write_all(&wire).await?;
        framed.get_mut().flush().await?;
        return Ok(());
    }
    framed
        .send(TxFrame::Payload(Bytes::from(reply)))
        .await
        .map_err(std::io::Error::other)
}
