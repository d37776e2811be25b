use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, WireId};
use crate::garbler::{GarbledTables, WireValue};
use crate::group::PrimeGroup;
use crate::{PsiError, Result};

/// Endpoint both parties assume when none is configured.
pub const DEFAULT_ENDPOINT: &str = "tcp://localhost:4080";

/// Upper bound on a single frame; anything larger is a corrupt length
/// prefix, not a legitimate message.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

// The connecting side retries while the peer is still binding.
const CONNECT_RETRIES: u32 = 100;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Every message either party ever puts on the wire, as one tagged enum so
/// both sides agree on the shape of each exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Alice's opening token.
    Handshake,
    /// Bob's reply to the handshake: the size of his set.
    SetSize(u32),
    /// One garbled-circuit instance for Bob to evaluate.
    Entry(CircuitEntry),
    /// Generic acknowledgement.
    Ack,
    /// Alice's input wires: wire to (label, external bit).
    AliceInputs(HashMap<WireId, WireValue>),
    /// Bob names the wire the next oblivious transfer is for.
    WireRequest(WireId),
    /// OT: the freshly generated group.
    OtGroup(PrimeGroup),
    /// OT: the sender's commitment `c = g^r`.
    OtC(BigUint),
    /// OT: the element the receiver claims as the h0 slot. The sender
    /// derives the other slot as `h1 = c * h0^-1`.
    OtH(BigUint),
    /// OT: `c1 = g^k` together with both masked messages.
    OtTriple {
        /// `g^k`.
        c1: BigUint,
        /// `m0 XOR H(h0^k, |m0|)`.
        e0: Vec<u8>,
        /// `m1 XOR H(h1^k, |m1|)`.
        e1: Vec<u8>,
    },
    /// Bob's evaluation result: output wire to recovered bit.
    Result(HashMap<WireId, bool>),
    /// Alice is finished; Bob acknowledges and terminates.
    Done,
}

/// One garbled comparison shipped to Bob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitEntry {
    /// Index into Bob's set of the value to evaluate against.
    pub j: u32,
    /// The clear circuit description.
    pub circuit: Circuit,
    /// The encrypted gate tables.
    pub garbled_tables: GarbledTables,
    /// p-bits of the output wires only.
    pub pbits_out: HashMap<WireId, bool>,
}

/// Blocking request/reply channel over TCP carrying length-prefixed bincode
/// frames. Owned exclusively by the party's thread; the OT sub-protocol
/// borrows it serially.
#[derive(Debug)]
pub struct Channel {
    stream: TcpStream,
}

impl Channel {
    /// Connect to `endpoint`, retrying for a bounded time while the peer is
    /// still binding its listener.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let addr = connect_addr(endpoint);
        for _ in 1..CONNECT_RETRIES {
            if let Ok(stream) = TcpStream::connect(&addr) {
                return Ok(Self::from_stream(stream));
            }
            thread::sleep(CONNECT_RETRY_DELAY);
        }
        Ok(Self::from_stream(TcpStream::connect(&addr)?))
    }

    /// Bind `endpoint` and accept a single peer.
    pub fn accept(endpoint: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr(endpoint))?;
        let (stream, _peer) = listener.accept()?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream.
    pub(crate) fn from_stream(stream: TcpStream) -> Self {
        // lock-step request/reply: latency matters, batching never does
        let _ = stream.set_nodelay(true);
        Channel { stream }
    }

    /// Send one message.
    pub fn send(&mut self, msg: &Message) -> Result<()> {
        let payload = bincode::serialize(msg)
            .map_err(|e| PsiError::ProtocolIntegrity(format!("message encoding failed: {e}")))?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(PsiError::ProtocolIntegrity(
                "message exceeds frame limit".into(),
            ));
        }
        self.stream.write_all(&(payload.len() as u32).to_be_bytes())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Receive one message, blocking until the peer sends it.
    pub fn recv(&mut self) -> Result<Message> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(PsiError::ProtocolIntegrity(format!(
                "frame of {len} bytes exceeds limit"
            )));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        bincode::deserialize(&payload)
            .map_err(|e| PsiError::ProtocolIntegrity(format!("malformed message: {e}")))
    }

    /// Send a message and block for the peer's reply.
    pub fn send_wait(&mut self, msg: &Message) -> Result<Message> {
        self.send(msg)?;
        self.recv()
    }
}

/// Accept `tcp://host:port` (the conventional endpoint spelling) or a bare
/// `host:port`.
fn connect_addr(endpoint: &str) -> String {
    strip_scheme(endpoint).to_string()
}

/// Like [`connect_addr`], additionally mapping a `*` host to all interfaces.
fn bind_addr(endpoint: &str) -> String {
    let addr = strip_scheme(endpoint);
    match addr.strip_prefix("*:") {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

fn strip_scheme(endpoint: &str) -> &str {
    endpoint.strip_prefix("tcp://").unwrap_or(endpoint)
}
