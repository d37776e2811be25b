use std::collections::HashMap;

use num_bigint::BigUint;
use rand_chacha::ChaCha12Rng;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use crate::circuit::{Circuit, WireId};
use crate::evaluator;
use crate::garbler::{GarbledTables, WireValue};
use crate::group::PrimeGroup;
use crate::logger::Logger;
use crate::transport::{Channel, Message};
use crate::{PsiError, Result};

/// The 1-out-of-2 oblivious transfer sub-protocol (Smart's Diffie-Hellman
/// construction), plus the input-exchange drivers built on it. Borrows the
/// party's channel and logger serially.
#[derive(Debug)]
pub struct ObliviousTransfer<'a> {
    channel: &'a mut Channel,
    logger: &'a mut Logger,
    prime_bits: u64,
}

impl<'a> ObliviousTransfer<'a> {
    /// Wrap the party's channel for one garbled-circuit exchange.
    pub fn new(channel: &'a mut Channel, logger: &'a mut Logger, prime_bits: u64) -> Self {
        ObliviousTransfer {
            channel,
            logger,
            prime_bits,
        }
    }

    /// Alice's side of one evaluation: ship her input values, answer one OT
    /// per wire Bob asks for, then collect Bob's result map.
    ///
    /// `b_keys` maps each of Bob's wires to its two (label, external bit)
    /// pairs, indexed by truth bit; exactly `b_keys.len()` transfers run.
    pub fn get_result(
        &mut self,
        a_inputs: HashMap<WireId, WireValue>,
        b_keys: &HashMap<WireId, (WireValue, WireValue)>,
        rng: &mut ChaCha12Rng,
    ) -> Result<HashMap<WireId, bool>> {
        self.logger.ot("Sending my input keys to Bob");
        self.channel.send(&Message::AliceInputs(a_inputs))?;

        for _ in 0..b_keys.len() {
            let wire = match self.channel.recv()? {
                Message::WireRequest(w) => w,
                other => return Err(unexpected("wire request", &other)),
            };
            self.logger.ot(&format!("Received wire ID {wire}"));
            let (v0, v1) = b_keys.get(&wire).ok_or_else(|| {
                PsiError::ProtocolIntegrity(format!("OT requested for unknown wire {wire}"))
            })?;
            self.send_one_of_two(&v0.to_bytes(), &v1.to_bytes(), rng)?;
        }

        match self.channel.recv()? {
            Message::Result(map) => Ok(map),
            other => Err(unexpected("evaluation result", &other)),
        }
    }

    /// Bob's side of one evaluation: receive Alice's inputs, obtain one
    /// label per own wire via OT (selection bit = the wire's clear bit),
    /// evaluate, and send the result map back.
    pub fn send_result(
        &mut self,
        circuit: &Circuit,
        garbled_tables: &GarbledTables,
        pbits_out: &HashMap<WireId, bool>,
        b_inputs_clear: &[(WireId, bool)],
        rng: &mut ChaCha12Rng,
    ) -> Result<HashMap<WireId, bool>> {
        let a_inputs = match self.channel.recv()? {
            Message::AliceInputs(map) => map,
            other => return Err(unexpected("Alice's inputs", &other)),
        };
        self.logger.ot("Received Alice's input keys");

        let mut b_inputs = HashMap::new();
        for &(wire, bit) in b_inputs_clear {
            self.logger.ot(&format!("Sending wire ID {wire}"));
            self.channel.send(&Message::WireRequest(wire))?;
            let bytes = self.receive_one_of_two(bit, rng)?;
            b_inputs.insert(wire, WireValue::from_bytes(&bytes)?);
        }

        let result = evaluator::evaluate(circuit, garbled_tables, pbits_out, &a_inputs, &b_inputs)?;
        self.logger.ot("Sending circuit evaluation result");
        self.channel.send(&Message::Result(result.clone()))?;
        Ok(result)
    }

    /// Sender side of one transfer. The receiver learns exactly one of
    /// (`m0`, `m1`); the sender learns nothing about which.
    fn send_one_of_two(&mut self, m0: &[u8], m1: &[u8], rng: &mut ChaCha12Rng) -> Result<()> {
        if m0.len() != m1.len() {
            return Err(PsiError::ProtocolIntegrity(
                "OT messages differ in length".into(),
            ));
        }
        self.logger.ot("OT protocol started");
        self.logger.ot(&format!("m_0 = {}", hex(m0)));
        self.logger.ot(&format!("m_1 = {}", hex(m1)));

        let group = PrimeGroup::generate(self.prime_bits, rng);
        self.logger.ot(&format!("Using G = {group}"));
        match self.channel.send_wait(&Message::OtGroup(group.clone()))? {
            Message::Ack => {}
            other => return Err(unexpected("group ack", &other)),
        }

        let c = group.gen_pow(&group.rand_int(rng));
        let h0 = match self.channel.send_wait(&Message::OtC(c.clone()))? {
            Message::OtH(h) => h,
            other => return Err(unexpected("receiver element", &other)),
        };
        self.logger.ot(&format!("Sent c = {c}"));
        self.logger.ot(&format!("Received h_0 = {h0}"));
        if !group.contains(&h0) {
            return Err(PsiError::ProtocolIntegrity(
                "receiver element outside the group".into(),
            ));
        }
        let h1 = group.mul(&c, &group.inv(&h0));
        self.logger
            .ot(&format!("Computing h_1 = c * h_0^-1 = {h1}"));

        let k = group.rand_int(rng);
        let c1 = group.gen_pow(&k);
        let e0 = xor_bytes(m0, &ot_hash(&group.pow(&h0, &k), m0.len()));
        let e1 = xor_bytes(m1, &ot_hash(&group.pow(&h1, &k), m1.len()));
        self.logger.ot(&format!("e_0 = {}", hex(&e0)));
        self.logger.ot(&format!("e_1 = {}", hex(&e1)));
        self.channel.send(&Message::OtTriple { c1, e0, e1 })?;
        self.logger.ot("OT protocol ended");
        Ok(())
    }

    /// Receiver side of one transfer; `choice` selects which of the
    /// sender's two messages is learned.
    fn receive_one_of_two(&mut self, choice: bool, rng: &mut ChaCha12Rng) -> Result<Vec<u8>> {
        self.logger.ot("OT protocol started");
        let group = match self.channel.recv()? {
            Message::OtGroup(g) => g,
            other => return Err(unexpected("OT group", &other)),
        };
        self.logger.ot(&format!("Received G = {group}"));
        self.channel.send(&Message::Ack)?;

        let c = match self.channel.recv()? {
            Message::OtC(c) => c,
            other => return Err(unexpected("sender commitment", &other)),
        };
        self.logger.ot(&format!("Received c = {c}"));
        if !group.contains(&c) {
            return Err(PsiError::ProtocolIntegrity(
                "sender commitment outside the group".into(),
            ));
        }

        let x = group.rand_int(rng);
        let x_pow = group.gen_pow(&x);
        // h_b = g^x, h_{1-b} = c * (g^x)^-1; whichever we claim as h_0 lets
        // the sender derive the other slot without learning b
        let claimed_h0 = if choice {
            group.mul(&c, &group.inv(&x_pow))
        } else {
            x_pow
        };
        let (c1, e0, e1) = match self.channel.send_wait(&Message::OtH(claimed_h0))? {
            Message::OtTriple { c1, e0, e1 } => (c1, e0, e1),
            other => return Err(unexpected("masked messages", &other)),
        };
        self.logger.ot(&format!("Received c_1 = {c1}"));
        self.logger.ot(&format!("e_0 = {}", hex(&e0)));
        self.logger.ot(&format!("e_1 = {}", hex(&e1)));

        let e = if choice { e1 } else { e0 };
        let mask = ot_hash(&group.pow(&c1, &x), e.len());
        let m = xor_bytes(&e, &mask);
        self.logger
            .ot(&format!("Computed m_{} = {}", choice as u8, hex(&m)));
        self.logger.ot("OT protocol ended");
        Ok(m)
    }
}

/// Derive `len` bytes from a group element: SHAKE-256 over the element's
/// minimal big-endian encoding.
pub fn ot_hash(shared: &BigUint, len: usize) -> Vec<u8> {
    let mut hasher = Shake256::default();
    hasher.update(&shared.to_bytes_be());
    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; len];
    reader.read(&mut out);
    out
}

/// XOR two equal-length byte strings.
pub fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn unexpected(wanted: &str, got: &Message) -> PsiError {
    PsiError::ProtocolIntegrity(format!("expected {wanted}, got {got:?}"))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::OutputMode;
    use rand::SeedableRng;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn channel_pair() -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (
            Channel::from_stream(server),
            Channel::from_stream(client.join().unwrap()),
        )
    }

    #[test]
    fn test_ot_hash_length_and_determinism() {
        let x = BigUint::from(123_456_789u64);
        let h1 = ot_hash(&x, 17);
        let h2 = ot_hash(&x, 17);
        assert_eq!(h1.len(), 17);
        assert_eq!(h1, h2);
        assert_ne!(h1, ot_hash(&BigUint::from(123_456_790u64), 17));
    }

    #[test]
    fn test_xor_bytes_involution() {
        let a = [0x12u8, 0x34, 0x56];
        let b = [0xff, 0x00, 0xaa];
        assert_eq!(xor_bytes(&xor_bytes(&a, &b), &b), a.to_vec());
    }

    #[test]
    fn test_receiver_learns_exactly_the_chosen_message() {
        for choice in [false, true] {
            let (mut sender_ch, mut receiver_ch) = channel_pair();
            let m0 = [0x11u8; 17];
            let m1 = [0x22u8; 17];

            let sender = thread::spawn(move || {
                let mut logger = Logger::new("Alice", OutputMode::Minimal).unwrap();
                let mut rng = rand_chacha::ChaCha12Rng::from_seed([21u8; 32]);
                let mut ot = ObliviousTransfer::new(&mut sender_ch, &mut logger, 48);
                ot.send_one_of_two(&m0, &m1, &mut rng).unwrap();
            });

            let mut logger = Logger::new("Bob", OutputMode::Minimal).unwrap();
            let mut rng = rand_chacha::ChaCha12Rng::from_seed([22u8; 32]);
            let mut ot = ObliviousTransfer::new(&mut receiver_ch, &mut logger, 48);
            let received = ot.receive_one_of_two(choice, &mut rng).unwrap();
            sender.join().unwrap();

            let expected = if choice { m1 } else { m0 };
            assert_eq!(received, expected.to_vec(), "choice {choice}");
        }
    }

    #[test]
    fn test_sender_rejects_unequal_lengths() {
        let (mut sender_ch, _receiver_ch) = channel_pair();
        let mut logger = Logger::new("Alice", OutputMode::Minimal).unwrap();
        let mut rng = rand_chacha::ChaCha12Rng::from_seed([23u8; 32]);
        let mut ot = ObliviousTransfer::new(&mut sender_ch, &mut logger, 48);
        assert!(ot.send_one_of_two(&[0u8; 4], &[0u8; 5], &mut rng).is_err());
    }
}
