use std::collections::HashMap;
use std::fmt;

use rand::RngCore;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::circuit::{Circuit, Gate, WireId};
use crate::{PsiError, Result};

/// Byte length of a wire label (128 bits).
pub const LABEL_BYTES: usize = 16;

/// Serialized length of a [`WireValue`]: label plus external bit. Both OT
/// payloads of an input wire have exactly this length.
pub const WIRE_VALUE_BYTES: usize = LABEL_BYTES + 1;

const TAG_BYTES: usize = 16;
const ENTRY_BYTES: usize = WIRE_VALUE_BYTES + TAG_BYTES;

// Domain separators for the two SHA-256 uses of the entry cipher.
const MASK_DOMAIN: &[u8] = b"psi.gate.mask";
const TAG_DOMAIN: &[u8] = b"psi.gate.tag";

/// 128-bit wire label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLabel([u8; LABEL_BYTES]);

impl WireLabel {
    /// Wrap raw label bytes.
    pub fn new(bytes: [u8; LABEL_BYTES]) -> Self {
        WireLabel(bytes)
    }

    /// Sample a fresh uniform label.
    pub fn random(rng: &mut ChaCha12Rng) -> Self {
        let mut bytes = [0u8; LABEL_BYTES];
        rng.fill_bytes(&mut bytes);
        WireLabel(bytes)
    }

    /// The raw label bytes.
    pub fn as_bytes(&self) -> &[u8; LABEL_BYTES] {
        &self.0
    }
}

/// A label together with the external bit carried beside it on a wire
/// during evaluation. The external bit is `p XOR truth-bit` and reveals
/// nothing because the p-bit stays with the garbler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireValue {
    /// The label held for the wire.
    pub label: WireLabel,
    /// The external (permuted) bit.
    pub ebit: bool,
}

impl WireValue {
    /// Fixed-length serialization, used as the OT message payload.
    pub fn to_bytes(self) -> [u8; WIRE_VALUE_BYTES] {
        let mut out = [0u8; WIRE_VALUE_BYTES];
        out[..LABEL_BYTES].copy_from_slice(self.label.as_bytes());
        out[LABEL_BYTES] = self.ebit as u8;
        out
    }

    /// Parse the fixed-length serialization.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != WIRE_VALUE_BYTES || bytes[LABEL_BYTES] > 1 {
            return Err(PsiError::ProtocolIntegrity("malformed wire value".into()));
        }
        let mut label = [0u8; LABEL_BYTES];
        label.copy_from_slice(&bytes[..LABEL_BYTES]);
        Ok(WireValue {
            label: WireLabel::new(label),
            ebit: bytes[LABEL_BYTES] == 1,
        })
    }
}

/// Garbled truth table of one gate: one authenticated ciphertext per row,
/// indexed by the external-bit tuple (`e_a * 2 + e_b` for binary gates,
/// `e_a` for NOT).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarbledGate {
    /// Row-indexed encrypted entries.
    pub entries: Vec<Vec<u8>>,
}

/// Gate id to garbled truth table.
pub type GarbledTables = HashMap<WireId, GarbledGate>;

/// One freshly garbled instance of a circuit: per-wire label pairs, p-bits
/// and the encrypted gate tables. Never reused across comparisons.
#[derive(Debug)]
pub struct GarbledCircuit {
    circuit: Circuit,
    keys: HashMap<WireId, (WireLabel, WireLabel)>,
    pbits: HashMap<WireId, bool>,
    tables: GarbledTables,
}

impl GarbledCircuit {
    /// Garble `circuit`: sample two fresh labels and one fresh p-bit per
    /// wire, then encrypt every gate's truth table in external-bit order.
    pub fn garble(circuit: &Circuit, rng: &mut ChaCha12Rng) -> Self {
        let mut keys = HashMap::new();
        let mut pbits = HashMap::new();
        for w in circuit.wires() {
            keys.insert(w, (WireLabel::random(rng), WireLabel::random(rng)));
            pbits.insert(w, rng.next_u32() & 1 == 1);
        }
        let mut tables = GarbledTables::new();
        for gate in &circuit.gates {
            tables.insert(gate.id, garble_gate(gate, &keys, &pbits));
        }
        GarbledCircuit {
            circuit: circuit.clone(),
            keys,
            pbits,
            tables,
        }
    }

    /// Label pairs for every wire.
    pub fn keys(&self) -> &HashMap<WireId, (WireLabel, WireLabel)> {
        &self.keys
    }

    /// p-bits for every wire.
    pub fn pbits(&self) -> &HashMap<WireId, bool> {
        &self.pbits
    }

    /// The encrypted gate tables.
    pub fn tables(&self) -> &GarbledTables {
        &self.tables
    }

    /// p-bits restricted to the circuit's output wires; the evaluator needs
    /// exactly these to turn external bits back into truth bits.
    pub fn pbits_out(&self) -> HashMap<WireId, bool> {
        self.circuit
            .out
            .iter()
            .map(|&w| (w, self.pbits[&w]))
            .collect()
    }

    /// The (label, external bit) pair carried on `wire` when its truth bit
    /// is `bit`.
    pub fn input_value(&self, wire: WireId, bit: bool) -> WireValue {
        let (k0, k1) = self.keys[&wire];
        WireValue {
            label: if bit { k1 } else { k0 },
            ebit: self.pbits[&wire] ^ bit,
        }
    }

    /// Both (label, external bit) pairs of `wire`, indexed by truth bit.
    /// These are the two OT messages for an evaluator input wire.
    pub fn value_pair(&self, wire: WireId) -> (WireValue, WireValue) {
        (self.input_value(wire, false), self.input_value(wire, true))
    }
}

impl fmt::Display for GarbledCircuit {
    /// Human-readable table dump, written to `output/tables.txt` in full
    /// output mode.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "garbled circuit {}", self.circuit.id)?;
        for gate in &self.circuit.gates {
            write!(f, "gate {:>4} {:<4} in={:?}", gate.id, gate.op, gate.inputs)?;
            for (row, entry) in self.tables[&gate.id].entries.iter().enumerate() {
                write!(f, "\n  [{row}] ")?;
                for byte in entry {
                    write!(f, "{byte:02x}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Encrypt all rows of one gate. For each external-bit tuple the plaintext
/// is the output (label, external bit) reached through the p-bit masking:
/// internal bit `b = e XOR p_in`, output bit `op(b...)`, output external
/// bit `p_out XOR op(b...)`.
fn garble_gate(
    gate: &Gate,
    keys: &HashMap<WireId, (WireLabel, WireLabel)>,
    pbits: &HashMap<WireId, bool>,
) -> GarbledGate {
    let (out_k0, out_k1) = keys[&gate.id];
    let p_out = pbits[&gate.id];
    let width = gate.inputs.len();
    let rows = 1usize << width;

    let mut entries = Vec::with_capacity(rows);
    for row in 0..rows {
        // external bits of this row, most significant first
        let ext: Vec<bool> = (0..width).map(|i| (row >> (width - 1 - i)) & 1 == 1).collect();
        let internal: Vec<bool> = gate
            .inputs
            .iter()
            .zip(&ext)
            .map(|(w, &e)| e ^ pbits[w])
            .collect();
        let out_bit = gate.op.apply(&internal);
        let plaintext = WireValue {
            label: if out_bit { out_k1 } else { out_k0 },
            ebit: p_out ^ out_bit,
        };
        // the labels an evaluator holding these external bits would carry
        let row_labels: Vec<WireLabel> = gate
            .inputs
            .iter()
            .zip(&internal)
            .map(|(w, &b)| {
                let (k0, k1) = keys[w];
                if b {
                    k1
                } else {
                    k0
                }
            })
            .collect();
        entries.push(encrypt_entry(gate.id, row as u8, &row_labels, plaintext));
    }
    GarbledGate { entries }
}

/// Context bytes binding an entry to its gate, row and input labels.
fn entry_context(gate_id: WireId, row: u8, labels: &[WireLabel]) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(5 + labels.len() * LABEL_BYTES);
    ctx.extend_from_slice(&gate_id.to_le_bytes());
    ctx.push(row);
    for label in labels {
        ctx.extend_from_slice(label.as_bytes());
    }
    ctx
}

fn keystream(ctx: &[u8]) -> [u8; WIRE_VALUE_BYTES] {
    let mut hasher = Sha256::new();
    hasher.update(MASK_DOMAIN);
    hasher.update(ctx);
    let digest = hasher.finalize();
    let mut out = [0u8; WIRE_VALUE_BYTES];
    out.copy_from_slice(&digest[..WIRE_VALUE_BYTES]);
    out
}

fn entry_tag(ctx: &[u8], plaintext: &[u8; WIRE_VALUE_BYTES]) -> [u8; TAG_BYTES] {
    let mut hasher = Sha256::new();
    hasher.update(TAG_DOMAIN);
    hasher.update(ctx);
    hasher.update(plaintext);
    let digest = hasher.finalize();
    let mut out = [0u8; TAG_BYTES];
    out.copy_from_slice(&digest[..TAG_BYTES]);
    out
}

/// Encrypt one table entry under the labels its row selects: SHA-256
/// keystream over the entry context, plus a 16-byte verification tag so the
/// evaluator can tell a correct decryption from a wrong one.
fn encrypt_entry(gate_id: WireId, row: u8, labels: &[WireLabel], value: WireValue) -> Vec<u8> {
    let ctx = entry_context(gate_id, row, labels);
    let plain = value.to_bytes();
    let stream = keystream(&ctx);
    let mut entry = Vec::with_capacity(ENTRY_BYTES);
    for i in 0..WIRE_VALUE_BYTES {
        entry.push(plain[i] ^ stream[i]);
    }
    entry.extend_from_slice(&entry_tag(&ctx, &plain));
    entry
}

/// Decrypt one table entry. A tag mismatch means the held labels were wrong
/// or the table was tampered with; either way the session is invalid.
pub(crate) fn decrypt_entry(
    gate_id: WireId,
    row: u8,
    labels: &[WireLabel],
    entry: &[u8],
) -> Result<WireValue> {
    if entry.len() != ENTRY_BYTES {
        return Err(PsiError::ProtocolIntegrity(format!(
            "garbled entry for gate {gate_id} has wrong length"
        )));
    }
    let ctx = entry_context(gate_id, row, labels);
    let stream = keystream(&ctx);
    let mut plain = [0u8; WIRE_VALUE_BYTES];
    for i in 0..WIRE_VALUE_BYTES {
        plain[i] = entry[i] ^ stream[i];
    }
    if entry_tag(&ctx, &plain)[..] != entry[WIRE_VALUE_BYTES..] {
        return Err(PsiError::ProtocolIntegrity(format!(
            "garbled entry for gate {gate_id} failed to decrypt"
        )));
    }
    WireValue::from_bytes(&plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Gate, GateOp};
    use rand::SeedableRng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::from_seed([3u8; 32])
    }

    fn and_circuit() -> Circuit {
        Circuit {
            id: "and".into(),
            alice: vec![1],
            bob: vec![2],
            out: vec![3],
            gates: vec![Gate {
                id: 3,
                op: GateOp::And,
                inputs: vec![1, 2],
            }],
        }
    }

    #[test]
    fn test_wire_value_roundtrip() {
        let mut rng = rng();
        let value = WireValue {
            label: WireLabel::random(&mut rng),
            ebit: true,
        };
        assert_eq!(WireValue::from_bytes(&value.to_bytes()).unwrap(), value);
    }

    #[test]
    fn test_wire_value_rejects_bad_length() {
        assert!(WireValue::from_bytes(&[0u8; LABEL_BYTES]).is_err());
    }

    #[test]
    fn test_entry_roundtrip() {
        let mut rng = rng();
        let labels = [WireLabel::random(&mut rng), WireLabel::random(&mut rng)];
        let value = WireValue {
            label: WireLabel::random(&mut rng),
            ebit: false,
        };
        let entry = encrypt_entry(7, 2, &labels, value);
        assert_eq!(decrypt_entry(7, 2, &labels, &entry).unwrap(), value);
    }

    #[test]
    fn test_entry_rejects_wrong_label() {
        let mut rng = rng();
        let labels = [WireLabel::random(&mut rng), WireLabel::random(&mut rng)];
        let value = WireValue {
            label: WireLabel::random(&mut rng),
            ebit: false,
        };
        let entry = encrypt_entry(7, 2, &labels, value);
        let wrong = [labels[0], WireLabel::random(&mut rng)];
        assert!(decrypt_entry(7, 2, &wrong, &entry).is_err());
    }

    #[test]
    fn test_entry_rejects_tampering() {
        let mut rng = rng();
        let labels = [WireLabel::random(&mut rng)];
        let value = WireValue {
            label: WireLabel::random(&mut rng),
            ebit: true,
        };
        let mut entry = encrypt_entry(4, 1, &labels, value);
        entry[0] ^= 0x80;
        assert!(decrypt_entry(4, 1, &labels, &entry).is_err());
    }

    #[test]
    fn test_table_shapes() {
        let mut rng = rng();
        let circuit = Circuit {
            id: "shapes".into(),
            alice: vec![1],
            bob: vec![2],
            out: vec![4],
            gates: vec![
                Gate {
                    id: 3,
                    op: GateOp::Not,
                    inputs: vec![1],
                },
                Gate {
                    id: 4,
                    op: GateOp::Xnor,
                    inputs: vec![3, 2],
                },
            ],
        };
        let garbled = GarbledCircuit::garble(&circuit, &mut rng);
        assert_eq!(garbled.tables()[&3].entries.len(), 2);
        assert_eq!(garbled.tables()[&4].entries.len(), 4);
    }

    #[test]
    fn test_fresh_material_per_garbling() {
        let mut rng = rng();
        let circuit = and_circuit();
        let g1 = GarbledCircuit::garble(&circuit, &mut rng);
        let g2 = GarbledCircuit::garble(&circuit, &mut rng);
        for w in circuit.wires() {
            assert_ne!(g1.keys()[&w], g2.keys()[&w], "wire {w} labels reused");
        }
    }

    #[test]
    fn test_input_value_relation() {
        let mut rng = rng();
        let circuit = and_circuit();
        let garbled = GarbledCircuit::garble(&circuit, &mut rng);
        let p = garbled.pbits()[&1];
        let (v0, v1) = garbled.value_pair(1);
        assert_eq!(v0.ebit, p);
        assert_eq!(v1.ebit, !p);
        assert_eq!(garbled.input_value(1, true), v1);
    }

    #[test]
    fn test_pbits_out_subset() {
        let mut rng = rng();
        let circuit = and_circuit();
        let garbled = GarbledCircuit::garble(&circuit, &mut rng);
        let out = garbled.pbits_out();
        assert_eq!(out.len(), 1);
        assert_eq!(out[&3], garbled.pbits()[&3]);
    }

    #[test]
    fn test_dump_mentions_gates() {
        let mut rng = rng();
        let garbled = GarbledCircuit::garble(&and_circuit(), &mut rng);
        let dump = garbled.to_string();
        assert!(dump.contains("gate"));
        assert!(dump.contains("AND"));
    }
}
