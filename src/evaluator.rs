use std::collections::HashMap;

use crate::circuit::{Circuit, WireId};
use crate::garbler::{decrypt_entry, GarbledTables, WireLabel, WireValue};
use crate::{PsiError, Result};

/// Evaluate a garbled circuit.
///
/// Starting from the (label, external bit) pairs held for both parties'
/// input wires, each gate's table entry is selected by the external bits of
/// the held inputs and decrypted under the held labels; the decrypted pair
/// becomes the value carried on the gate's output wire. Output truth bits
/// are recovered as `pbits_out[w] XOR external_bit[w]`.
///
/// # Arguments
/// * `circuit` - The clear circuit description
/// * `tables` - Garbled truth tables for every gate
/// * `pbits_out` - p-bits of the output wires
/// * `a_inputs` - The garbler's input wires: wire -> (label, external bit)
/// * `b_inputs` - The evaluator's input wires, obtained through OT
///
/// # Returns
/// * `Ok(HashMap<WireId, bool>)` - Recovered bit per output wire
/// * `Err(PsiError::ProtocolIntegrity)` - Missing table or entry, or a
///   failed authenticated decryption
pub fn evaluate(
    circuit: &Circuit,
    tables: &GarbledTables,
    pbits_out: &HashMap<WireId, bool>,
    a_inputs: &HashMap<WireId, WireValue>,
    b_inputs: &HashMap<WireId, WireValue>,
) -> Result<HashMap<WireId, bool>> {
    let mut values: HashMap<WireId, WireValue> = HashMap::new();
    values.extend(a_inputs.iter().map(|(&w, &v)| (w, v)));
    values.extend(b_inputs.iter().map(|(&w, &v)| (w, v)));

    for gate in &circuit.gates {
        let held: Vec<WireValue> = gate
            .inputs
            .iter()
            .map(|w| {
                values.get(w).copied().ok_or_else(|| {
                    PsiError::ProtocolIntegrity(format!("no value held for wire {w}"))
                })
            })
            .collect::<Result<_>>()?;

        let mut row = 0usize;
        for value in &held {
            row = (row << 1) | value.ebit as usize;
        }
        let labels: Vec<WireLabel> = held.iter().map(|v| v.label).collect();

        let table = tables.get(&gate.id).ok_or_else(|| {
            PsiError::ProtocolIntegrity(format!("no garbled table for gate {}", gate.id))
        })?;
        let entry = table.entries.get(row).ok_or_else(|| {
            PsiError::ProtocolIntegrity(format!(
                "garbled table for gate {} lacks row {row}",
                gate.id
            ))
        })?;

        let out = decrypt_entry(gate.id, row as u8, &labels, entry)?;
        values.insert(gate.id, out);
    }

    circuit
        .out
        .iter()
        .map(|&w| {
            let value = values.get(&w).ok_or_else(|| {
                PsiError::ProtocolIntegrity(format!("output wire {w} was never driven"))
            })?;
            let pbit = pbits_out.get(&w).ok_or_else(|| {
                PsiError::ProtocolIntegrity(format!("missing output p-bit for wire {w}"))
            })?;
            Ok((w, pbit ^ value.ebit))
        })
        .collect()
}
