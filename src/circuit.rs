use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PsiError, Result};

/// Identifier of a circuit wire.
pub type WireId = u32;

/// The closed set of boolean operators a gate may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOp {
    /// Logical conjunction
    And,
    /// Logical disjunction
    Or,
    /// Exclusive or
    Xor,
    /// Negation (unary)
    Not,
    /// Negated conjunction
    Nand,
    /// Negated disjunction
    Nor,
    /// Negated exclusive or
    Xnor,
}

impl GateOp {
    /// Number of input wires the operator consumes.
    pub fn arity(self) -> usize {
        if self == GateOp::Not {
            1
        } else {
            2
        }
    }

    /// Evaluate the operator's truth table. `inputs` must have length
    /// [`GateOp::arity`], which circuit validation guarantees for every gate.
    pub fn apply(self, inputs: &[bool]) -> bool {
        match self {
            GateOp::Not => !inputs[0],
            GateOp::And => inputs[0] && inputs[1],
            GateOp::Or => inputs[0] || inputs[1],
            GateOp::Xor => inputs[0] ^ inputs[1],
            GateOp::Nand => !(inputs[0] && inputs[1]),
            GateOp::Nor => !(inputs[0] || inputs[1]),
            GateOp::Xnor => !(inputs[0] ^ inputs[1]),
        }
    }

    /// The operator's name as it appears in circuit files.
    pub fn name(self) -> &'static str {
        match self {
            GateOp::And => "AND",
            GateOp::Or => "OR",
            GateOp::Xor => "XOR",
            GateOp::Not => "NOT",
            GateOp::Nand => "NAND",
            GateOp::Nor => "NOR",
            GateOp::Xnor => "XNOR",
        }
    }
}

impl fmt::Display for GateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// One gate: the output wire it drives, its operator, and its input wires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    /// The wire this gate drives.
    pub id: WireId,
    /// The boolean operator.
    pub op: GateOp,
    /// Input wires, length 1 for NOT and 2 otherwise.
    #[serde(rename = "in")]
    pub inputs: Vec<WireId>,
}

/// A boolean circuit: party-owned input wires, output wires, and gates in
/// evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    /// Free-form circuit name.
    pub id: String,
    /// Alice's input wires, in input-bit order.
    #[serde(default)]
    pub alice: Vec<WireId>,
    /// Bob's input wires, in input-bit order.
    #[serde(default)]
    pub bob: Vec<WireId>,
    /// Output wires; each must be driven by a gate.
    pub out: Vec<WireId>,
    /// Gates, topologically sorted.
    pub gates: Vec<Gate>,
}

/// Top-level shape of a circuit definition file: a list of circuits, of
/// which the first is used.
#[derive(Debug, Deserialize)]
struct CircuitFile {
    circuits: Vec<Circuit>,
}

/// Load and validate the first circuit of a JSON definition file.
pub fn load_circuit<P: AsRef<Path>>(path: P) -> Result<Circuit> {
    let data = std::fs::read_to_string(&path).map_err(|e| {
        PsiError::Config(format!(
            "cannot read circuit file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    let file: CircuitFile = serde_json::from_str(&data)
        .map_err(|e| PsiError::Config(format!("malformed circuit file: {e}")))?;
    let circuit = file
        .circuits
        .into_iter()
        .next()
        .ok_or_else(|| PsiError::Config("circuit file holds no circuits".into()))?;
    circuit.validate().map_err(PsiError::Config)?;
    Ok(circuit)
}

impl Circuit {
    /// Check the structural invariants: every wire is sourced exactly once
    /// (as a party input or a single gate's output), gate arities match
    /// their operators, gates are evaluable in list order, and every output
    /// wire is driven by a gate.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut sourced: HashSet<WireId> = HashSet::new();
        for &w in self.alice.iter().chain(self.bob.iter()) {
            if !sourced.insert(w) {
                return Err(format!("wire {w} sourced more than once"));
            }
        }
        for gate in &self.gates {
            if gate.inputs.len() != gate.op.arity() {
                return Err(format!(
                    "gate {} has {} inputs but {} takes {}",
                    gate.id,
                    gate.inputs.len(),
                    gate.op,
                    gate.op.arity()
                ));
            }
            for &w in &gate.inputs {
                if !sourced.contains(&w) {
                    return Err(format!("gate {} reads wire {w} before it is driven", gate.id));
                }
            }
            if !sourced.insert(gate.id) {
                return Err(format!("wire {} sourced more than once", gate.id));
            }
        }
        for &w in &self.out {
            if !self.gates.iter().any(|g| g.id == w) {
                return Err(format!("output wire {w} is not driven by any gate"));
            }
        }
        Ok(())
    }

    /// Every wire mentioned anywhere in the circuit, each exactly once.
    pub fn wires(&self) -> Vec<WireId> {
        let mut seen = HashSet::new();
        let mut wires = Vec::new();
        let inputs = self.alice.iter().chain(self.bob.iter());
        let gate_wires = self
            .gates
            .iter()
            .flat_map(|g| g.inputs.iter().chain(std::iter::once(&g.id)));
        for &w in inputs.chain(gate_wires) {
            if seen.insert(w) {
                wires.push(w);
            }
        }
        wires
    }

    /// Evaluate the circuit in the clear. `inputs` assigns a bit to every
    /// party input wire; the returned map covers the output wires.
    pub fn eval_plain(&self, inputs: &HashMap<WireId, bool>) -> Result<HashMap<WireId, bool>> {
        let mut values = inputs.clone();
        for gate in &self.gates {
            let in_bits: Vec<bool> = gate
                .inputs
                .iter()
                .map(|w| {
                    values.get(w).copied().ok_or_else(|| {
                        PsiError::Config(format!("wire {w} has no value during evaluation"))
                    })
                })
                .collect::<Result<_>>()?;
            values.insert(gate.id, gate.op.apply(&in_bits));
        }
        self.out
            .iter()
            .map(|&w| {
                values
                    .get(&w)
                    .copied()
                    .map(|b| (w, b))
                    .ok_or_else(|| PsiError::Config(format!("output wire {w} has no value")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gate(id: WireId, op: GateOp, inputs: &[WireId]) -> Gate {
        Gate { id, op, inputs: inputs.to_vec() }
    }

    /// (a XOR b) AND (NOT b) over alice wire 1 and bob wire 2.
    fn sample_circuit() -> Circuit {
        Circuit {
            id: "sample".into(),
            alice: vec![1],
            bob: vec![2],
            out: vec![5],
            gates: vec![
                gate(3, GateOp::Xor, &[1, 2]),
                gate(4, GateOp::Not, &[2]),
                gate(5, GateOp::And, &[3, 4]),
            ],
        }
    }

    #[test]
    fn test_gate_op_truth_tables() {
        let cases = [
            (GateOp::And, [false, false, false, true]),
            (GateOp::Or, [false, true, true, true]),
            (GateOp::Xor, [false, true, true, false]),
            (GateOp::Nand, [true, true, true, false]),
            (GateOp::Nor, [true, false, false, false]),
            (GateOp::Xnor, [true, false, false, true]),
        ];
        for (op, expected) in cases {
            for (row, want) in expected.iter().enumerate() {
                let a = row & 2 != 0;
                let b = row & 1 != 0;
                assert_eq!(op.apply(&[a, b]), *want, "{op} row {row}");
            }
        }
        assert!(GateOp::Not.apply(&[false]));
        assert!(!GateOp::Not.apply(&[true]));
    }

    #[test]
    fn test_validate_sample() {
        sample_circuit().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_arity() {
        let mut circuit = sample_circuit();
        circuit.gates[1].inputs = vec![1, 2];
        assert!(circuit.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_use_before_driven() {
        let mut circuit = sample_circuit();
        circuit.gates.swap(0, 2);
        assert!(circuit.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_double_source() {
        let mut circuit = sample_circuit();
        circuit.gates[1].id = 3;
        assert!(circuit.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_undriven_output() {
        let mut circuit = sample_circuit();
        circuit.out = vec![9];
        assert!(circuit.validate().is_err());
    }

    #[test]
    fn test_eval_plain_all_rows() {
        let circuit = sample_circuit();
        for row in 0..4u8 {
            let a = row & 2 != 0;
            let b = row & 1 != 0;
            let inputs = HashMap::from([(1, a), (2, b)]);
            let out = circuit.eval_plain(&inputs).unwrap();
            assert_eq!(out[&5], (a ^ b) && !b, "row {row}");
        }
    }

    #[test]
    fn test_wires_enumerates_everything() {
        let wires = sample_circuit().wires();
        assert_eq!(wires.len(), 5);
        for w in 1..=5 {
            assert!(wires.contains(&w));
        }
    }

    #[test]
    fn test_load_circuit_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"circuits": [{{
                "id": "tiny",
                "alice": [1],
                "bob": [2],
                "out": [3],
                "gates": [{{"id": 3, "op": "XNOR", "in": [1, 2]}}]
            }}]}}"#
        )
        .unwrap();
        let circuit = load_circuit(file.path()).unwrap();
        assert_eq!(circuit.id, "tiny");
        assert_eq!(circuit.gates[0].op, GateOp::Xnor);
    }

    #[test]
    fn test_load_circuit_missing_file() {
        assert!(load_circuit("no/such/file.json").is_err());
    }

    #[test]
    fn test_eq32_circuit_definition() {
        let circuit = load_circuit("circuits/eq32.json").unwrap();
        assert_eq!(circuit.alice.len(), 32);
        assert_eq!(circuit.bob.len(), 32);
        assert_eq!(circuit.out.len(), 1);

        // equality: all-equal inputs answer 1, any flipped bit answers 0
        let mut inputs = HashMap::new();
        for (&a, &b) in circuit.alice.iter().zip(circuit.bob.iter()) {
            inputs.insert(a, true);
            inputs.insert(b, true);
        }
        let out = circuit.eval_plain(&inputs).unwrap();
        assert!(out[&circuit.out[0]]);

        inputs.insert(circuit.bob[17], false);
        let out = circuit.eval_plain(&inputs).unwrap();
        assert!(!out[&circuit.out[0]]);
    }
}
