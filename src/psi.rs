use std::collections::{HashMap, HashSet};
use std::env;
use std::process::Command;

use indicatif::{ProgressBar, ProgressStyle};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

use crate::bits::{self, float_to_bits, format_set};
use crate::circuit::{load_circuit, Circuit, WireId};
use crate::garbler::{GarbledCircuit, WireValue};
use crate::group::DEFAULT_PRIME_BITS;
use crate::logger::{Logger, OutputMode};
use crate::ot::ObliviousTransfer;
use crate::transport::{Channel, CircuitEntry, Message, DEFAULT_ENDPOINT};
use crate::{PsiError, Result};

/// Path of the shipped 32-bit equality circuit.
pub const EQ32_CIRCUIT_PATH: &str = "circuits/eq32.json";

/// Environment variable test mode uses to give the child Bob a log prefix.
const LOG_PREFIX_ENV: &str = "PSI_LOG_PREFIX";

/// Knobs shared by both parties: endpoint, circuit path, group size and
/// verbosity, all injectable rather than process-wide.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the parties meet, e.g. `tcp://localhost:4080`.
    pub endpoint: String,
    /// Path of the equality-circuit definition file.
    pub circuit_path: String,
    /// Bit-length of the OT group modulus.
    pub prime_bits: u64,
    /// Output verbosity.
    pub mode: OutputMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: DEFAULT_ENDPOINT.into(),
            circuit_path: EQ32_CIRCUIT_PATH.into(),
            prime_bits: DEFAULT_PRIME_BITS,
            mode: OutputMode::Info,
        }
    }
}

/// Alice: garbler, OT sender, and driver of the pairwise comparison loop.
#[derive(Debug)]
pub struct Alice {
    channel: Channel,
    logger: Logger,
    vals: Vec<f32>,
    circuit: Circuit,
    config: Config,
    rng: ChaCha12Rng,
    m: u32,
}

impl Alice {
    /// Load the equality circuit and connect to Bob. Values are sorted into
    /// canonical order; the caller (set parsing) has already deduplicated
    /// them by bit pattern.
    pub fn new(mut vals: Vec<f32>, config: Config, logger: Logger) -> Result<Self> {
        let circuit = load_circuit(&config.circuit_path)?;
        if circuit.alice.len() != bits::FLOAT_BITS || circuit.bob.len() != bits::FLOAT_BITS {
            return Err(PsiError::Config(format!(
                "circuit {} does not compare two 32-bit inputs",
                circuit.id
            )));
        }
        vals.sort_by(|a, b| a.total_cmp(b));
        let channel = Channel::connect(&config.endpoint)?;
        Ok(Alice {
            channel,
            logger,
            vals,
            circuit,
            config,
            rng: fresh_rng(),
            m: 0,
        })
    }

    /// Handshake: announce the protocol and learn the size of Bob's set.
    pub fn setup(&mut self) -> Result<()> {
        self.logger.info("Waiting for Bob");
        self.m = match self.channel.send_wait(&Message::Handshake)? {
            Message::SetSize(m) => m,
            other => {
                return Err(PsiError::ProtocolIntegrity(format!(
                    "expected set size, got {other:?}"
                )))
            }
        };
        self.logger.info(&format!(
            "Alice has {} values, Bob has {} values",
            self.vals.len(),
            self.m
        ));
        self.logger.info("Starting PSI computation");
        Ok(())
    }

    /// Run the pairwise loop and return the matched values.
    ///
    /// A pair is skipped when Alice's value already matched or Bob's index
    /// was already consumed; equality is a bijection, so neither can match
    /// again.
    pub fn run(&mut self) -> Result<Vec<f32>> {
        let mut matched: Vec<f32> = Vec::new();
        let mut exclude: HashSet<u32> = HashSet::new();

        let bar = progress_bar(self.config.mode, self.vals.len() as u64);
        for i in 0..self.vals.len() {
            for j in 0..self.m {
                if bits::contains_bitwise(&matched, self.vals[i]) || exclude.contains(&j) {
                    continue;
                }
                if self.compare_single(i, j)? {
                    matched.push(self.vals[i]);
                    exclude.insert(j);
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        self.logger.info("PSI computation ended");
        self.logger.minimal(&format_set(&matched));
        match self.channel.send_wait(&Message::Done)? {
            Message::Ack => {}
            other => {
                return Err(PsiError::ProtocolIntegrity(format!(
                    "expected final ack, got {other:?}"
                )))
            }
        }
        Ok(matched)
    }

    /// Garble one fresh equality instance, ship it, and evaluate it against
    /// Bob's value at index `j`. Labels, p-bits and tables are never reused
    /// across comparisons.
    fn compare_single(&mut self, i: usize, j: u32) -> Result<bool> {
        let garbled = GarbledCircuit::garble(&self.circuit, &mut self.rng);
        self.logger.circuit(&garbled.to_string());

        let entry = CircuitEntry {
            j,
            circuit: self.circuit.clone(),
            garbled_tables: garbled.tables().clone(),
            pbits_out: garbled.pbits_out(),
        };
        match self.channel.send_wait(&Message::Entry(entry))? {
            Message::Ack => {}
            other => {
                return Err(PsiError::ProtocolIntegrity(format!(
                    "expected entry ack, got {other:?}"
                )))
            }
        }

        let bits_a = float_to_bits(self.vals[i]);
        let a_inputs: HashMap<WireId, WireValue> = self
            .circuit
            .alice
            .iter()
            .zip(&bits_a)
            .map(|(&w, &bit)| (w, garbled.input_value(w, bit)))
            .collect();
        let b_keys: HashMap<WireId, (WireValue, WireValue)> = self
            .circuit
            .bob
            .iter()
            .map(|&w| (w, garbled.value_pair(w)))
            .collect();

        let mut ot =
            ObliviousTransfer::new(&mut self.channel, &mut self.logger, self.config.prime_bits);
        let result = ot.get_result(a_inputs, &b_keys, &mut self.rng)?;

        let out_wire = self
            .circuit
            .out
            .first()
            .ok_or_else(|| PsiError::Config("equality circuit has no output wire".into()))?;
        result.get(out_wire).copied().ok_or_else(|| {
            PsiError::ProtocolIntegrity(format!("result lacks output wire {out_wire}"))
        })
    }
}

/// Bob: evaluator and OT receiver.
#[derive(Debug)]
pub struct Bob {
    channel: Channel,
    logger: Logger,
    vals: Vec<f32>,
    config: Config,
    rng: ChaCha12Rng,
    matched: Vec<f32>,
}

impl Bob {
    /// Bind the endpoint and wait for Alice to connect.
    pub fn new(mut vals: Vec<f32>, config: Config, mut logger: Logger) -> Result<Self> {
        vals.sort_by(|a, b| a.total_cmp(b));
        logger.info("Waiting for Alice");
        let channel = Channel::accept(&config.endpoint)?;
        Ok(Bob {
            channel,
            logger,
            vals,
            config,
            rng: fresh_rng(),
            matched: Vec::new(),
        })
    }

    /// Serve Alice until she sends the termination message; returns Bob's
    /// view of the intersection.
    pub fn listen(&mut self) -> Result<Vec<f32>> {
        match self.channel.recv()? {
            Message::Handshake => {}
            _ => return Err(PsiError::ProtocolHandshake),
        }
        self.logger.info("Starting PSI computation");
        self.channel.send(&Message::SetSize(self.vals.len() as u32))?;

        loop {
            match self.channel.recv()? {
                Message::Done => {
                    self.channel.send(&Message::Ack)?;
                    break;
                }
                Message::Entry(entry) => {
                    self.channel.send(&Message::Ack)?;
                    self.eval_single(entry)?;
                }
                other => {
                    return Err(PsiError::ProtocolIntegrity(format!(
                        "expected circuit entry, got {other:?}"
                    )))
                }
            }
        }

        self.logger.info("PSI computation ended");
        let matched = self.matched.clone();
        self.logger.minimal(&format_set(&matched));
        Ok(matched)
    }

    /// Evaluate one garbled instance against the value Alice pointed at.
    fn eval_single(&mut self, entry: CircuitEntry) -> Result<()> {
        entry.circuit.validate().map_err(PsiError::ProtocolIntegrity)?;
        let j = entry.j as usize;
        let value = *self.vals.get(j).ok_or_else(|| {
            PsiError::ProtocolIntegrity(format!("index {j} is outside Bob's set"))
        })?;
        let bits_b = float_to_bits(value);
        if entry.circuit.bob.len() != bits_b.len() {
            return Err(PsiError::ProtocolIntegrity(format!(
                "circuit {} does not take a 32-bit evaluator input",
                entry.circuit.id
            )));
        }
        let b_inputs_clear: Vec<(WireId, bool)> =
            entry.circuit.bob.iter().copied().zip(bits_b).collect();

        let mut ot =
            ObliviousTransfer::new(&mut self.channel, &mut self.logger, self.config.prime_bits);
        let result = ot.send_result(
            &entry.circuit,
            &entry.garbled_tables,
            &entry.pbits_out,
            &b_inputs_clear,
            &mut self.rng,
        )?;

        let out_wire = entry
            .circuit
            .out
            .first()
            .ok_or_else(|| PsiError::ProtocolIntegrity("circuit has no output wire".into()))?;
        let bit = result.get(out_wire).copied().ok_or_else(|| {
            PsiError::ProtocolIntegrity(format!("result lacks output wire {out_wire}"))
        })?;
        if bit && !bits::contains_bitwise(&self.matched, value) {
            self.matched.push(value);
        }
        Ok(())
    }
}

/// Run Alice to completion.
pub fn run_alice(vals: Vec<f32>, config: Config, logger: Logger) -> Result<Vec<f32>> {
    let mut alice = Alice::new(vals, config, logger)?;
    alice.setup()?;
    alice.run()
}

/// Run Bob to completion.
pub fn run_bob(vals: Vec<f32>, config: Config, logger: Logger) -> Result<Vec<f32>> {
    let mut bob = Bob::new(vals, config, logger)?;
    bob.listen()
}

/// Test mode: launch Bob as a child process of this executable, run Alice
/// in the parent, join, and compare against the plaintext intersection.
pub fn run_test(set_a: Vec<f32>, set_b: Vec<f32>, set_b_raw: &str, config: Config) -> Result<()> {
    let exe = env::current_exe()
        .map_err(|e| PsiError::Config(format!("cannot locate own executable: {e}")))?;
    let mode_flag = match config.mode {
        OutputMode::Minimal => "minimal",
        OutputMode::Info => "info",
        OutputMode::Full => "full",
    };
    let mut child = Command::new(exe)
        .arg("bob")
        .arg(set_b_raw)
        .arg("-o")
        .arg(mode_flag)
        .arg("--endpoint")
        .arg(&config.endpoint)
        .env(LOG_PREFIX_ENV, "[Bob] ")
        .spawn()
        .map_err(|e| PsiError::Config(format!("cannot spawn Bob: {e}")))?;

    let alice_logger = Logger::with_prefix("Alice", config.mode, "[Alice] ")?;
    let matched = match run_alice(set_a.clone(), config.clone(), alice_logger) {
        Ok(matched) => matched,
        Err(e) => {
            // Bob would block forever on a dead protocol, reap him first
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };
    let status = child.wait()?;
    if !status.success() {
        return Err(PsiError::Config(format!("Bob exited with {status}")));
    }

    let mut logger = Logger::with_prefix("test", config.mode, "[-] ")?;
    let reference = plain_intersection(&set_a, &set_b);
    logger.info(&format!(
        "Result computed without the protocol: {}",
        format_set(&reference)
    ));
    let same = matched.len() == reference.len()
        && matched.iter().all(|&v| bits::contains_bitwise(&reference, v));
    if same {
        logger.info("Result is correct!");
    } else {
        logger.info("Result is wrong!");
    }
    Ok(())
}

/// The log prefix handed down by test mode, if any.
pub fn inherited_log_prefix() -> Option<String> {
    env::var(LOG_PREFIX_ENV).ok()
}

/// The reference intersection, computed in the clear with bitwise float
/// equality (the same equality the circuit computes).
pub fn plain_intersection(a: &[f32], b: &[f32]) -> Vec<f32> {
    let mut out: Vec<f32> = a
        .iter()
        .copied()
        .filter(|&x| bits::contains_bitwise(b, x))
        .collect();
    out.sort_by(|x, y| x.total_cmp(y));
    out
}

fn fresh_rng() -> ChaCha12Rng {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    ChaCha12Rng::from_seed(seed)
}

fn progress_bar(mode: OutputMode, len: u64) -> ProgressBar {
    if mode == OutputMode::Minimal {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    bar.set_message("Comparing...");
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_intersection_basic() {
        let a = [1.2f32, 2.5];
        let b = [1.2f32, 4.3];
        assert_eq!(plain_intersection(&a, &b), vec![1.2]);
    }

    #[test]
    fn test_plain_intersection_empty() {
        assert!(plain_intersection(&[], &[1.0]).is_empty());
        assert!(plain_intersection(&[1.0], &[]).is_empty());
    }

    #[test]
    fn test_plain_intersection_signed_zero() {
        // +0.0 == -0.0 as floats but their encodings differ
        assert!(plain_intersection(&[0.0], &[-0.0]).is_empty());
    }

    #[test]
    fn test_plain_intersection_nan() {
        let nan = f32::NAN;
        assert_eq!(plain_intersection(&[nan], &[nan]).len(), 1);
    }

    #[test]
    fn test_plain_intersection_sorted() {
        let a = [3.0f32, 1.0, 2.0];
        let b = [2.0f32, 3.0, 1.0];
        assert_eq!(plain_intersection(&a, &b), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.prime_bits, DEFAULT_PRIME_BITS);
    }
}
