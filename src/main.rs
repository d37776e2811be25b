use anyhow::Result;
use clap::{Parser, ValueEnum};

use yao_psi::bits::parse_set;
use yao_psi::group::DEFAULT_PRIME_BITS;
use yao_psi::logger::{Logger, OutputMode};
use yao_psi::psi::{
    inherited_log_prefix, run_alice, run_bob, run_test, Config, EQ32_CIRCUIT_PATH,
};
use yao_psi::transport::DEFAULT_ENDPOINT;
use yao_psi::PsiError;

/// Compute the intersection of two parties' sets of 32-bit floats with
/// Yao's garbled circuits, revealing nothing else about either set.
#[derive(Parser, Debug)]
#[command(name = "psi")]
#[command(about = "Private set intersection over 32-bit floats using Yao's protocol")]
#[command(version)]
struct Args {
    /// The party to run; test runs both, with Bob in a child process
    #[arg(value_enum)]
    party: PartyArg,

    /// The party's set, brace-enclosed and quoted, e.g. "{1.2, 4.5e2}";
    /// test mode takes two sets
    set: Vec<String>,

    /// Output mode; full also writes OT transcripts and garbled-table
    /// dumps under output/
    #[arg(short = 'o', long = "output-mode", value_enum, default_value = "info")]
    output_mode: OutputModeArg,

    /// Endpoint the parties meet at
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Path of the equality-circuit definition file
    #[arg(long, default_value = EQ32_CIRCUIT_PATH)]
    circuit: String,

    /// Bit-length of the OT group modulus
    #[arg(long, default_value_t = DEFAULT_PRIME_BITS)]
    prime_bits: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PartyArg {
    /// Garbler and OT sender; connects to Bob
    Alice,
    /// Evaluator and OT receiver; binds and waits for Alice
    Bob,
    /// Both parties against each other, then check the result
    Test,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputModeArg {
    /// Only the result, followed by a newline
    Minimal,
    /// Status lines and a progress bar (default)
    Info,
    /// Also write OT and garbled-table transcripts under output/
    Full,
}

impl From<OutputModeArg> for OutputMode {
    fn from(mode: OutputModeArg) -> Self {
        match mode {
            OutputModeArg::Minimal => OutputMode::Minimal,
            OutputModeArg::Info => OutputMode::Info,
            OutputModeArg::Full => OutputMode::Full,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config {
        endpoint: args.endpoint,
        circuit_path: args.circuit,
        prime_bits: args.prime_bits,
        mode: args.output_mode.into(),
    };

    let sets = args
        .set
        .iter()
        .map(|s| parse_set(s))
        .collect::<yao_psi::Result<Vec<_>>>()?;

    match args.party {
        PartyArg::Alice => {
            let vals = single_set(&sets)?;
            run_alice(vals, config.clone(), party_logger("Alice", config.mode)?)?;
        }
        PartyArg::Bob => {
            let vals = single_set(&sets)?;
            run_bob(vals, config.clone(), party_logger("Bob", config.mode)?)?;
        }
        PartyArg::Test => {
            if sets.len() != 2 {
                return Err(PsiError::Config(
                    "test mode needs both sets, e.g. psi test \"{1.2,2.5}\" \"{1.2,4.3}\"".into(),
                )
                .into());
            }
            run_test(sets[0].clone(), sets[1].clone(), &args.set[1], config)?;
        }
    }
    Ok(())
}

fn single_set(sets: &[Vec<f32>]) -> yao_psi::Result<Vec<f32>> {
    match sets {
        [one] => Ok(one.clone()),
        _ => Err(PsiError::Config(
            "exactly one set is expected, e.g. psi alice \"{1.2,2.5}\"".into(),
        )),
    }
}

fn party_logger(party: &str, mode: OutputMode) -> yao_psi::Result<Logger> {
    match inherited_log_prefix() {
        Some(prefix) => Logger::with_prefix(party, mode, &prefix),
        None => Logger::new(party, mode),
    }
}
