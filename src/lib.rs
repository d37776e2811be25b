//! Two-party private set intersection (PSI) over 32-bit floats built on
//! Yao's garbled circuits and Diffie-Hellman based oblivious transfer.
//!
//! Alice garbles a fresh 32-bit equality circuit per candidate pair, Bob
//! evaluates it after obtaining his input-wire labels through 1-out-of-2
//! oblivious transfer, and only membership of Alice's own values in Bob's
//! set is revealed. Honest-but-curious model.

/// IEEE-754 bit encoding and set parsing
pub mod bits;
/// Boolean circuit model, JSON loading and plaintext evaluation
pub mod circuit;
/// Garbled circuit evaluation
pub mod evaluator;
/// Circuit garbling with point-and-permute
pub mod garbler;
/// Cyclic prime-order group arithmetic for oblivious transfer
pub mod group;
/// Party loggers and output modes
pub mod logger;
/// 1-out-of-2 oblivious transfer
pub mod ot;
/// The PSI protocol drivers for both parties
pub mod psi;
/// TCP request/reply transport and the wire message set
pub mod transport;

use thiserror::Error;

/// Errors surfaced by either party. All of them are terminal: the protocol
/// has no retry or partial-failure recovery, a failure invalidates the
/// session.
#[derive(Error, Debug)]
pub enum PsiError {
    /// Malformed CLI input, unparseable set, or missing/invalid circuit file.
    #[error("configuration error: {0}")]
    Config(String),
    /// The peer opened the connection with something other than the
    /// handshake token.
    #[error("unrecognized handshake from peer")]
    ProtocolHandshake,
    /// Garbled-table decryption failure, an unexpected message shape, or an
    /// OT participant deviating from the expected exchange.
    #[error("protocol integrity failure: {0}")]
    ProtocolIntegrity(String),
    /// Socket I/O failure.
    #[error("transport failure: {0}")]
    Transport(std::io::Error),
    /// User interruption.
    #[error("interrupted")]
    Canceled,
}

impl From<std::io::Error> for PsiError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            PsiError::Canceled
        } else {
            PsiError::Transport(err)
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PsiError>;
