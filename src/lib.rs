//! Crate root: public surface and protocol-wide invariants
//!
//! Two-party batch **Oblivious Linear Evaluation** over the prime field
//! `Z_p` with `p = 2^32 - 5`. Alice holds a vector `x`; Bob holds vectors
//! `a` and `b`. At the end of a batch Alice alone learns `z = a·x + b`
//! componentwise, and neither party learns anything else about the peer's
//! inputs (semi-honest model).
//!
//! ## Invariants
//!
//! - **Field.** Every [`Zp`] is a normalized residue in `[0, p)`. Arithmetic
//!   widens to 64 bits before reducing; inversion is the extended Euclidean
//!   algorithm on `u32` pairs. We forbid `unsafe` throughout the crate.
//!
//! - **Codes.** The vector-OLE subprotocol composes a `d`-sparse linear code
//!   over `Z_p` (upper part decoded by Gaussian elimination) with a Luby
//!   Transform code under the robust soliton distribution (decoded by
//!   iterative peeling). Decoding failure is *non-fatal*: the affected
//!   vector-OLE is simply retried with fresh randomness.
//!
//! - **Garbling.** Circuits are compiled with a decomposable affine
//!   randomized encoding (DARE): every decoded wire carries `k·g + b` for
//!   encoder-side `(k, b)`. The streaming garbler regenerates key pairs per
//!   batch against a fixed circuit; cursor state lives in a surrogate
//!   [`garble::Configuration`] that is rewound before every pass.
//!
//! - **Transport.** Three TCP streams per batch, each bracketed by
//!   hello/bye-bye tags. Wire format is native-endian; a byte-exact
//!   ping/pong handshake at connection time rejects mixed-endian peers.
//!
//! Failures are values flowing along `Result` return paths, never panics,
//! with the single exception of "unmatched gate owner" style compiler
//! invariants, which are deliberately loud because they indicate a bug in
//! circuit construction, not bad input data.

#![forbid(unsafe_code)]

/// Prime field `Z_p`, `p = 4 294 967 291`.
pub mod field;

/// Exact-`k` uniform erasure of boolean masks.
pub mod erasure;

/// Whitespace-delimited decimal text formats for the on-disk artifacts.
pub mod textio;

/// Robust soliton distribution and Luby Transform code.
pub mod luby;

/// Fast `d`-sparse linear code over `Z_p`.
pub mod sparse;

/// Arithmetic circuits: gates, two-party circuits, plain evaluation.
pub mod circuit;

/// Classical DARE compiler (encoding/decoding circuit pair).
pub mod dare;

/// Streaming garbler: configure / garble / ungarble against a fixed circuit.
pub mod garble;

/// Goldreich's local PRG on expander graphs, plus its masked-OLE circuit.
pub mod goldreich;

/// Channel shim: handshake, frame tags, field-element vectors over a stream.
pub mod net;

/// The one-roundtrip vector-OLE subprotocol.
pub mod vecole;

/// The batch-OLE driver: three concurrent channels per batch.
pub mod batch;

pub use crate::circuit::{Agent, Gate, GateHandle, TwoPartyCircuit};
pub use crate::field::Zp;
