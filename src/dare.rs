//! Classical DARE compiler
//!
//! Compiles a two-party circuit into a pair of sibling circuits: an
//! **encoding circuit** evaluated by the key holder and a **decoding
//! circuit** evaluated by the output learner. The compiler walks top-down
//! from each Alice output carrying encoder handles `(k, b)`, maintaining the
//! invariant that the decoder gate it returns evaluates to `k·g + b`, where
//! `g` is the original gate's value.
//!
//! The streaming garbler in [`crate::garble`] is the same functionality in
//! imperative form and is what the batch driver uses; this representation
//! stays materialized, printable and persistable.

use std::io::{self, Write};

use rand::Rng;

use crate::circuit::{Agent, EvalError, Evaluator, Gate, GateHandle, TwoPartyCircuit};
use crate::field::Zp;
use crate::textio::{self, TextError, TokenStream};

/// Handles of one affine key pair inside the encoding circuit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyPairHandles {
    pub coefficient: GateHandle,
    pub intercept: GateHandle,
}

/// The encoder: evaluating it (with fresh randomness) yields the offline
/// encoding values and, per protocol input, the affine key pairs.
#[derive(Clone, Debug, Default)]
pub struct EncodingCircuit {
    pub gates: Vec<Gate>,
    /// Handles of the internal randomness input gates.
    pub randomness: Vec<GateHandle>,
    /// Handles whose values form the offline encoding.
    pub offline_encoding: Vec<GateHandle>,
    /// Key-pair handles per Alice input index.
    pub alice_encoding: Vec<Vec<KeyPairHandles>>,
    /// Key-pair handles per Bob input index.
    pub bob_encoding: Vec<Vec<KeyPairHandles>>,
}

impl EncodingCircuit {
    fn insert_gate(&mut self, gate: Gate) -> GateHandle {
        let handle = self.gates.len();
        self.gates.push(gate);
        handle
    }

    fn insert_random_gate(&mut self) -> GateHandle {
        let handle = self.insert_gate(Gate::Input {
            agent: Agent::Random,
            major: self.randomness.len(),
            minor: 0,
        });
        self.randomness.push(handle);
        handle
    }

    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "{} {} {} {} {}",
            self.gates.len(),
            self.randomness.len(),
            self.offline_encoding.len(),
            self.alice_encoding.len(),
            self.bob_encoding.len()
        )?;
        for (id, gate) in self.gates.iter().enumerate() {
            gate.save_to(id, w)?;
        }
        textio::write_usize_line(w, &self.randomness)?;
        textio::write_usize_line(w, &self.offline_encoding)?;
        for per_input in self.alice_encoding.iter().chain(&self.bob_encoding) {
            writeln!(w, "{}", per_input.len())?;
            for kp in per_input {
                writeln!(w, "{} {}", kp.coefficient, kp.intercept)?;
            }
        }
        Ok(())
    }

    pub fn load_from(ts: &mut TokenStream) -> Result<EncodingCircuit, TextError> {
        let gate_count = ts.next_usize()?;
        let randomness_count = ts.next_usize()?;
        let offline_count = ts.next_usize()?;
        let alice_count = ts.next_usize()?;
        let bob_count = ts.next_usize()?;
        let mut circuit = EncodingCircuit::default();
        for _ in 0..gate_count {
            let (_, gate) = Gate::load_from(ts)?;
            circuit.gates.push(gate);
        }
        circuit.randomness = vec![0; randomness_count];
        ts.fill_usize(&mut circuit.randomness)?;
        circuit.offline_encoding = vec![0; offline_count];
        ts.fill_usize(&mut circuit.offline_encoding)?;
        let mut load_side = |count: usize| -> Result<Vec<Vec<KeyPairHandles>>, TextError> {
            let mut side = Vec::with_capacity(count);
            for _ in 0..count {
                let len = ts.next_usize()?;
                let mut pairs = Vec::with_capacity(len);
                for _ in 0..len {
                    pairs.push(KeyPairHandles {
                        coefficient: ts.next_usize()?,
                        intercept: ts.next_usize()?,
                    });
                }
                side.push(pairs);
            }
            Ok(side)
        };
        circuit.alice_encoding = load_side(alice_count)?;
        circuit.bob_encoding = load_side(bob_count)?;
        Ok(circuit)
    }
}

/// The decoder: its input gates are matched one-to-one with the encoder's
/// offline encoding and key pairs.
#[derive(Clone, Debug, Default)]
pub struct DecodingCircuit {
    pub gates: Vec<Gate>,
    pub offline_encoding: Vec<GateHandle>,
    pub alice_encoding: Vec<Vec<GateHandle>>,
    pub bob_encoding: Vec<Vec<GateHandle>>,
    pub alice_output: Vec<GateHandle>,
}

impl DecodingCircuit {
    fn insert_gate(&mut self, gate: Gate) -> GateHandle {
        let handle = self.gates.len();
        self.gates.push(gate);
        handle
    }

    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "{} {} {} {} {}",
            self.gates.len(),
            self.offline_encoding.len(),
            self.alice_encoding.len(),
            self.bob_encoding.len(),
            self.alice_output.len()
        )?;
        for (id, gate) in self.gates.iter().enumerate() {
            gate.save_to(id, w)?;
        }
        textio::write_usize_line(w, &self.offline_encoding)?;
        for per_input in self.alice_encoding.iter().chain(&self.bob_encoding) {
            writeln!(w, "{}", per_input.len())?;
            textio::write_usize_line(w, per_input)?;
        }
        textio::write_usize_line(w, &self.alice_output)
    }

    pub fn load_from(ts: &mut TokenStream) -> Result<DecodingCircuit, TextError> {
        let gate_count = ts.next_usize()?;
        let offline_count = ts.next_usize()?;
        let alice_count = ts.next_usize()?;
        let bob_count = ts.next_usize()?;
        let output_count = ts.next_usize()?;
        let mut circuit = DecodingCircuit::default();
        for _ in 0..gate_count {
            let (_, gate) = Gate::load_from(ts)?;
            circuit.gates.push(gate);
        }
        circuit.offline_encoding = vec![0; offline_count];
        ts.fill_usize(&mut circuit.offline_encoding)?;
        let mut load_side = |count: usize| -> Result<Vec<Vec<GateHandle>>, TextError> {
            let mut side = Vec::with_capacity(count);
            for _ in 0..count {
                let len = ts.next_usize()?;
                let mut handles = vec![0usize; len];
                ts.fill_usize(&mut handles)?;
                side.push(handles);
            }
            Ok(side)
        };
        circuit.alice_encoding = load_side(alice_count)?;
        circuit.bob_encoding = load_side(bob_count)?;
        circuit.alice_output = vec![0; output_count];
        ts.fill_usize(&mut circuit.alice_output)?;
        Ok(circuit)
    }
}

/// Compilation failure: the circuit broke a compiler invariant.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("input gate {handle} is owned by neither Alice nor Bob")]
    OwnerlessInput { handle: GateHandle },
}

struct Compiler<'a> {
    circuit: &'a TwoPartyCircuit,
    encoder: EncodingCircuit,
    decoder: DecodingCircuit,
    zero_gate: GateHandle,
    one_gate: GateHandle,
}

impl<'a> Compiler<'a> {
    fn new(circuit: &'a TwoPartyCircuit) -> Self {
        let mut encoder = EncodingCircuit::default();
        let mut decoder = DecodingCircuit::default();
        encoder.alice_encoding.resize(circuit.alice_input_len(), Vec::new());
        encoder.bob_encoding.resize(circuit.bob_input_len(), Vec::new());
        decoder.alice_encoding.resize(circuit.alice_input_len(), Vec::new());
        decoder.bob_encoding.resize(circuit.bob_input_len(), Vec::new());
        decoder.alice_output.reserve(circuit.alice_output.len());
        // The (k, b) seeds for every output subtree.
        let zero_gate = encoder.insert_gate(Gate::ConstZero);
        let one_gate = encoder.insert_gate(Gate::ConstOne);
        Compiler { circuit, encoder, decoder, zero_gate, one_gate }
    }

    /// Append an offline-encoding value and its matching decoder input.
    fn push_offline(&mut self, encoding_handle: GateHandle) -> GateHandle {
        self.encoder.offline_encoding.push(encoding_handle);
        let decoding_handle = self.decoder.insert_gate(Gate::Input {
            agent: Agent::None,
            major: self.decoder.offline_encoding.len(),
            minor: 0,
        });
        self.decoder.offline_encoding.push(decoding_handle);
        decoding_handle
    }

    /// Compile the subtree at `handle` so that the returned decoder gate
    /// evaluates to `k·g + b`.
    fn compile(&mut self, handle: GateHandle, k: GateHandle, b: GateHandle)
        -> Result<GateHandle, CompileError>
    {
        match self.circuit.gates[handle] {
            // k·0 + b = b
            Gate::ConstZero => Ok(self.push_offline(b)),
            // k·1 + b = k + b
            Gate::ConstOne => {
                let encoding = self.encoder.insert_gate(Gate::Addition { augend: k, addend: b });
                Ok(self.push_offline(encoding))
            }
            // k·(−1) + b = b − k
            Gate::ConstMinusOne => {
                let encoding =
                    self.encoder.insert_gate(Gate::Subtraction { minuend: b, subtrahend: k });
                Ok(self.push_offline(encoding))
            }
            // Store (k, b) as a key pair of the owner and mint the matching
            // decoder input gate.
            Gate::Input { agent, major, .. } => {
                let (encoding_target, decoding_target) = match agent {
                    Agent::Alice => (
                        &mut self.encoder.alice_encoding[major],
                        &mut self.decoder.alice_encoding[major],
                    ),
                    Agent::Bob => (
                        &mut self.encoder.bob_encoding[major],
                        &mut self.decoder.bob_encoding[major],
                    ),
                    Agent::None | Agent::Random => {
                        return Err(CompileError::OwnerlessInput { handle })
                    }
                };
                encoding_target.push(KeyPairHandles { coefficient: k, intercept: b });
                let minor = decoding_target.len();
                let decoding_handle =
                    self.decoder.insert_gate(Gate::Input { agent, major, minor });
                self.decoder.alice_or_bob_mut(agent, major).push(decoding_handle);
                Ok(decoding_handle)
            }
            // k(g1 + g2) + b = (k·g1 + r) + (k·g2 + (b − r))
            Gate::Addition { augend, addend } => {
                let r = self.encoder.insert_random_gate();
                let b_minus_r =
                    self.encoder.insert_gate(Gate::Subtraction { minuend: b, subtrahend: r });
                let g1 = self.compile(augend, k, r)?;
                let g2 = self.compile(addend, k, b_minus_r)?;
                Ok(self.decoder.insert_gate(Gate::Addition { augend: g1, addend: g2 }))
            }
            // k(−g) + b = (−k)·g + b
            Gate::Negation { target } => {
                let minus_k = self.encoder.insert_gate(Gate::Negation { target: k });
                self.compile(target, minus_k, b)
            }
            // k(g1 − g2) + b = (k·g1 + (b + r)) − (k·g2 + r)
            Gate::Subtraction { minuend, subtrahend } => {
                let r = self.encoder.insert_random_gate();
                let b_plus_r = self.encoder.insert_gate(Gate::Addition { augend: b, addend: r });
                let g1 = self.compile(minuend, k, b_plus_r)?;
                let g2 = self.compile(subtrahend, k, r)?;
                Ok(self.decoder.insert_gate(Gate::Subtraction { minuend: g1, subtrahend: g2 }))
            }
            // k(g1·g2) + b = x1·x2 + (x3 + x4) with
            //   x1 = k·g1 − r1,   x2 = g2 − r2,
            //   x3 = k·r2·g1 + r3, x4 = r1·g2 + b − (r1·r2 + r3).
            Gate::Multiplication { multiplier, multiplicand } => {
                let r1 = self.encoder.insert_random_gate();
                let r2 = self.encoder.insert_random_gate();
                let r3 = self.encoder.insert_random_gate();
                let minus_r1 = self.encoder.insert_gate(Gate::Negation { target: r1 });
                let minus_r2 = self.encoder.insert_gate(Gate::Negation { target: r2 });
                let kr2 =
                    self.encoder.insert_gate(Gate::Multiplication { multiplier: k, multiplicand: r2 });
                let r1r2 =
                    self.encoder.insert_gate(Gate::Multiplication { multiplier: r1, multiplicand: r2 });
                let r1r2_plus_r3 =
                    self.encoder.insert_gate(Gate::Addition { augend: r1r2, addend: r3 });
                let b_rest = self
                    .encoder
                    .insert_gate(Gate::Subtraction { minuend: b, subtrahend: r1r2_plus_r3 });
                let one = self.one_gate;
                let x1 = self.compile(multiplier, k, minus_r1)?;
                let x2 = self.compile(multiplicand, one, minus_r2)?;
                let x3 = self.compile(multiplier, kr2, r3)?;
                let x4 = self.compile(multiplicand, r1, b_rest)?;
                let x1x2 = self
                    .decoder
                    .insert_gate(Gate::Multiplication { multiplier: x1, multiplicand: x2 });
                let x3x4 = self.decoder.insert_gate(Gate::Addition { augend: x3, addend: x4 });
                Ok(self.decoder.insert_gate(Gate::Addition { augend: x1x2, addend: x3x4 }))
            }
        }
    }
}

impl DecodingCircuit {
    fn alice_or_bob_mut(&mut self, agent: Agent, major: usize) -> &mut Vec<GateHandle> {
        match agent {
            Agent::Alice => &mut self.alice_encoding[major],
            _ => &mut self.bob_encoding[major],
        }
    }
}

/// Compile `circuit` into its encoding/decoding pair.
///
/// For every Alice output the compilation starts with `(k, b) = (1, 0)`, so
/// the decoded value at the returned handle equals the output itself.
pub fn compile_to_dare(
    circuit: &TwoPartyCircuit,
) -> Result<(EncodingCircuit, DecodingCircuit), CompileError> {
    let mut compiler = Compiler::new(circuit);
    for i in 0..circuit.alice_output.len() {
        let output = circuit.alice_output[i];
        let (one, zero) = (compiler.one_gate, compiler.zero_gate);
        let decoded = compiler.compile(output, one, zero)?;
        compiler.decoder.alice_output.push(decoded);
    }
    Ok((compiler.encoder, compiler.decoder))
}

/// Evaluate the pair end to end (the non-batched path): run the encoder on
/// fresh randomness, derive every key as `coefficient·input + intercept`,
/// feed the keys and offline encoding to the decoder, and return the Alice
/// outputs.
pub fn evaluate_pair<R: Rng + ?Sized>(
    encoder: &EncodingCircuit,
    decoder: &DecodingCircuit,
    alice_inputs: &[Zp],
    bob_inputs: &[Zp],
    rng: &mut R,
) -> Result<Vec<Zp>, EvalError> {
    let mut encoding = Evaluator::new(&encoder.gates);
    for &r in &encoder.randomness {
        encoding.place(r, Zp::uniform(rng));
    }
    let mut decoding = Evaluator::new(&decoder.gates);
    for (&handle, &gate) in encoder.offline_encoding.iter().zip(&decoder.offline_encoding) {
        let value = encoding.evaluate(handle)?;
        decoding.place(gate, value);
    }
    let sides = [
        (&encoder.alice_encoding, &decoder.alice_encoding, alice_inputs),
        (&encoder.bob_encoding, &decoder.bob_encoding, bob_inputs),
    ];
    for (pairs, gates, inputs) in sides {
        for ((per_input, per_gate), &input) in pairs.iter().zip(gates).zip(inputs) {
            for (kp, &gate) in per_input.iter().zip(per_gate) {
                let coefficient = encoding.evaluate(kp.coefficient)?;
                let intercept = encoding.evaluate(kp.intercept)?;
                decoding.place(gate, coefficient * input + intercept);
            }
        }
    }
    decoder
        .alice_output
        .iter()
        .map(|&out| decoding.evaluate(out))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{evaluate_circuit, single_ole_circuit};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn key_pair_lists_stay_matched() {
        let circuit = single_ole_circuit();
        let (encoder, decoder) = compile_to_dare(&circuit).unwrap();
        assert_eq!(encoder.alice_encoding.len(), decoder.alice_encoding.len());
        assert_eq!(encoder.bob_encoding.len(), decoder.bob_encoding.len());
        for (e, d) in encoder.alice_encoding.iter().zip(&decoder.alice_encoding) {
            assert_eq!(e.len(), d.len());
        }
        for (e, d) in encoder.bob_encoding.iter().zip(&decoder.bob_encoding) {
            assert_eq!(e.len(), d.len());
        }
        assert_eq!(encoder.offline_encoding.len(), decoder.offline_encoding.len());
    }

    #[test]
    fn single_ole_decodes_to_the_circuit_output() {
        let circuit = single_ole_circuit();
        let (encoder, decoder) = compile_to_dare(&circuit).unwrap();
        let mut rng = StdRng::seed_from_u64(60);
        let outputs = evaluate_pair(
            &encoder,
            &decoder,
            &[Zp::new(7)],
            &[Zp::new(5), Zp::new(11)],
            &mut rng,
        )
        .unwrap();
        assert_eq!(outputs, vec![Zp::new(46)]);
    }

    /// A circuit exercising every gate kind:
    /// out = (x·a − (−x)) · (b + 1) − 0 · (−1)
    fn kitchen_sink_circuit() -> TwoPartyCircuit {
        let mut circuit = TwoPartyCircuit::default();
        let x = circuit.insert_gate(Gate::Input { agent: Agent::Alice, major: 0, minor: 0 });
        let a = circuit.insert_gate(Gate::Input { agent: Agent::Bob, major: 0, minor: 0 });
        let b = circuit.insert_gate(Gate::Input { agent: Agent::Bob, major: 1, minor: 0 });
        circuit.alice_input = x..x + 1;
        circuit.bob_input = a..b + 1;
        let one = circuit.insert_gate(Gate::ConstOne);
        let zero = circuit.insert_gate(Gate::ConstZero);
        let minus_one = circuit.insert_gate(Gate::ConstMinusOne);
        let xa = circuit.insert_gate(Gate::Multiplication { multiplier: x, multiplicand: a });
        let neg_x = circuit.insert_gate(Gate::Negation { target: x });
        let left = circuit.insert_gate(Gate::Subtraction { minuend: xa, subtrahend: neg_x });
        let right = circuit.insert_gate(Gate::Addition { augend: b, addend: one });
        let product =
            circuit.insert_gate(Gate::Multiplication { multiplier: left, multiplicand: right });
        let junk =
            circuit.insert_gate(Gate::Multiplication { multiplier: zero, multiplicand: minus_one });
        let out = circuit.insert_gate(Gate::Subtraction { minuend: product, subtrahend: junk });
        circuit.alice_output.push(out);
        circuit
    }

    #[test]
    fn random_assignments_decode_correctly() {
        let circuit = kitchen_sink_circuit();
        let (encoder, decoder) = compile_to_dare(&circuit).unwrap();
        let mut rng = StdRng::seed_from_u64(61);
        for _ in 0..30 {
            let alice = [Zp::uniform(&mut rng)];
            let bob = [Zp::uniform(&mut rng), Zp::uniform(&mut rng)];
            let expected = evaluate_circuit(&circuit, &alice, &bob).unwrap();
            let decoded = evaluate_pair(&encoder, &decoder, &alice, &bob, &mut rng).unwrap();
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn pair_persistence_round_trip() {
        let circuit = kitchen_sink_circuit();
        let (encoder, decoder) = compile_to_dare(&circuit).unwrap();

        let mut buf = Vec::new();
        encoder.save_to(&mut buf).unwrap();
        let mut ts = TokenStream::from_reader(buf.as_slice()).unwrap();
        let encoder2 = EncodingCircuit::load_from(&mut ts).unwrap();
        assert_eq!(encoder2.gates, encoder.gates);
        assert_eq!(encoder2.randomness, encoder.randomness);
        assert_eq!(encoder2.offline_encoding, encoder.offline_encoding);
        assert_eq!(encoder2.alice_encoding, encoder.alice_encoding);
        assert_eq!(encoder2.bob_encoding, encoder.bob_encoding);

        let mut buf = Vec::new();
        decoder.save_to(&mut buf).unwrap();
        let mut ts = TokenStream::from_reader(buf.as_slice()).unwrap();
        let decoder2 = DecodingCircuit::load_from(&mut ts).unwrap();
        assert_eq!(decoder2.gates, decoder.gates);
        assert_eq!(decoder2.offline_encoding, decoder.offline_encoding);
        assert_eq!(decoder2.alice_encoding, decoder.alice_encoding);
        assert_eq!(decoder2.bob_encoding, decoder.bob_encoding);
        assert_eq!(decoder2.alice_output, decoder.alice_output);
    }
}
