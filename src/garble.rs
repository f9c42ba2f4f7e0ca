//! Streaming garbler
//!
//! The imperative form of the DARE compiler, used by the batch driver
//! because key pairs are regenerated every batch while the circuit is fixed.
//! Three passes over the same circuit:
//!
//! 1. [`configure`] counts the offline-encoding values and the key pairs
//!    each input index needs, writing a [`Configuration`].
//! 2. [`KeyPairs::apply_configuration`] / [`Keys::apply_configuration`]
//!    resize the storage once; after that no pass allocates.
//! 3. [`garble`] repeats the compiler's traversal but evaluates it
//!    immediately against fresh random field elements, writing concrete
//!    `(coefficient, intercept)` pairs through cursor state.
//! 4. [`ungarble`] traverses a third time, consuming one key per input-gate
//!    visit in exactly the order garbling produced them.
//!
//! The cursors live in a *surrogate* [`Configuration`] whose counters are
//! zeroed (sizes kept) before every garble or ungarble pass, so the cursors
//! rewind while the permanent configuration keeps the totals.

use rand::Rng;

use crate::circuit::{Agent, Gate, GateHandle, TwoPartyCircuit};
use crate::field::Zp;

/// Per-input key-pair counts plus the offline-encoding count.
///
/// Doubles as the cursor block: a zeroed copy of a configuration walks back
/// up to the permanent one as a pass proceeds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    pub offline_encoding: usize,
    pub alice_encoding: Vec<usize>,
    pub bob_encoding: Vec<usize>,
}

impl Configuration {
    /// Zero the counters but keep the vector sizes: rewinds the cursors.
    pub fn reset_preserve_configuration(&mut self) {
        self.offline_encoding = 0;
        self.alice_encoding.fill(0);
        self.bob_encoding.fill(0);
    }
}

/// Concrete affine key pairs, one `(coefficient, intercept)` per configured
/// slot, plus the offline-encoding values.
#[derive(Clone, Debug, Default)]
pub struct KeyPairs {
    pub offline_encoding: Vec<Zp>,
    pub alice_coefficient: Vec<Vec<Zp>>,
    pub alice_intercept: Vec<Vec<Zp>>,
    pub bob_coefficient: Vec<Vec<Zp>>,
    pub bob_intercept: Vec<Vec<Zp>>,
}

fn resize_nested(target: &mut Vec<Vec<Zp>>, sizes: &[usize]) {
    target.resize(sizes.len(), Vec::new());
    for (vec, &size) in target.iter_mut().zip(sizes) {
        vec.clear();
        vec.resize(size, Zp::ZERO);
    }
}

impl KeyPairs {
    /// Resize every vector to the configured counts, zero-filled.
    pub fn apply_configuration(&mut self, config: &Configuration) {
        self.offline_encoding.clear();
        self.offline_encoding.resize(config.offline_encoding, Zp::ZERO);
        resize_nested(&mut self.alice_coefficient, &config.alice_encoding);
        resize_nested(&mut self.alice_intercept, &config.alice_encoding);
        resize_nested(&mut self.bob_coefficient, &config.bob_encoding);
        resize_nested(&mut self.bob_intercept, &config.bob_encoding);
    }
}

/// Evaluated keys: a single field element per key pair, namely
/// `coefficient·input + intercept` for the owner's input value.
#[derive(Clone, Debug, Default)]
pub struct Keys {
    pub offline_encoding: Vec<Zp>,
    pub alice_encoding: Vec<Vec<Zp>>,
    pub bob_encoding: Vec<Vec<Zp>>,
}

impl Keys {
    /// Resize every vector to the configured counts, zero-filled.
    pub fn apply_configuration(&mut self, config: &Configuration) {
        self.offline_encoding.clear();
        self.offline_encoding.resize(config.offline_encoding, Zp::ZERO);
        resize_nested(&mut self.alice_encoding, &config.alice_encoding);
        resize_nested(&mut self.bob_encoding, &config.bob_encoding);
    }
}

/// A pass hit an input gate owned by neither party, which means the circuit
/// under garbling was built wrong. Deliberately loud at the call sites.
#[derive(Debug, thiserror::Error)]
#[error("input gate {handle} is owned by neither Alice nor Bob")]
pub struct GarbleError {
    pub handle: GateHandle,
}

/// Count the key pairs and offline-encoding slots the circuit needs.
pub fn configure(circuit: &TwoPartyCircuit, config: &mut Configuration) -> Result<(), GarbleError> {
    config.offline_encoding = 0;
    config.alice_encoding.clear();
    config.alice_encoding.resize(circuit.alice_input_len(), 0);
    config.bob_encoding.clear();
    config.bob_encoding.resize(circuit.bob_input_len(), 0);
    for &output in &circuit.alice_output {
        configure_gate(circuit, config, output)?;
    }
    Ok(())
}

fn configure_gate(
    circuit: &TwoPartyCircuit,
    config: &mut Configuration,
    handle: GateHandle,
) -> Result<(), GarbleError> {
    match circuit.gates[handle] {
        Gate::ConstZero | Gate::ConstOne | Gate::ConstMinusOne => {
            config.offline_encoding += 1;
            Ok(())
        }
        Gate::Input { agent, major, .. } => match agent {
            Agent::Alice => {
                config.alice_encoding[major] += 1;
                Ok(())
            }
            Agent::Bob => {
                config.bob_encoding[major] += 1;
                Ok(())
            }
            Agent::None | Agent::Random => Err(GarbleError { handle }),
        },
        Gate::Addition { augend, addend } => {
            configure_gate(circuit, config, augend)?;
            configure_gate(circuit, config, addend)
        }
        Gate::Negation { target } => configure_gate(circuit, config, target),
        Gate::Subtraction { minuend, subtrahend } => {
            configure_gate(circuit, config, minuend)?;
            configure_gate(circuit, config, subtrahend)
        }
        // Each operand is compiled twice, in the same fixed order the
        // garble and ungarble passes use.
        Gate::Multiplication { multiplier, multiplicand } => {
            configure_gate(circuit, config, multiplier)?;
            configure_gate(circuit, config, multiplicand)?;
            configure_gate(circuit, config, multiplier)?;
            configure_gate(circuit, config, multiplicand)
        }
    }
}

/// Garble the circuit: evaluate the DARE rewrite against fresh randomness,
/// writing concrete key pairs through `cursors` into `keypairs`.
///
/// `cursors` must be a configuration-shaped block freshly rewound with
/// [`Configuration::reset_preserve_configuration`]; `keypairs` must have
/// been sized by [`KeyPairs::apply_configuration`].
pub fn garble<R: Rng + ?Sized>(
    circuit: &TwoPartyCircuit,
    cursors: &mut Configuration,
    keypairs: &mut KeyPairs,
    rng: &mut R,
) -> Result<(), GarbleError> {
    for &output in &circuit.alice_output {
        garble_gate(circuit, cursors, keypairs, rng, output, Zp::ONE, Zp::ZERO)?;
    }
    Ok(())
}

fn garble_gate<R: Rng + ?Sized>(
    circuit: &TwoPartyCircuit,
    cursors: &mut Configuration,
    keypairs: &mut KeyPairs,
    rng: &mut R,
    handle: GateHandle,
    k: Zp,
    b: Zp,
) -> Result<(), GarbleError> {
    match circuit.gates[handle] {
        Gate::ConstZero => {
            keypairs.offline_encoding[cursors.offline_encoding] = b;
            cursors.offline_encoding += 1;
            Ok(())
        }
        Gate::ConstOne => {
            keypairs.offline_encoding[cursors.offline_encoding] = k + b;
            cursors.offline_encoding += 1;
            Ok(())
        }
        Gate::ConstMinusOne => {
            keypairs.offline_encoding[cursors.offline_encoding] = b - k;
            cursors.offline_encoding += 1;
            Ok(())
        }
        Gate::Input { agent, major, .. } => {
            let (coefficients, intercepts, cursor) = match agent {
                Agent::Alice => (
                    &mut keypairs.alice_coefficient[major],
                    &mut keypairs.alice_intercept[major],
                    &mut cursors.alice_encoding[major],
                ),
                Agent::Bob => (
                    &mut keypairs.bob_coefficient[major],
                    &mut keypairs.bob_intercept[major],
                    &mut cursors.bob_encoding[major],
                ),
                Agent::None | Agent::Random => return Err(GarbleError { handle }),
            };
            coefficients[*cursor] = k;
            intercepts[*cursor] = b;
            *cursor += 1;
            Ok(())
        }
        // k(g1 + g2) + b = (k·g1 + r) + (k·g2 + (b − r))
        Gate::Addition { augend, addend } => {
            let r = Zp::uniform(rng);
            garble_gate(circuit, cursors, keypairs, rng, augend, k, r)?;
            garble_gate(circuit, cursors, keypairs, rng, addend, k, b - r)
        }
        // k(−g) + b = (−k)·g + b
        Gate::Negation { target } => garble_gate(circuit, cursors, keypairs, rng, target, -k, b),
        // k(g1 − g2) + b = (k·g1 + (b + r)) − (k·g2 + r)
        Gate::Subtraction { minuend, subtrahend } => {
            let r = Zp::uniform(rng);
            garble_gate(circuit, cursors, keypairs, rng, minuend, k, b + r)?;
            garble_gate(circuit, cursors, keypairs, rng, subtrahend, k, r)
        }
        // k(g1·g2) + b = x1·x2 + (x3 + x4); see the classical compiler.
        Gate::Multiplication { multiplier, multiplicand } => {
            let r1 = Zp::uniform(rng);
            let r2 = Zp::uniform(rng);
            let r3 = Zp::uniform(rng);
            let kr2 = k * r2;
            let b_rest = b - (r1 * r2 + r3);
            garble_gate(circuit, cursors, keypairs, rng, multiplier, k, -r1)?;
            garble_gate(circuit, cursors, keypairs, rng, multiplicand, Zp::ONE, -r2)?;
            garble_gate(circuit, cursors, keypairs, rng, multiplier, kr2, r3)?;
            garble_gate(circuit, cursors, keypairs, rng, multiplicand, r1, b_rest)
        }
    }
}

/// Decode the Alice outputs from evaluated keys.
///
/// `cursors` must be rewound the same way as for [`garble`]; the pass then
/// consumes keys in exactly the order garbling filled them. `outputs` must
/// have the circuit's output count.
pub fn ungarble(
    circuit: &TwoPartyCircuit,
    cursors: &mut Configuration,
    keys: &Keys,
    outputs: &mut [Zp],
) -> Result<(), GarbleError> {
    for (&output, slot) in circuit.alice_output.iter().zip(outputs) {
        *slot = ungarble_gate(circuit, cursors, keys, output)?;
    }
    Ok(())
}

fn ungarble_gate(
    circuit: &TwoPartyCircuit,
    cursors: &mut Configuration,
    keys: &Keys,
    handle: GateHandle,
) -> Result<Zp, GarbleError> {
    match circuit.gates[handle] {
        Gate::ConstZero | Gate::ConstOne | Gate::ConstMinusOne => {
            let value = keys.offline_encoding[cursors.offline_encoding];
            cursors.offline_encoding += 1;
            Ok(value)
        }
        Gate::Input { agent, major, .. } => {
            let (values, cursor) = match agent {
                Agent::Alice => (&keys.alice_encoding[major], &mut cursors.alice_encoding[major]),
                Agent::Bob => (&keys.bob_encoding[major], &mut cursors.bob_encoding[major]),
                Agent::None | Agent::Random => return Err(GarbleError { handle }),
            };
            let value = values[*cursor];
            *cursor += 1;
            Ok(value)
        }
        Gate::Addition { augend, addend } => {
            let g1 = ungarble_gate(circuit, cursors, keys, augend)?;
            let g2 = ungarble_gate(circuit, cursors, keys, addend)?;
            Ok(g1 + g2)
        }
        Gate::Negation { target } => ungarble_gate(circuit, cursors, keys, target),
        Gate::Subtraction { minuend, subtrahend } => {
            let g1 = ungarble_gate(circuit, cursors, keys, minuend)?;
            let g2 = ungarble_gate(circuit, cursors, keys, subtrahend)?;
            Ok(g1 - g2)
        }
        Gate::Multiplication { multiplier, multiplicand } => {
            let x1 = ungarble_gate(circuit, cursors, keys, multiplier)?;
            let x2 = ungarble_gate(circuit, cursors, keys, multiplicand)?;
            let x3 = ungarble_gate(circuit, cursors, keys, multiplier)?;
            let x4 = ungarble_gate(circuit, cursors, keys, multiplicand)?;
            Ok(x1 * x2 + (x3 + x4))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{evaluate_circuit, single_ole_circuit};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Evaluate every key pair against the concrete inputs, as the two
    /// parties do distributively in the protocol.
    fn keys_from(
        config: &Configuration,
        keypairs: &KeyPairs,
        alice_inputs: &[Zp],
        bob_inputs: &[Zp],
    ) -> Keys {
        let mut keys = Keys::default();
        keys.apply_configuration(config);
        keys.offline_encoding.copy_from_slice(&keypairs.offline_encoding);
        for (i, &input) in alice_inputs.iter().enumerate() {
            for j in 0..config.alice_encoding[i] {
                keys.alice_encoding[i][j] =
                    keypairs.alice_coefficient[i][j] * input + keypairs.alice_intercept[i][j];
            }
        }
        for (i, &input) in bob_inputs.iter().enumerate() {
            for j in 0..config.bob_encoding[i] {
                keys.bob_encoding[i][j] =
                    keypairs.bob_coefficient[i][j] * input + keypairs.bob_intercept[i][j];
            }
        }
        keys
    }

    fn garble_roundtrip(
        circuit: &TwoPartyCircuit,
        alice_inputs: &[Zp],
        bob_inputs: &[Zp],
        rng: &mut StdRng,
    ) -> Vec<Zp> {
        let mut config = Configuration::default();
        configure(circuit, &mut config).unwrap();
        let mut keypairs = KeyPairs::default();
        keypairs.apply_configuration(&config);

        let mut cursors = config.clone();
        cursors.reset_preserve_configuration();
        garble(circuit, &mut cursors, &mut keypairs, rng).unwrap();
        assert_eq!(cursors, config, "garbling must fill every configured slot");

        let keys = keys_from(&config, &keypairs, alice_inputs, bob_inputs);
        cursors.reset_preserve_configuration();
        let mut outputs = vec![Zp::ZERO; circuit.alice_output.len()];
        ungarble(circuit, &mut cursors, &keys, &mut outputs).unwrap();
        outputs
    }

    #[test]
    fn single_ole_garbles_correctly() {
        let circuit = single_ole_circuit();
        let mut rng = StdRng::seed_from_u64(70);
        let outputs =
            garble_roundtrip(&circuit, &[Zp::new(7)], &[Zp::new(5), Zp::new(11)], &mut rng);
        assert_eq!(outputs, vec![Zp::new(46)]);
    }

    #[test]
    fn matches_plain_evaluation_on_random_inputs() {
        let circuit = single_ole_circuit();
        let mut rng = StdRng::seed_from_u64(71);
        for _ in 0..50 {
            let alice = [Zp::uniform(&mut rng)];
            let bob = [Zp::uniform(&mut rng), Zp::uniform(&mut rng)];
            let expected = evaluate_circuit(&circuit, &alice, &bob).unwrap();
            let outputs = garble_roundtrip(&circuit, &alice, &bob, &mut rng);
            assert_eq!(outputs, expected);
        }
    }

    #[test]
    fn reuses_storage_across_batches() {
        let circuit = single_ole_circuit();
        let mut config = Configuration::default();
        configure(&circuit, &mut config).unwrap();
        let mut keypairs = KeyPairs::default();
        keypairs.apply_configuration(&config);
        let mut cursors = config.clone();
        let mut rng = StdRng::seed_from_u64(72);

        // Two garbling passes over the same storage, both decode correctly.
        for round in 0..2u64 {
            cursors.reset_preserve_configuration();
            garble(&circuit, &mut cursors, &mut keypairs, &mut rng).unwrap();
            let alice = [Zp::new(100 + round as u32)];
            let bob = [Zp::new(3), Zp::new(9)];
            let keys = keys_from(&config, &keypairs, &alice, &bob);
            cursors.reset_preserve_configuration();
            let mut outputs = vec![Zp::ZERO];
            ungarble(&circuit, &mut cursors, &keys, &mut outputs).unwrap();
            assert_eq!(outputs, evaluate_circuit(&circuit, &alice, &bob).unwrap());
        }
    }

    #[test]
    fn random_input_gate_is_rejected() {
        let mut circuit = TwoPartyCircuit::default();
        let bad = circuit.insert_gate(Gate::Input { agent: Agent::Random, major: 0, minor: 0 });
        circuit.alice_output.push(bad);
        let mut config = Configuration::default();
        assert!(configure(&circuit, &mut config).is_err());
    }
}
