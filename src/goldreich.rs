//! Goldreich's local pseudorandom generator
//!
//! `G: Z_p^n → Z_p^m` on an expander graph: output `i` is
//! `Σ_{j ∈ A_i} s_j + Π_{j ∈ B_i} s_j` for a random size-`a` subset `A_i`
//! and size-`b` subset `B_i`, all `a + b` indices distinct. The graph is the
//! flat storage of those index tuples, `a + b` per output.
//!
//! [`GoldreichGraph::masked_ole_circuit`] compiles the graph into the
//! two-party circuit the batch driver garbles: Alice inputs the seed `s`,
//! Bob inputs `a` and his blinding vector `c`, and output `i` computes
//! `c_i + a_i·Σ s_{A_i} + a_i·Π s_{B_i}`, i.e. `a·G(s) + c`.

use std::collections::BTreeSet;
use std::io::{self, Write};

use rand::Rng;

use crate::circuit::{Agent, Gate, GateHandle, TwoPartyCircuit};
use crate::field::Zp;
use crate::textio::{self, TextError, TokenStream};

/// The expander graph backing `G`.
#[derive(Clone, Debug, Default)]
pub struct GoldreichGraph {
    pub input_length: usize,
    pub output_length: usize,
    /// Additive arity: size of each summand subset.
    pub a: usize,
    /// Multiplicative arity: size of each factor subset.
    pub b: usize,
    /// `(a + b) · output_length` seed indices, summands first per output.
    pub storage: Vec<usize>,
}

impl GoldreichGraph {
    /// Redraw every edge: per output, `a + b` distinct uniform seed indices.
    pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut used = BTreeSet::new();
        self.storage.clear();
        self.storage.reserve((self.a + self.b) * self.output_length);
        for _ in 0..self.output_length {
            used.clear();
            for _ in 0..self.a + self.b {
                let index = loop {
                    let candidate = rng.gen_range(0..self.input_length);
                    if used.insert(candidate) {
                        break candidate;
                    }
                };
                self.storage.push(index);
            }
        }
    }

    /// The `a + b` indices of output `i`, summands first.
    #[inline]
    pub fn output_indices(&self, i: usize) -> &[usize] {
        let width = self.a + self.b;
        &self.storage[i * width..(i + 1) * width]
    }

    /// Evaluate `G(seed)` into `out` (length `output_length`).
    pub fn expand(&self, seed: &[Zp], out: &mut [Zp]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let indices = self.output_indices(i);
            let (summands, factors) = indices.split_at(self.a);
            let sum: Zp = summands.iter().map(|&j| seed[j]).sum();
            let product = factors.iter().fold(Zp::ONE, |acc, &j| acc * seed[j]);
            *slot = sum + product;
        }
    }

    /// Compile the graph into the circuit computing `a·G(s) + c`.
    ///
    /// Gate layout: seed inputs `0..n`, then Bob's `a` inputs (majors
    /// `0..m`), then Bob's `c` inputs (majors `m..2m`), then per output a
    /// balanced sum/product assembly.
    pub fn masked_ole_circuit(&self) -> TwoPartyCircuit {
        let n = self.input_length;
        let m = self.output_length;
        let mut circuit = TwoPartyCircuit::default();
        circuit.alice_input = 0..n;
        circuit.bob_input = n..n + 2 * m;
        for major in 0..n {
            circuit.insert_gate(Gate::Input { agent: Agent::Alice, major, minor: 0 });
        }
        for major in 0..2 * m {
            circuit.insert_gate(Gate::Input { agent: Agent::Bob, major, minor: 0 });
        }
        let mut summands = vec![0 as GateHandle; self.a];
        let mut factors = vec![0 as GateHandle; self.b + 1];
        for i in 0..m {
            let a_gate = n + i;
            let c_gate = n + m + i;
            let indices = self.output_indices(i);
            // Seed indices are exactly the seed input-gate handles.
            summands.copy_from_slice(&indices[..self.a]);
            factors[..self.b].copy_from_slice(&indices[self.a..]);
            factors[self.b] = a_gate;
            let seed_sum = balanced_sum(&mut circuit, &summands);
            let masked_sum = circuit
                .insert_gate(Gate::Multiplication { multiplier: a_gate, multiplicand: seed_sum });
            let masked_product = balanced_product(&mut circuit, &factors);
            let blinded = balanced_sum(&mut circuit, &[c_gate, masked_sum, masked_product]);
            circuit.alice_output.push(blinded);
        }
        circuit
    }

    /// Serialize: `n m a b |storage|` then the flat storage.
    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "{} {} {} {} {}",
            self.input_length,
            self.output_length,
            self.a,
            self.b,
            self.storage.len()
        )?;
        textio::write_usize_line(w, &self.storage)
    }

    /// Deserialize a graph saved by [`Self::save_to`].
    pub fn load_from(ts: &mut TokenStream) -> Result<GoldreichGraph, TextError> {
        let input_length = ts.next_usize()?;
        let output_length = ts.next_usize()?;
        let a = ts.next_usize()?;
        let b = ts.next_usize()?;
        let storage_len = ts.next_usize()?;
        let mut storage = vec![0usize; storage_len];
        ts.fill_usize(&mut storage)?;
        Ok(GoldreichGraph { input_length, output_length, a, b, storage })
    }
}

fn balanced_sum(circuit: &mut TwoPartyCircuit, summands: &[GateHandle]) -> GateHandle {
    debug_assert!(!summands.is_empty());
    if summands.len() == 1 {
        return summands[0];
    }
    let half = summands.len() / 2;
    let g1 = balanced_sum(circuit, &summands[..half]);
    let g2 = balanced_sum(circuit, &summands[half..]);
    circuit.insert_gate(Gate::Addition { augend: g1, addend: g2 })
}

fn balanced_product(circuit: &mut TwoPartyCircuit, factors: &[GateHandle]) -> GateHandle {
    debug_assert!(!factors.is_empty());
    if factors.len() == 1 {
        return factors[0];
    }
    let half = factors.len() / 2;
    let g1 = balanced_product(circuit, &factors[..half]);
    let g2 = balanced_product(circuit, &factors[half..]);
    circuit.insert_gate(Gate::Multiplication { multiplier: g1, multiplicand: g2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::evaluate_circuit;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_graph(rng: &mut StdRng) -> GoldreichGraph {
        let mut graph = GoldreichGraph {
            input_length: 16,
            output_length: 24,
            a: 3,
            b: 3,
            storage: Vec::new(),
        };
        graph.resample(rng);
        graph
    }

    #[test]
    fn resample_draws_distinct_in_range_indices() {
        let mut rng = StdRng::seed_from_u64(80);
        let mut graph = GoldreichGraph {
            input_length: 300,
            output_length: 300 * 300,
            a: 3,
            b: 3,
            storage: Vec::new(),
        };
        for _ in 0..2 {
            graph.resample(&mut rng);
            assert_eq!(graph.storage.len(), 6 * graph.output_length);
            for i in 0..graph.output_length {
                let indices = graph.output_indices(i);
                let distinct: BTreeSet<usize> = indices.iter().copied().collect();
                assert_eq!(distinct.len(), 6, "indices of one output must be distinct");
                assert!(indices.iter().all(|&j| j < graph.input_length));
            }
        }
    }

    #[test]
    fn expand_matches_the_definition() {
        let mut rng = StdRng::seed_from_u64(81);
        let graph = test_graph(&mut rng);
        let mut seed = vec![Zp::ZERO; graph.input_length];
        Zp::fill_uniform(&mut seed, &mut rng);
        let mut out = vec![Zp::ZERO; graph.output_length];
        graph.expand(&seed, &mut out);
        for (i, &value) in out.iter().enumerate() {
            let indices = graph.output_indices(i);
            let sum: Zp = indices[..graph.a].iter().map(|&j| seed[j]).sum();
            let product = indices[graph.a..].iter().fold(Zp::ONE, |acc, &j| acc * seed[j]);
            assert_eq!(value, sum + product);
        }
    }

    #[test]
    fn masked_ole_circuit_computes_a_g_s_plus_c() {
        let mut rng = StdRng::seed_from_u64(82);
        let graph = test_graph(&mut rng);
        let (n, m) = (graph.input_length, graph.output_length);

        let mut seed = vec![Zp::ZERO; n];
        Zp::fill_uniform(&mut seed, &mut rng);
        let mut a = vec![Zp::ZERO; m];
        Zp::fill_uniform(&mut a, &mut rng);
        let mut c = vec![Zp::ZERO; m];
        Zp::fill_uniform(&mut c, &mut rng);

        let circuit = graph.masked_ole_circuit();
        assert_eq!(circuit.alice_input_len(), n);
        assert_eq!(circuit.bob_input_len(), 2 * m);
        assert_eq!(circuit.alice_output.len(), m);

        let mut bob_inputs = a.clone();
        bob_inputs.extend_from_slice(&c);
        let outputs = evaluate_circuit(&circuit, &seed, &bob_inputs).unwrap();

        let mut expansion = vec![Zp::ZERO; m];
        graph.expand(&seed, &mut expansion);
        for i in 0..m {
            assert_eq!(outputs[i], a[i] * expansion[i] + c[i]);
        }
    }

    #[test]
    fn persistence_round_trip() {
        let mut rng = StdRng::seed_from_u64(83);
        let graph = test_graph(&mut rng);
        let mut buf = Vec::new();
        graph.save_to(&mut buf).unwrap();
        let mut ts = TokenStream::from_reader(buf.as_slice()).unwrap();
        let reloaded = GoldreichGraph::load_from(&mut ts).unwrap();
        assert_eq!(reloaded.input_length, graph.input_length);
        assert_eq!(reloaded.output_length, graph.output_length);
        assert_eq!(reloaded.a, graph.a);
        assert_eq!(reloaded.b, graph.b);
        assert_eq!(reloaded.storage, graph.storage);
    }
}
