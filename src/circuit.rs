//! Arithmetic circuits
//!
//! A circuit is an ordered gate sequence forming a topologically-sorted DAG:
//! every operand handle refers to an earlier gate, and a gate's handle is its
//! index in the sequence. [`Gate`] is a sum type with one variant per kind,
//! so every pass over a circuit is an exhaustive `match`; there is no
//! "unmatched gate" at runtime.
//!
//! [`Evaluator`] is the plain (non-garbled) evaluation path: a memoizing
//! walk used by tests, tools and the randomized-encoding correctness checks.

use std::io::{self, Write};
use std::ops::Range;

use crate::field::Zp;
use crate::textio::{self, TextError, TokenStream};

/// Index of a gate within its owning circuit.
pub type GateHandle = usize;

/// Who supplies the value of an input gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Agent {
    /// Offline-encoding inputs of a decoding circuit.
    None,
    Alice,
    Bob,
    /// Encoder-internal randomness.
    Random,
}

impl Agent {
    /// The on-disk encoding (stable across the artifact format).
    pub fn code(self) -> usize {
        match self {
            Agent::None => 0,
            Agent::Alice => 1,
            Agent::Bob => 1 << 1,
            Agent::Random => 1 << 17,
        }
    }

    /// Decode the on-disk representation.
    pub fn from_code(code: usize) -> Option<Agent> {
        match code {
            0 => Some(Agent::None),
            1 => Some(Agent::Alice),
            2 => Some(Agent::Bob),
            131072 => Some(Agent::Random),
            _ => None,
        }
    }
}

/// One gate. Operand handles always point at earlier gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    ConstZero,
    ConstOne,
    ConstMinusOne,
    Input { agent: Agent, major: usize, minor: usize },
    Addition { augend: GateHandle, addend: GateHandle },
    Negation { target: GateHandle },
    Subtraction { minuend: GateHandle, subtrahend: GateHandle },
    Multiplication { multiplier: GateHandle, multiplicand: GateHandle },
}

impl Gate {
    fn kind_code(&self) -> usize {
        match self {
            Gate::ConstZero => 1,
            Gate::ConstOne => 2,
            Gate::ConstMinusOne => 3,
            Gate::Input { .. } => 4,
            Gate::Addition { .. } => 5,
            Gate::Negation { .. } => 6,
            Gate::Subtraction { .. } => 7,
            Gate::Multiplication { .. } => 8,
        }
    }

    /// Write `id kind payload…` on one line.
    pub fn save_to<W: Write>(&self, id: GateHandle, w: &mut W) -> io::Result<()> {
        write!(w, "{} {}", id, self.kind_code())?;
        match *self {
            Gate::ConstZero | Gate::ConstOne | Gate::ConstMinusOne => {}
            Gate::Input { agent, major, minor } => {
                write!(w, " {} {} {}", agent.code(), major, minor)?;
            }
            Gate::Addition { augend, addend } => write!(w, " {augend} {addend}")?,
            Gate::Negation { target } => write!(w, " {target}")?,
            Gate::Subtraction { minuend, subtrahend } => {
                write!(w, " {minuend} {subtrahend}")?;
            }
            Gate::Multiplication { multiplier, multiplicand } => {
                write!(w, " {multiplier} {multiplicand}")?;
            }
        }
        writeln!(w)
    }

    /// Read one gate as written by [`Self::save_to`]; returns its stored id.
    pub fn load_from(ts: &mut TokenStream) -> Result<(GateHandle, Gate), TextError> {
        let id = ts.next_usize()?;
        let kind = ts.next_usize()?;
        let gate = match kind {
            1 => Gate::ConstZero,
            2 => Gate::ConstOne,
            3 => Gate::ConstMinusOne,
            4 => {
                let agent_code = ts.next_usize()?;
                let agent = Agent::from_code(agent_code)
                    .ok_or_else(|| TextError::Malformed(agent_code.to_string()))?;
                let major = ts.next_usize()?;
                let minor = ts.next_usize()?;
                Gate::Input { agent, major, minor }
            }
            5 => Gate::Addition { augend: ts.next_usize()?, addend: ts.next_usize()? },
            6 => Gate::Negation { target: ts.next_usize()? },
            7 => Gate::Subtraction { minuend: ts.next_usize()?, subtrahend: ts.next_usize()? },
            8 => Gate::Multiplication {
                multiplier: ts.next_usize()?,
                multiplicand: ts.next_usize()?,
            },
            other => return Err(TextError::Malformed(other.to_string())),
        };
        Ok((id, gate))
    }
}

/// A circuit with Alice/Bob input ranges and Alice's output handles.
///
/// Input gates occupy the contiguous ranges `alice_input` and `bob_input`;
/// every output handle refers to an existing gate.
#[derive(Clone, Debug, Default)]
pub struct TwoPartyCircuit {
    pub gates: Vec<Gate>,
    pub alice_input: Range<GateHandle>,
    pub bob_input: Range<GateHandle>,
    pub alice_output: Vec<GateHandle>,
}

impl TwoPartyCircuit {
    /// Append a gate; the returned handle is its position.
    pub fn insert_gate(&mut self, gate: Gate) -> GateHandle {
        let handle = self.gates.len();
        self.gates.push(gate);
        handle
    }

    /// Number of Alice input gates.
    pub fn alice_input_len(&self) -> usize {
        self.alice_input.end - self.alice_input.start
    }

    /// Number of Bob input gates.
    pub fn bob_input_len(&self) -> usize {
        self.bob_input.end - self.bob_input.start
    }

    /// Serialize the gate sequence, input ranges and output list.
    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "{} {} {} {} {} {}",
            self.gates.len(),
            self.alice_input.start,
            self.alice_input.end,
            self.bob_input.start,
            self.bob_input.end,
            self.alice_output.len()
        )?;
        for (id, gate) in self.gates.iter().enumerate() {
            gate.save_to(id, w)?;
        }
        textio::write_usize_line(w, &self.alice_output)
    }

    /// Deserialize a circuit saved by [`Self::save_to`].
    pub fn load_from(ts: &mut TokenStream) -> Result<TwoPartyCircuit, TextError> {
        let gate_count = ts.next_usize()?;
        let alice_begin = ts.next_usize()?;
        let alice_end = ts.next_usize()?;
        let bob_begin = ts.next_usize()?;
        let bob_end = ts.next_usize()?;
        let output_count = ts.next_usize()?;
        let mut gates = Vec::with_capacity(gate_count);
        for _ in 0..gate_count {
            let (_, gate) = Gate::load_from(ts)?;
            gates.push(gate);
        }
        let mut alice_output = vec![0usize; output_count];
        ts.fill_usize(&mut alice_output)?;
        Ok(TwoPartyCircuit {
            gates,
            alice_input: alice_begin..alice_end,
            bob_input: bob_begin..bob_end,
            alice_output,
        })
    }
}

// Parenthesization levels for rendering gates as infix expressions. The
// entry point uses `LOWEST` so a top-level expression carries no parens.
const NEGATION_PRECEDENCE: u32 = 0x20;
const MULTIPLICATION_PRECEDENCE: u32 = 0x30;
const SUBTRACTION_PRECEDENCE: u32 = 0x40;
const ADDITION_PRECEDENCE: u32 = 0x50;
const LOWEST_PRECEDENCE: u32 = u32::MAX;

fn format_gate(gates: &[Gate], handle: GateHandle, outer: u32, out: &mut String) {
    match gates[handle] {
        Gate::ConstZero => out.push('0'),
        Gate::ConstOne => out.push('1'),
        Gate::ConstMinusOne => {
            if outer != LOWEST_PRECEDENCE {
                out.push_str("(-1)");
            } else {
                out.push_str("-1");
            }
        }
        Gate::Input { agent, major, minor } => {
            let owner = match agent {
                Agent::None => "X",
                Agent::Alice => "A",
                Agent::Bob => "B",
                Agent::Random => "R",
            };
            out.push_str(&format!("{owner}[{major}][{minor}]"));
        }
        Gate::Addition { augend, addend } => {
            let parens = outer < ADDITION_PRECEDENCE;
            if parens {
                out.push('(');
            }
            format_gate(gates, augend, ADDITION_PRECEDENCE, out);
            out.push_str(" + ");
            format_gate(gates, addend, ADDITION_PRECEDENCE, out);
            if parens {
                out.push(')');
            }
        }
        Gate::Negation { target } => {
            let parens = outer != LOWEST_PRECEDENCE;
            if parens {
                out.push('(');
            }
            out.push('-');
            format_gate(gates, target, NEGATION_PRECEDENCE, out);
            if parens {
                out.push(')');
            }
        }
        Gate::Subtraction { minuend, subtrahend } => {
            let parens = outer <= SUBTRACTION_PRECEDENCE;
            if parens {
                out.push('(');
            }
            format_gate(gates, minuend, ADDITION_PRECEDENCE, out);
            out.push_str(" - ");
            // The subtrahend sits behind a minus sign, so any further
            // addition or subtraction inside it must group.
            format_gate(gates, subtrahend, SUBTRACTION_PRECEDENCE, out);
            if parens {
                out.push(')');
            }
        }
        Gate::Multiplication { multiplier, multiplicand } => {
            let parens = outer < MULTIPLICATION_PRECEDENCE;
            if parens {
                out.push('(');
            }
            format_gate(gates, multiplier, MULTIPLICATION_PRECEDENCE, out);
            out.push_str(" * ");
            format_gate(gates, multiplicand, MULTIPLICATION_PRECEDENCE, out);
            if parens {
                out.push(')');
            }
        }
    }
}

/// Render the gate at `handle` as an infix expression over the input gates,
/// e.g. `B[0][0] * A[0][0] + B[1][0]`.
pub fn format_expression(gates: &[Gate], handle: GateHandle) -> String {
    let mut out = String::new();
    format_gate(gates, handle, LOWEST_PRECEDENCE, &mut out);
    out
}

/// Plain evaluation failure.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("input gate {handle} evaluated before a value was placed on it")]
    UnboundInput { handle: GateHandle },
}

/// Memoizing evaluator over a gate sequence.
///
/// Input gates must receive their values through [`Evaluator::place`] before
/// anything depending on them is evaluated.
pub struct Evaluator<'a> {
    gates: &'a [Gate],
    memory: Vec<Option<Zp>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(gates: &'a [Gate]) -> Self {
        Evaluator { gates, memory: vec![None; gates.len()] }
    }

    /// Pin a value onto a gate (normally an input gate).
    pub fn place(&mut self, handle: GateHandle, value: Zp) {
        self.memory[handle] = Some(value);
    }

    /// Evaluate the gate at `handle`, reusing every already-known value.
    pub fn evaluate(&mut self, handle: GateHandle) -> Result<Zp, EvalError> {
        if let Some(value) = self.memory[handle] {
            return Ok(value);
        }
        let value = match self.gates[handle] {
            Gate::ConstZero => Zp::ZERO,
            Gate::ConstOne => Zp::ONE,
            Gate::ConstMinusOne => -Zp::ONE,
            Gate::Input { .. } => return Err(EvalError::UnboundInput { handle }),
            Gate::Addition { augend, addend } => self.evaluate(augend)? + self.evaluate(addend)?,
            Gate::Negation { target } => -self.evaluate(target)?,
            Gate::Subtraction { minuend, subtrahend } => {
                self.evaluate(minuend)? - self.evaluate(subtrahend)?
            }
            Gate::Multiplication { multiplier, multiplicand } => {
                self.evaluate(multiplier)? * self.evaluate(multiplicand)?
            }
        };
        self.memory[handle] = Some(value);
        Ok(value)
    }
}

/// Evaluate a two-party circuit's Alice outputs on concrete inputs.
pub fn evaluate_circuit(
    circuit: &TwoPartyCircuit,
    alice_inputs: &[Zp],
    bob_inputs: &[Zp],
) -> Result<Vec<Zp>, EvalError> {
    let mut evaluator = Evaluator::new(&circuit.gates);
    for (handle, &value) in circuit.alice_input.clone().zip(alice_inputs) {
        evaluator.place(handle, value);
    }
    for (handle, &value) in circuit.bob_input.clone().zip(bob_inputs) {
        evaluator.place(handle, value);
    }
    circuit
        .alice_output
        .iter()
        .map(|&out| evaluator.evaluate(out))
        .collect()
}

/// The one-gate OLE circuit `z = a·x + b`: Alice input `x`, Bob inputs
/// `(a, b)`, one Alice output.
pub fn single_ole_circuit() -> TwoPartyCircuit {
    let mut circuit = TwoPartyCircuit::default();
    let alice_x = circuit.insert_gate(Gate::Input { agent: Agent::Alice, major: 0, minor: 0 });
    let bob_a = circuit.insert_gate(Gate::Input { agent: Agent::Bob, major: 0, minor: 0 });
    let bob_b = circuit.insert_gate(Gate::Input { agent: Agent::Bob, major: 1, minor: 0 });
    circuit.alice_input = alice_x..alice_x + 1;
    circuit.bob_input = bob_a..bob_b + 1;
    let ax = circuit.insert_gate(Gate::Multiplication { multiplier: bob_a, multiplicand: alice_x });
    let axb = circuit.insert_gate(Gate::Addition { augend: ax, addend: bob_b });
    circuit.alice_output.push(axb);
    circuit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ole_evaluates() {
        let circuit = single_ole_circuit();
        let outputs =
            evaluate_circuit(&circuit, &[Zp::new(7)], &[Zp::new(5), Zp::new(11)]).unwrap();
        assert_eq!(outputs, vec![Zp::new(46)]);
    }

    #[test]
    fn constants_and_negation() {
        let mut circuit = TwoPartyCircuit::default();
        let one = circuit.insert_gate(Gate::ConstOne);
        let minus_one = circuit.insert_gate(Gate::ConstMinusOne);
        let zero = circuit.insert_gate(Gate::ConstZero);
        let sum = circuit.insert_gate(Gate::Addition { augend: one, addend: minus_one });
        let neg = circuit.insert_gate(Gate::Negation { target: sum });
        let total = circuit.insert_gate(Gate::Subtraction { minuend: neg, subtrahend: zero });
        circuit.alice_output.push(total);
        let outputs = evaluate_circuit(&circuit, &[], &[]).unwrap();
        assert_eq!(outputs, vec![Zp::ZERO]);
    }

    #[test]
    fn unbound_input_is_an_error() {
        let circuit = single_ole_circuit();
        let mut evaluator = Evaluator::new(&circuit.gates);
        assert!(matches!(
            evaluator.evaluate(circuit.alice_output[0]),
            Err(EvalError::UnboundInput { .. })
        ));
    }

    #[test]
    fn expressions_render_with_minimal_parens() {
        let circuit = single_ole_circuit();
        assert_eq!(
            format_expression(&circuit.gates, circuit.alice_output[0]),
            "B[0][0] * A[0][0] + B[1][0]"
        );

        let mut nested = TwoPartyCircuit::default();
        let x = nested.insert_gate(Gate::Input { agent: Agent::Alice, major: 0, minor: 0 });
        let y = nested.insert_gate(Gate::Input { agent: Agent::Bob, major: 0, minor: 0 });
        let sum = nested.insert_gate(Gate::Addition { augend: x, addend: y });
        let diff = nested.insert_gate(Gate::Subtraction { minuend: x, subtrahend: sum });
        let product = nested.insert_gate(Gate::Multiplication { multiplier: diff, multiplicand: y });
        assert_eq!(
            format_expression(&nested.gates, product),
            "(A[0][0] - (A[0][0] + B[0][0])) * B[0][0]"
        );
    }

    #[test]
    fn persistence_round_trip() {
        let circuit = single_ole_circuit();
        let mut buf = Vec::new();
        circuit.save_to(&mut buf).unwrap();
        let mut ts = TokenStream::from_reader(buf.as_slice()).unwrap();
        let reloaded = TwoPartyCircuit::load_from(&mut ts).unwrap();
        assert_eq!(reloaded.gates, circuit.gates);
        assert_eq!(reloaded.alice_input, circuit.alice_input);
        assert_eq!(reloaded.bob_input, circuit.bob_input);
        assert_eq!(reloaded.alice_output, circuit.alice_output);
    }
}
