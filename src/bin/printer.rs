//! Compiled-circuit inspector
//!
//! Compiles the one-gate OLE circuit `z = a·x + b` with the classical DARE
//! compiler and prints both halves of the randomized encoding as readable
//! infix expressions: every encoder gate, the offline-encoding values, and
//! the per-input key pairs with their matching decoder inputs. Handy for
//! eyeballing what the compiler actually produces.

use vecole::circuit::{format_expression, single_ole_circuit};
use vecole::dare::compile_to_dare;

fn main() {
    let circuit = single_ole_circuit();
    let (encoder, decoder) = match compile_to_dare(&circuit) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("compilation failed: {e}");
            std::process::exit(-99);
        }
    };

    println!("EncodingCircuit contains {} gate(s).", encoder.gates.len());
    for handle in 0..encoder.gates.len() {
        println!("{}", format_expression(&encoder.gates, handle));
    }
    println!(
        "EncodingCircuit contains {} offline encoding(s).",
        encoder.offline_encoding.len()
    );
    for &offline in &encoder.offline_encoding {
        println!("\t{}", format_expression(&encoder.gates, offline));
    }
    for (side, per_input) in [
        ("Alice", &encoder.alice_encoding),
        ("Bob", &encoder.bob_encoding),
    ] {
        println!("EncodingCircuit contains {} {side} input(s).", per_input.len());
        for pairs in per_input {
            println!("----------------------------------------");
            for kp in pairs {
                println!("--------------------");
                println!("{}", format_expression(&encoder.gates, kp.coefficient));
                println!("{}", format_expression(&encoder.gates, kp.intercept));
            }
            println!("--------------------");
        }
        println!("----------------------------------------");
    }

    println!("DecodingCircuit contains {} gate(s).", decoder.gates.len());
    for handle in 0..decoder.gates.len() {
        println!("{}", format_expression(&decoder.gates, handle));
    }
    println!(
        "DecodingCircuit contains {} offline encoding(s).",
        decoder.offline_encoding.len()
    );
    for &offline in &decoder.offline_encoding {
        println!("\t{}", format_expression(&decoder.gates, offline));
    }
    for (side, per_input) in [
        ("Alice", &decoder.alice_encoding),
        ("Bob", &decoder.bob_encoding),
    ] {
        println!("DecodingCircuit contains {} {side} input(s).", per_input.len());
        for handles in per_input {
            let rendered: Vec<String> = handles
                .iter()
                .map(|&h| format_expression(&decoder.gates, h))
                .collect();
            println!("\t{}", rendered.join(", "));
        }
    }
    println!(
        "DecodingCircuit contains {} Alice output(s).",
        decoder.alice_output.len()
    );
    for &output in &decoder.alice_output {
        println!("\t{}", format_expression(&decoder.gates, output));
    }
}
