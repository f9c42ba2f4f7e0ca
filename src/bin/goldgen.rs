//! Goldreich-graph generator
//!
//! ```text
//! goldgen a b i [o]
//! ```
//!
//! Prints a freshly resampled expander graph to stdout in the artifact text
//! format. `a`/`b` are the additive/multiplicative arities.

use std::io::{self, Write};
use std::process;

use rand::rngs::StdRng;
use rand::SeedableRng;

use vecole::goldreich::GoldreichGraph;

const USAGE: &str = "\
Usage: goldgen a b i [o]

    a: the additive arity, minimum 3, maximum 50.
    b: the multiplicative arity, minimum 3, maximum 50.
    i: the number of inputs, minimum a+b+100, maximum 20000.
    o: optional, minimum i, maximum i*i*i, defaults to i*i";

fn parse_bounded(arg: &str, name: &str, min: usize, max: usize) -> Option<usize> {
    let value = match arg.parse::<usize>() {
        Ok(value) => value,
        Err(_) => {
            eprintln!("The format for {name} is incorrect.");
            return None;
        }
    };
    if value < min || value > max {
        eprintln!("The allowed range of {name} is [{min}, {max}].");
        return None;
    }
    Some(value)
}

fn parse_command_line(args: &[String]) -> Option<GoldreichGraph> {
    if args.len() < 4 || args.len() > 5 {
        return None;
    }
    let a = parse_bounded(&args[1], "a", 3, 50)?;
    let b = parse_bounded(&args[2], "b", 3, 50)?;
    let input_length = parse_bounded(&args[3], "i", a + b + 100, 20000)?;
    let output_length = if args.len() >= 5 {
        parse_bounded(
            &args[4],
            "o",
            input_length,
            input_length * input_length * input_length,
        )?
    } else {
        input_length * input_length
    };
    Some(GoldreichGraph { input_length, output_length, a, b, storage: Vec::new() })
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut graph = match parse_command_line(&args) {
        Some(graph) => graph,
        None => {
            eprintln!("{USAGE}");
            process::exit(-1);
        }
    };
    let mut rng = StdRng::from_entropy();
    graph.resample(&mut rng);
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    if graph.save_to(&mut out).and_then(|_| out.flush()).is_err() {
        eprintln!("Could not write the graph to stdout.");
        process::exit(-2);
    }
}
