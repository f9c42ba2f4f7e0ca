//! Input-file generator for smoke-testing the batch driver
//!
//! ```text
//! datagen [m]
//! ```
//!
//! Writes `m` uniform field elements (default 238328, one per line) to the
//! files `x`, `a` and `b` in the working directory, and the componentwise
//! `x·a + b` to `stdans` so a driver run can be diffed against it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;

use rand::rngs::StdRng;
use rand::SeedableRng;

use vecole::field::Zp;

const DEFAULT_BATCH_LENGTH: usize = 238328;

fn write_vector(name: &str, values: &[Zp]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(name)?);
    for value in values {
        writeln!(out, "{value}")?;
    }
    out.flush()
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let m = match args.len() {
        1 => DEFAULT_BATCH_LENGTH,
        2 => match args[1].parse::<usize>() {
            Ok(m) if m >= 1 => m,
            _ => {
                eprintln!("Usage: datagen [m]\n\n    m: the number of elements per file, default {DEFAULT_BATCH_LENGTH}.");
                process::exit(-1);
            }
        },
        _ => {
            eprintln!("Usage: datagen [m]\n\n    m: the number of elements per file, default {DEFAULT_BATCH_LENGTH}.");
            process::exit(-1);
        }
    };

    let mut rng = StdRng::from_entropy();
    let mut x = vec![Zp::ZERO; m];
    let mut a = vec![Zp::ZERO; m];
    let mut b = vec![Zp::ZERO; m];
    Zp::fill_uniform(&mut x, &mut rng);
    Zp::fill_uniform(&mut a, &mut rng);
    Zp::fill_uniform(&mut b, &mut rng);
    let z: Vec<Zp> = x
        .iter()
        .zip(&a)
        .zip(&b)
        .map(|((&x, &a), &b)| x * a + b)
        .collect();

    let written = write_vector("x", &x)
        .and_then(|_| write_vector("a", &a))
        .and_then(|_| write_vector("b", &b))
        .and_then(|_| write_vector("stdans", &z));
    if let Err(e) = written {
        eprintln!("Could not write the input files: {e}");
        process::exit(-2);
    }
}
