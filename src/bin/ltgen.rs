//! LT-code candidate search
//!
//! ```text
//! ltgen ofn w v [c]
//! ```
//!
//! Tunes the robust-soliton constant `c` until the distribution yields the
//! requested output symbol count, then searches random candidate codes
//! forever: each candidate is screened on 500 random decode trials under a
//! quarter erasure, promising ones are re-tested on 20 000 trials, and every
//! new best is saved to `<ofn>.<NNN>.luby`. Stop it with Ctrl-C once the
//! success rate is good enough.

use std::fs::File;
use std::io::BufWriter;
use std::process;

use anyhow::bail;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vecole::erasure::erase_subset_exact;
use vecole::field::Zp;
use vecole::luby::{create_lt_code, LtCode, RobustSolitonDistribution};

const SMALL_SAMPLE_SIZE: usize = 500;
const LARGE_SAMPLE_SIZE: usize = 20000;

const USAGE: &str = "\
Usage: ltgen ofn w v [c]

  ofn: the prefix of output file.
    w: the number of inputs to the LT code (10000 for k = 182, 20000 for k = 240).
    v: the number of outputs from the LT code (33124 for k = 182, 57600 for k = 240).
    c: optional, minimum c in the LT code, defaults to 0.5.";

fn parse_prefix(arg: &str) -> Option<&str> {
    if arg.len() < 3 {
        eprintln!("The minimal length of ofn is 3.");
        return None;
    }
    if arg.len() > 20 {
        eprintln!("The maximal length of ofn is 20.");
        return None;
    }
    if !arg.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        eprintln!("The allowed characters for ofn are 0-9, a-z, A-Z and _.");
        return None;
    }
    Some(arg)
}

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

struct CommandLine {
    prefix: String,
    w: usize,
    v: usize,
    c: f64,
}

fn parse_command_line(args: &[String]) -> Option<CommandLine> {
    if args.len() < 4 || args.len() > 5 {
        return None;
    }
    let prefix = parse_prefix(&args[1])?.to_owned();
    let w = parse_bounded(&args[2], "w", 5000, 40000)?;
    let v = parse_bounded(&args[3], "v", 2 * w, 4 * w)?;
    let mut c = 0.5;
    if args.len() >= 5 {
        c = match args[4].parse::<f64>() {
            Ok(c) if (0.5..=20.0).contains(&c) => c,
            Ok(_) => {
                eprintln!("The allowed range of c is [0.5, 20].");
                return None;
            }
            Err(_) => {
                eprintln!("The format for c is incorrect.");
                return None;
            }
        };
    }
    Some(CommandLine { prefix, w, v, c })
}

/// Decode success rate of `code` over `count` random trials with `v/4`
/// outputs erased. A decode that succeeds with the wrong cleartext is a bug
/// in the algorithm, not a bad candidate.
fn test_lt_code(code: &LtCode, count: usize, rng: &mut StdRng) -> anyhow::Result<f64> {
    let w = code.input_symbol_size;
    let v = code.output_symbol_size();
    let mut plain = vec![Zp::ZERO; w];
    let mut encoded = vec![Zp::ZERO; v];
    let mut decoded = vec![Zp::ZERO; w];
    let mut solved = vec![false; w];
    let mut not_noisy = vec![true; v];
    let mut surrogate = LtCode::default();
    let mut successes = 0usize;
    for _ in 0..count {
        Zp::fill_uniform(&mut plain, rng);
        not_noisy.fill(true);
        erase_subset_exact(&mut not_noisy, v / 4, rng);
        encoded.fill(Zp::ZERO);
        code.encode(&mut encoded, not_noisy.iter().copied(), &plain);
        solved.fill(false);
        surrogate.clone_from(code);
        if !surrogate.decode_destructive(&mut solved, &mut decoded, &not_noisy, &mut encoded) {
            continue;
        }
        for (i, (d, p)) in decoded.iter().zip(&plain).enumerate() {
            if d != p {
                bail!("mistake in the Luby Transform algorithm at index {i}: was {p}, decoded to {d}");
            }
        }
        successes += 1;
    }
    Ok(successes as f64 / count as f64)
}

fn run(cli: &CommandLine) -> anyhow::Result<()> {
    // Walk c until the distribution's output count lands on the requested v:
    // upward past it, then back down to the largest c not exceeding it.
    let mut dist = RobustSolitonDistribution::new(cli.w, cli.c, 0.01);
    while dist.output_symbol_size() <= cli.v {
        dist.c += 1e-5;
        dist.invalidate_cache();
    }
    while dist.output_symbol_size() > cli.v {
        dist.c -= 1e-5;
        dist.invalidate_cache();
    }
    info!(c = dist.c, v = dist.output_symbol_size(), "found degree-distribution constant");

    let mut rng = StdRng::from_entropy();
    let mut best_success_rate = 0.0f64;
    let mut candidate_index = 0u32;
    loop {
        let mut code = create_lt_code(&dist, &mut rng);
        // Low-degree bins first speeds up peeling.
        code.bins.sort_unstable_by_key(|bin| bin.degree);
        let screening_rate = test_lt_code(&code, SMALL_SAMPLE_SIZE, &mut rng)?;
        if screening_rate <= best_success_rate {
            continue;
        }
        info!(
            rate = screening_rate * 100.0,
            sample_size = SMALL_SAMPLE_SIZE,
            "found a good candidate, testing more"
        );
        let confirmed_rate = test_lt_code(&code, LARGE_SAMPLE_SIZE, &mut rng)?;
        if confirmed_rate <= best_success_rate {
            info!("further test finished: discarded");
            continue;
        }
        let file_name = format!("{}.{:03}.luby", cli.prefix, candidate_index);
        candidate_index += 1;
        info!(
            rate = confirmed_rate * 100.0,
            sample_size = LARGE_SAMPLE_SIZE,
            file = file_name.as_str(),
            "further test finished: saving"
        );
        let mut out = BufWriter::new(File::create(&file_name)?);
        code.save_to(&mut out)?;
        best_success_rate = confirmed_rate;
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_command_line(&args) {
        Some(cli) => cli,
        None => {
            eprintln!("{USAGE}");
            process::exit(-1);
        }
    };
    if let Err(e) = run(&cli) {
        eprintln!("{e:#}");
        process::exit(-1);
    }
}
