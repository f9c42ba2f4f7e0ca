//! Sparse-code candidate search
//!
//! ```text
//! sparsegen ofn k [d] [u] [v]
//! ```
//!
//! Searches random `d`-sparse codes forever with the same screen/confirm
//! loop as `ltgen`, testing the full two-phase roundtrip: Gaussian decoding
//! of the kept upper rows must return the message, and re-encoding the
//! negated message must cancel every kept lower row. New bests are saved to
//! `<ofn>.<NNN>.sparse`.

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
use vecole::sparse::FastSparseLinearCode;

const SMALL_SAMPLE_SIZE: usize = 500;
const LARGE_SAMPLE_SIZE: usize = 20000;

const USAGE: &str = "\
Usage: sparsegen ofn k [d] [u] [v]

  ofn: the prefix of output file.
    k: the length of the random vector, 182 or 240 (100 ~ 300).
    d: the sparsity parameter, default = 10 (5 ~ 50).
    u: the length of the top rows,
       default = minimum = 4*ceiling(k/3),
       maximum = 10 * default.
    v: the length of the bottom rows, default = k*k,
       minimum = k, maximum = k * k * k.";

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
    code: FastSparseLinearCode,
}

fn parse_command_line(args: &[String]) -> Option<CommandLine> {
    if args.len() < 3 || args.len() > 6 {
        return None;
    }
    let prefix = parse_prefix(&args[1])?.to_owned();
    let k = parse_bounded(&args[2], "k", 100, 300)?;
    let default_u = (k + 2) / 3 * 4;
    let mut d = 10;
    let mut u = default_u;
    let mut v = k * k;
    if args.len() >= 4 {
        d = parse_bounded(&args[3], "d", 5, 50)?;
    }
    if args.len() >= 5 {
        u = parse_bounded(&args[4], "u", default_u, 10 * default_u)?;
    }
    if args.len() >= 6 {
        v = parse_bounded(&args[5], "v", k, k * k * k)?;
    }
    Some(CommandLine {
        prefix,
        code: FastSparseLinearCode { k, d, u, v, entries: Vec::new() },
    })
}

/// Two-phase roundtrip success rate over `count` random trials with a
/// quarter of each part erased.
fn test_sparse_code(
    code: &FastSparseLinearCode,
    count: usize,
    rng: &mut StdRng,
) -> anyhow::Result<f64> {
    let (k, u, v) = (code.k, code.u, code.v);
    let kept_upper = u - u / 4;
    let mut not_noisy = vec![true; u + v];
    let mut plain = vec![Zp::ZERO; k];
    let mut encoded = vec![Zp::ZERO; u + v];
    let mut decoded = vec![Zp::ZERO; k];
    let mut matrix = vec![Zp::ZERO; kept_upper * (k + 1)];
    let mut successes = 0usize;
    for _ in 0..count {
        not_noisy.fill(true);
        erase_subset_exact(&mut not_noisy[..u], u / 4, rng);
        erase_subset_exact(&mut not_noisy[u..], v / 4, rng);
        Zp::fill_uniform(&mut plain, rng);
        encoded.fill(Zp::ZERO);
        matrix.fill(Zp::ZERO);
        code.encode_both_parts(&mut encoded, not_noisy.iter().copied(), &plain);
        if !code.decode_from_upper_part_destructive(
            &encoded[..u],
            &not_noisy[..u],
            &mut decoded,
            &mut matrix,
        ) {
            continue;
        }
        for (i, (got, want)) in decoded.iter().zip(&plain).enumerate() {
            if got != want {
                bail!("mistake in the sparse code algorithm (phase 1) at index {i}: was {want}, decoded to {got}");
            }
        }
        for z in &mut decoded {
            *z = -*z;
        }
        code.encode_lower_part(&mut encoded[u..], not_noisy[u..].iter().copied(), &decoded);
        for (i, (e, &kept)) in encoded[u..].iter().zip(&not_noisy[u..]).enumerate() {
            if kept && !e.is_zero() {
                bail!("mistake in the sparse code algorithm (phase 2) at index u+{i}: derandomised to {e}");
            }
        }
        successes += 1;
    }
    Ok(successes as f64 / count as f64)
}

fn run(cli: &mut CommandLine) -> anyhow::Result<()> {
    let mut rng = StdRng::from_entropy();
    let mut best_success_rate = 0.0f64;
    let mut candidate_index = 0u32;
    loop {
        cli.code.resample(&mut rng);
        let screening_rate = test_sparse_code(&cli.code, SMALL_SAMPLE_SIZE, &mut rng)?;
        if screening_rate <= best_success_rate {
            continue;
        }
        info!(
            rate = screening_rate * 100.0,
            sample_size = SMALL_SAMPLE_SIZE,
            "found a good candidate, testing more"
        );
        let confirmed_rate = test_sparse_code(&cli.code, LARGE_SAMPLE_SIZE, &mut rng)?;
        if confirmed_rate <= best_success_rate {
            info!("further test finished: discarded");
            continue;
        }
        let file_name = format!("{}.{:03}.sparse", cli.prefix, candidate_index);
        candidate_index += 1;
        info!(
            rate = confirmed_rate * 100.0,
            sample_size = LARGE_SAMPLE_SIZE,
            file = file_name.as_str(),
            "further test finished: saving"
        );
        let mut out = BufWriter::new(File::create(&file_name)?);
        cli.code.save_to(&mut out)?;
        best_success_rate = confirmed_rate;
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut cli = match parse_command_line(&args) {
        Some(cli) => cli,
        None => {
            eprintln!("{USAGE}");
            process::exit(-1);
        }
    };
    if let Err(e) = run(&mut cli) {
        eprintln!("{e:#}");
        process::exit(-1);
    }
}
