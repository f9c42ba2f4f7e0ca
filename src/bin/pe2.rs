//! Batch-OLE CLI driver
//!
//! ```text
//! pe2 { alice | <ipv4> } port1 port2 port3 luby sparse prg { x | a b } count
//! ```
//!
//! Runs as Alice when the first argument is the literal `alice` (she accepts
//! on the three ports), as Bob otherwise (he connects to Alice's IPv4). The
//! ports must be distinct and in 1–65535; `count` is the number of batches,
//! 1–5 000 000. The input files hold one decimal field element per line:
//! Alice's `x`, Bob's `a` and `b`, each of the PRG's output length.
//!
//! Exit codes: 0 success; 1 usage; −1 bad port; −2 port collision; −3 bad
//! count; −10 file I/O or artifact mismatch; −11 connect/handshake failure;
//! −12 mid-protocol failure; −99 circuit-compiler invariant violation.

use std::fs::File;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vecole::batch::{
    self, alice_accept, bob_connect, BatchError, PeerChannels, ProtocolContext,
};
use vecole::field::Zp;
use vecole::goldreich::GoldreichGraph;
use vecole::luby::LtCode;
use vecole::sparse::FastSparseLinearCode;
use vecole::textio::TokenStream;

const USAGE: &str = "\
Usage: pe2 { alice | ipv4 }
           port1 port2 port3
           luby sparse prg
           { x | a b } count

Parameters:
     alice: the literal string \"alice\", runs the
            program as Alice.
      ipv4: an IPv4 address where Alice is located,
            runs the program as Bob.
   port<n>: 3 different ports through which the two
            agents communicate.
      luby: the file name of the Luby code.
    sparse: the file name of the sparse linear code.
       prg: the file name of Goldreich's function.
         x: the file name of Alice's input.
      a, b: the file names of Bob's inputs.
     count: the number of batches to run.";

enum Role {
    Alice { x: PathBuf },
    Bob { server: String, a: PathBuf, b: PathBuf },
}

struct CommandLine {
    role: Role,
    ports: [u16; 3],
    luby: PathBuf,
    sparse: PathBuf,
    prg: PathBuf,
    count: usize,
}

fn parse_port(arg: &str, name: &str) -> Result<u16, i32> {
    match arg.parse::<u64>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        _ => {
            eprintln!("{name}: the argument must be a port (1-65535).");
            Err(-1)
        }
    }
}

fn parse_command_line(args: &[String]) -> Result<CommandLine, i32> {
    // Program name + 9 arguments for Alice, + 10 for Bob.
    if args.len() != 10 && args.len() != 11 {
        return Err(1);
    }
    let is_alice = args[1] == "alice";
    if is_alice && args.len() != 10 {
        return Err(1);
    }
    if !is_alice && args.len() != 11 {
        return Err(1);
    }
    let port1 = parse_port(&args[2], "port1")?;
    let port2 = parse_port(&args[3], "port2")?;
    if port1 == port2 {
        eprintln!("port2: the argument must be different from port1.");
        return Err(-2);
    }
    let port3 = parse_port(&args[4], "port3")?;
    if port1 == port3 {
        eprintln!("port3: the argument must be different from port1.");
        return Err(-2);
    }
    if port2 == port3 {
        eprintln!("port3: the argument must be different from port2.");
        return Err(-2);
    }
    let (role, count_arg) = if is_alice {
        (Role::Alice { x: PathBuf::from(&args[8]) }, &args[9])
    } else {
        (
            Role::Bob {
                server: args[1].clone(),
                a: PathBuf::from(&args[8]),
                b: PathBuf::from(&args[9]),
            },
            &args[10],
        )
    };
    let count = match count_arg.parse::<u64>() {
        Ok(count @ 1..=5_000_000) => count as usize,
        _ => {
            eprintln!("count: must be a natural number from 1 to 5000000.");
            return Err(-3);
        }
    };
    Ok(CommandLine {
        role,
        ports: [port1, port2, port3],
        luby: PathBuf::from(&args[5]),
        sparse: PathBuf::from(&args[6]),
        prg: PathBuf::from(&args[7]),
        count,
    })
}

fn token_stream(path: &Path, what: &str) -> anyhow::Result<TokenStream> {
    let file = File::open(path).with_context(|| format!("{what}: could not open file"))?;
    TokenStream::from_reader(file).with_context(|| format!("{what}: could not read file"))
}

fn load_context(cli: &CommandLine) -> anyhow::Result<ProtocolContext> {
    let luby = LtCode::load_from(&mut token_stream(&cli.luby, "luby")?)
        .context("luby: file is not a valid Luby code")?;
    let sparse = FastSparseLinearCode::load_from(&mut token_stream(&cli.sparse, "sparse")?)
        .context("sparse: file is not a valid sparse linear code")?;
    let graph = GoldreichGraph::load_from(&mut token_stream(&cli.prg, "prg")?)
        .context("prg: file is not a valid Goldreich function")?;
    ProtocolContext::new(luby, sparse, graph).context("codes do not fit together")
}

fn load_field_vector(path: &Path, len: usize, what: &str) -> anyhow::Result<Vec<Zp>> {
    let mut ts = token_stream(path, what)?;
    let mut out = vec![Zp::ZERO; len];
    ts.fill_zp(&mut out)
        .with_context(|| format!("{what}: could not load {len} field elements"))?;
    Ok(out)
}

fn batch_exit_code(error: &BatchError) -> i32 {
    match error {
        BatchError::Garble(_) => -99,
        _ => -12,
    }
}

async fn play_alice(cli: &CommandLine, x_path: &Path) -> i32 {
    let ctx = match load_context(cli) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("{e:#}");
            return -10;
        }
    };
    let x = match load_field_vector(x_path, ctx.batch_length(), "x") {
        Ok(x) => Arc::new(x),
        Err(e) => {
            error!("{e:#}");
            return -10;
        }
    };
    info!("waiting for Bob on ports {:?}", cli.ports);
    let channels: PeerChannels<_> = match alice_accept(cli.ports).await {
        Ok(channels) => channels,
        Err(e) => {
            error!("could not connect to Bob or the endiannesses do not match: {e}");
            return -11;
        }
    };
    info!("connected to Bob");
    match batch::run_alice(ctx.clone(), x, channels, cli.count).await {
        Ok(outcome) => {
            outcome.statistics.log_summary(&ctx, cli.count);
            info!("printing the result of the batch OLEs to stdout");
            for z in &outcome.z {
                println!("{z}");
            }
            0
        }
        Err(e) => {
            error!("batch aborted: {e}");
            batch_exit_code(&e)
        }
    }
}

async fn play_bob(cli: &CommandLine, server: &str, a_path: &Path, b_path: &Path) -> i32 {
    let ctx = match load_context(cli) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("{e:#}");
            return -10;
        }
    };
    let m = ctx.batch_length();
    let (a, b) = match (
        load_field_vector(a_path, m, "a"),
        load_field_vector(b_path, m, "b"),
    ) {
        (Ok(a), Ok(b)) => (Arc::new(a), Arc::new(b)),
        (Err(e), _) | (_, Err(e)) => {
            error!("{e:#}");
            return -10;
        }
    };
    let addr: Ipv4Addr = match server.parse() {
        Ok(addr) => addr,
        Err(_) => {
            error!("could not connect to Alice: `{server}` is not an IPv4 address");
            return -11;
        }
    };
    info!("connecting to Alice at {addr} on ports {:?}", cli.ports);
    let channels = match bob_connect(addr, cli.ports).await {
        Ok(channels) => channels,
        Err(e) => {
            error!("could not connect to Alice or the endiannesses do not match: {e}");
            return -11;
        }
    };
    info!("connected to Alice");
    match batch::run_bob(ctx.clone(), a, b, channels, cli.count).await {
        Ok(statistics) => {
            statistics.log_summary(&ctx, cli.count);
            0
        }
        Err(e) => {
            error!("batch aborted: {e}");
            batch_exit_code(&e)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_command_line(&args) {
        Ok(cli) => cli,
        Err(code) => {
            if code > 0 {
                eprintln!("{USAGE}");
            }
            process::exit(code);
        }
    };
    let code = match &cli.role {
        Role::Alice { x } => play_alice(&cli, x).await,
        Role::Bob { server, a, b } => play_bob(&cli, server, a, b).await,
    };
    process::exit(code);
}
