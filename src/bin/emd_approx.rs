//! Text front end for the EMD-budgeted sparse approximation solver
//!
//! Reads `R C S B_lo` (plus `B_hi` with `--emd-interval`) and then R·C
//! row-major amplitudes from standard input, prints the supported amplitude
//! sum to standard output, and writes the verbose solver trace to stderr.
//! The process exits with status 0 on success, including the infeasible
//! case (empty support, amplitude sum 0).

use anyhow::{Context, Result};
use clap::Parser;
use emd_approx::{solve, Algorithm, IngestMode, SolveArgs};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "emd-approx",
    version,
    about = "Structured-sparse matrix approximation under an EMD budget"
)]
struct Cli {
    /// Write the 0/1 support mask to this file as a text matrix
    #[arg(long)]
    matrix_output: Option<PathBuf>,

    /// Square all input amplitudes
    #[arg(long)]
    square_amplitudes: bool,

    /// Min-cost max-flow algorithm
    #[arg(long, default_value = "shortest-augmenting-path")]
    algorithm: String,

    /// Print the support to stderr
    #[arg(long)]
    print_support: bool,

    /// Read both the lower and the upper EMD bound from stdin
    #[arg(long)]
    emd_interval: bool,
}

fn next_token<'a, T>(tokens: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let token = tokens
        .next()
        .with_context(|| format!("unexpected end of input while reading {what}"))?;
    token
        .parse()
        .with_context(|| format!("could not parse {what} from {token:?}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let algorithm: Algorithm = cli.algorithm.parse()?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading standard input")?;
    let mut tokens = input.split_whitespace();

    let rows: usize = next_token(&mut tokens, "row count")?;
    let cols: usize = next_token(&mut tokens, "column count")?;
    let sparsity: usize = next_token(&mut tokens, "sparsity")?;
    let bound_low: i64 = next_token(&mut tokens, "lower EMD bound")?;
    let bound_high: i64 = if cli.emd_interval {
        next_token(&mut tokens, "upper EMD bound")?
    } else {
        bound_low
    };

    let mut x = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut values = Vec::with_capacity(cols);
        for col in 0..cols {
            values.push(next_token(
                &mut tokens,
                &format!("amplitude ({row}, {col})"),
            )?);
        }
        x.push(values);
    }

    if cli.square_amplitudes {
        eprintln!("squaring all amplitudes ...");
    }

    let mut args = SolveArgs::new(x);
    args.s = sparsity;
    args.emd_bound_low = bound_low;
    args.emd_bound_high = bound_high;
    args.algorithm = algorithm;
    args.ingest = if cli.square_amplitudes {
        IngestMode::Squared
    } else {
        IngestMode::Absolute
    };
    args.verbose = true;
    args.output_function = Some(Arc::new(|line: &str| eprintln!("{line}")));

    let result = solve(&args)?;

    if cli.print_support && result.is_feasible() {
        for col in 0..cols {
            eprintln!("col {}:", col + 1);
            for row in 0..rows {
                if result.support[row][col] {
                    eprintln!(
                        " row {}, amplitude {}",
                        row + 1,
                        args.ingest.apply(args.x[row][col])
                    );
                }
            }
        }
    }

    println!("{}", result.amplitude_sum);

    if let Some(path) = &cli.matrix_output {
        let file = File::create(path)
            .with_context(|| format!("creating output file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for row in &result.support {
            for &on in row {
                write!(writer, "{} ", i32::from(on))?;
            }
            writeln!(writer)?;
        }
    }

    Ok(())
}
