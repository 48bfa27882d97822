use std::path::PathBuf;

use anyhow::{ensure, Result};
use structopt::StructOpt;

use crate::{
    scheme::Scheme,
    tensor::{mulmat_tensor, Layout},
};


#[derive(StructOpt, Debug, Clone)]
pub struct Args {
    /// Path to a saved scheme file.
    #[structopt(parse(from_os_str))]
    pub file: PathBuf,

    /// Matrix dimension the scheme multiplies.
    #[structopt(short)]
    pub n: usize,

    /// Read the C factor as written untransposed.
    #[structopt(long)]
    pub straight: bool,
}

pub(crate) fn run(args: &Args) -> Result<()> {
    ensure!((1..=8).contains(&args.n), "matrix dimension must be 1..=8");

    let layout = Layout::new(args.n, true);
    let target = mulmat_tensor(&layout);
    let scheme = Scheme::load_solution(args.n, &args.file, &layout, !args.straight)?;

    bunt::println!(
        "Scheme with {[blue]} multiplications loaded from {[blue]}:",
        scheme.muls.len(),
        args.file.display(),
    );
    println!("{}", scheme.render_full(&layout, &target, 0));

    let error = scheme.error(&target);
    if error == 0 {
        bunt::println!(
            "{$green+bold}Valid:{/$} the scheme multiplies {}x{} matrices over GF(2) \
                with {} multiplications.",
            args.n,
            args.n,
            scheme.muls.len(),
        );
    } else {
        bunt::println!(
            "{$red+bold}Invalid:{/$} the scheme misses the target tensor in {} \
                coefficient(s).",
            error,
        );
    }

    Ok(())
}
