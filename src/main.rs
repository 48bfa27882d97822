use structopt::StructOpt;

mod cmd;
mod config;
mod index;
mod runner;
mod scheme;
mod tensor;
mod walk;


fn main() {
    let args = Args::from_args();

    let res = match args {
        Args::Run(args) => cmd::run::run(args),
        Args::Show(args) => cmd::show::run(&args),
    };

    if let Err(e) = res {
        bunt::eprintln!("{$red}An error occured!{/$}");
        eprintln!("{:?}", e);
    }
}

/// Searches for low-rank matrix multiplication schemes over GF(2) by a
/// random walk on the flip graph, keeping a 3-way (cyclic) or 6-way (cyclic
/// plus reflective) symmetry throughout. Matrices up to 8x8 are supported.
#[derive(StructOpt, Debug, Clone)]
pub enum Args {
    /// Runs the batch of searches described by a keyword input file.
    Run(cmd::run::Args),

    /// Loads a saved scheme file, verifies it and prints it.
    Show(cmd::show::Args),
}
