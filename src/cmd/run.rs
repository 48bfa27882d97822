use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use pbr::ProgressBar;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use structopt::StructOpt;

use crate::{
    config::{MaxSize, RunConfig, RunType, SavePolicy, SchemeStyle, Termination, Verbosity},
    runner::{self, RunContext, RunRecord, LOG_FILE},
    tensor::{mulmat_tensor, Layout},
};

use super::summary::Summary;


#[derive(StructOpt, Debug, Clone)]
pub struct Args {
    /// Keyword input file describing the runs.
    #[structopt(parse(from_os_str))]
    pub input: PathBuf,

    /// Number of threads to use. Defaults to the number of virtual CPUs.
    #[structopt(long, short = "j")]
    pub threads: Option<u32>,

    /// If specified, the progress bar is not shown.
    #[structopt(long)]
    pub no_pb: bool,
}

pub(crate) fn run(args: Args) -> Result<()> {
    let cfg = Arc::new(RunConfig::parse_file(&args.input)?);
    let master_seed = cfg.seed.unwrap_or_else(auto_seed);
    let quiet = cfg.verbosity == Verbosity::None;

    if !quiet {
        println!();
        bunt::println!(
            "{$blue+bold}▸ Searching for {[intense]}x{[intense]} multiplication schemes \
                over GF(2), {[intense]} solve(s)...{/$}",
            cfg.n,
            cfg.n,
            cfg.solves,
        );
        println!();
        println!("Random number seed: {}", master_seed);
    }

    // The run banner. For continuation runs the cube count is only known
    // once the first loaded file has been split, so it is emitted later.
    let limits = limits_line(&cfg);
    let mut banner_pending = true;
    if cfg.run_type == RunType::New {
        let cubes = cfg
            .full_cubes
            .as_ref()
            .or(cfg.diag_cubes.as_ref())
            .map_or(0, |c| c.len());
        emit_banner(&cfg, master_seed, quiet, "New run", cubes, &limits)?;
        banner_pending = false;
    }

    let layout = Layout::new(cfg.n, true);
    let target = mulmat_tensor(&layout);
    let ctx = Arc::new(RunContext { layout, target });

    // Per-run lines tear the bar, so it only runs below SUMMARY verbosity.
    let show_pb = !args.no_pb && cfg.verbosity < Verbosity::Summary;
    let mut pb = ProgressBar::new(cfg.solves);
    pb.set_max_refresh_rate(Some(Duration::from_millis(100)));
    let pb = Arc::new(Mutex::new(pb));

    let before = Instant::now();

    // Hand run numbers to the workers; completed runs flow back over their
    // own channel so that all printing, saving and logging stays here.
    let (run_tx, run_rx) = crossbeam_channel::bounded::<u64>(32);
    let (record_tx, record_rx) = crossbeam_channel::unbounded::<Result<RunRecord>>();

    let num_threads = args.threads.unwrap_or_else(|| num_cpus::get() as u32);
    let join_handles = (0..num_threads)
        .map(|_| {
            let runs = run_rx.clone();
            let records = record_tx.clone();
            let pb = pb.clone();
            let cfg = cfg.clone();
            let ctx = ctx.clone();
            thread::spawn(move || {
                for run_no in runs.iter() {
                    let seed = master_seed.wrapping_add(run_no);
                    let record = runner::solve_one(&cfg, &ctx, run_no, seed);
                    if records.send(record).is_err() {
                        return;
                    }
                    if show_pb {
                        pb.lock().expect("poisened lock").add(1);
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    drop(record_tx);

    for run_no in 1..=cfg.solves {
        run_tx.send(run_no).expect("channel unexpectedly disconnected");
    }
    drop(run_tx);

    let mut summary = Summary::new(cfg.target);
    let mut save_rng = ChaCha8Rng::seed_from_u64(master_seed.wrapping_add(0x5a5a));
    for record in record_rx.iter() {
        let record = record?;
        if banner_pending {
            emit_banner(&cfg, master_seed, quiet, "Continuation run", record.cubes, &limits)?;
            banner_pending = false;
        }
        runner::persist(&cfg, &ctx, &record, &mut save_rng)?;
        report_run(&cfg, &ctx, master_seed, &record)?;
        summary.record(&record);
    }

    for handle in join_handles {
        handle.join().expect("panic in worker thread");
    }
    if show_pb {
        pb.lock().unwrap().finish();
        println!();
    }

    if !quiet {
        println!();
        let elapsed = before.elapsed();
        println!(
            "  (That took {:.2?} for {} solve(s) on {} threads)",
            elapsed, cfg.solves, num_threads,
        );
        println!();
        summary.print_report();
        println!();
    }
    if cfg.write_log {
        runner::append_line(
            LOG_FILE,
            &format!("{:010} {}\n", master_seed, summary.compact_line()),
        )?;
    }

    Ok(())
}

/// Per-run reporting: the one-liner, optionally the scheme itself, and the
/// log record.
fn report_run(cfg: &RunConfig, ctx: &RunContext, master_seed: u64, record: &RunRecord) -> Result<()> {
    if cfg.verbosity >= Verbosity::Summary {
        match &record.source {
            None => println!("Run: {} Best: {} {}", record.run_no, record.best, record.status),
            Some(source) => println!(
                "Run: {} From: {} Best: {} {}",
                record.run_no,
                file_name(source),
                record.best,
                record.status,
            ),
        }
    }

    let show_scheme = if record.best == cfg.target {
        cfg.verbosity >= Verbosity::Standard
    } else {
        cfg.verbosity >= Verbosity::Detailed
    };
    if show_scheme {
        match cfg.scheme_style {
            SchemeStyle::Full => println!(
                "{}",
                record.scheme.render_full(&ctx.layout, &ctx.target, record.run_no),
            ),
            SchemeStyle::Summary => println!(
                "{}",
                record.scheme.summary_line(&ctx.target, record.run_no),
            ),
        }
    }

    if cfg.write_log {
        let line = match &record.source {
            None => format!(
                "{:010}/{:03} Best: {} {}\n",
                master_seed, record.run_no, record.best, record.status,
            ),
            Some(source) => format!(
                "{:010}/{:03} From: {} Best: {} {}\n",
                master_seed,
                record.run_no,
                file_name(source),
                record.best,
                record.status,
            ),
        };
        runner::append_line(LOG_FILE, &line)?;
    }
    Ok(())
}

fn emit_banner(
    cfg: &RunConfig,
    master_seed: u64,
    quiet: bool,
    kind: &str,
    cubes: usize,
    limits: &str,
) -> Result<()> {
    let mut setup = format!(
        "Size: {} Cubes: {} Target: {} Symm: {}",
        cfg.n, cubes, cfg.target, cfg.symm,
    );
    match cfg.save {
        SavePolicy::UpTo(k) if k > 0 => setup.push_str(&format!(" Save <=: {}", k)),
        SavePolicy::All => setup.push_str(" Save: All"),
        SavePolicy::UpTo(_) => {}
    }
    if !quiet {
        println!("{} - {}", kind, setup);
        println!("{}", limits);
    }
    if cfg.write_log {
        let now = chrono::Local::now().format("%d/%m/%Y %H:%M:%S");
        runner::append_line(
            LOG_FILE,
            &format!("{:010} Run at: {} {}\n", master_seed, now, setup),
        )?;
        runner::append_line(LOG_FILE, &format!("{:010} {}\n", master_seed, limits))?;
    }
    Ok(())
}

fn limits_line(cfg: &RunConfig) -> String {
    let mut line = format!("Flip limit: {}", cfg.flip_limit);
    match cfg.termination {
        Termination::Limit => {}
        Termination::Early => line.push_str("(E)"),
        Termination::Reset => line.push_str("(R)"),
        Termination::Split { threshold, percent } => {
            line.push_str(&format!("(S{}:{}%)", threshold, percent));
        }
    }
    if cfg.plus_after > 0 {
        line.push_str(&format!(" Plus after: {}", cfg.plus_after));
        if cfg.plus_random {
            line.push_str("(R)");
        }
    }
    if cfg.plus_limit > 0 {
        line.push_str(&format!(" Plus limit: {}", cfg.plus_limit));
    }
    match cfg.max_size {
        MaxSize::None => {}
        MaxSize::Length(k) => line.push_str(&format!(" Maximum length: {}", k)),
        MaxSize::Volume(k) => line.push_str(&format!(" Maximum volume: {}", k)),
    }
    line
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
}

/// The wall-clock seed for RANDOM_SEED: AUTO, ten digits from the time and
/// the process id.
fn auto_seed() -> u64 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    micros.wrapping_add(1_000_000 * u64::from(std::process::id())) % 10_000_000_000
}
