//! Driving one run: seeding, solving and deciding what to keep.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, ensure, Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::{RunConfig, RunType, SavePolicy, SavedSize, Termination},
    scheme::{diagonal_cube, full_cube, Scheme},
    tensor::{Layout, Slot, Tensor},
    walk::{self, Job, Outcome},
};


pub const RESULTS_DIR: &str = "results";
pub const LOG_FILE: &str = "runlog.txt";
const HISTORY_FILE: &str = "results/history.txt";

/// Immutable state shared by every run of a batch.
pub struct RunContext {
    pub layout: Layout,
    pub target: Tensor,
}

/// What one run produced, handed back to the batch driver.
pub struct RunRecord {
    pub run_no: u64,
    /// Cube terms split off before solving.
    pub cubes: usize,
    /// Rank of the starting point (seed population, or the loaded file).
    pub start: usize,
    /// Best overall rank seen, cubes included.
    pub best: usize,
    pub rcode: i64,
    /// Human-readable outcome with flip count and speed.
    pub status: String,
    pub flips: u64,
    pub plus: u64,
    /// The returned scheme, zero terms dropped and cubes re-appended.
    pub scheme: Scheme,
    /// The saved solution a continuation run started from.
    pub source: Option<PathBuf>,
}

pub fn solve_one(cfg: &RunConfig, ctx: &RunContext, run_no: u64, seed: u64) -> Result<RunRecord> {
    match cfg.run_type {
        RunType::New => standard_run(cfg, ctx, run_no, seed),
        RunType::Continuation => continuation_run(cfg, ctx, run_no, seed),
    }
}

/// A fresh run: subtract the cubes from the target, seed a symmetric term
/// set from the residual, then walk.
fn standard_run(cfg: &RunConfig, ctx: &RunContext, run_no: u64, seed: u64) -> Result<RunRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cube_slots = cube_slots(cfg);

    let mut residual = ctx.target.clone();
    for &c in &cube_slots {
        residual.xor_outer(c, c, c);
    }
    // The seed population carries as much symmetry as the residual admits,
    // independently of the symmetry the walk enforces.
    let pattern_symm = if residual.is_palindrome() { 6 } else { 3 };
    let mut mset = Scheme::from_pattern(cfg.n, &residual, pattern_symm);
    let start = mset.muls.len();

    apply_headroom(&mut mset, cfg, cube_slots.len());
    Ok(run_walk(cfg, run_no, &mut rng, mset, &cube_slots, start, None))
}

/// A continuation run: reload a saved scheme, split its cube terms off and
/// walk the rest further down.
fn continuation_run(cfg: &RunConfig, ctx: &RunContext, run_no: u64, seed: u64) -> Result<RunRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (path, start) = pick_saved(cfg, &mut rng)?;
    let loaded = Scheme::load_solution(cfg.n, &path, &ctx.layout, true)?;

    let mut cube_slots = Vec::new();
    let mut mset = Scheme::new(cfg.n);
    for m in &loaded.muls {
        if m[0] == m[1] && m[1] == m[2] {
            cube_slots.push(m[0]);
        } else {
            mset.muls.push(*m);
        }
    }
    mset.maxplus = mset.muls.len() as i64;

    apply_headroom(&mut mset, cfg, cube_slots.len());
    Ok(run_walk(cfg, run_no, &mut rng, mset, &cube_slots, start, Some(path)))
}

fn cube_slots(cfg: &RunConfig) -> Vec<Slot> {
    if let Some(full) = &cfg.full_cubes {
        full.iter().map(|p| full_cube(p)).collect()
    } else if let Some(diag) = &cfg.diag_cubes {
        diag.iter().map(|p| diagonal_cube(cfg.n, p)).collect()
    } else {
        Vec::new()
    }
}

/// Reserves zero orbits up to the configured plus limit, rounded down to a
/// multiple of the symmetry degree. A limit below the current size instead
/// lowers the rank cap.
fn apply_headroom(mset: &mut Scheme, cfg: &RunConfig, cubes: usize) {
    if cfg.plus_limit == 0 {
        return;
    }
    let mut headroom = cfg.plus_limit as i64 - cubes as i64 - mset.muls.len() as i64;
    headroom -= headroom.rem_euclid(cfg.symm as i64);
    if headroom > 0 {
        mset.push_reserved(headroom as usize);
    } else {
        mset.maxplus += headroom;
    }
}

/// Solver encoding of the termination strategy. Cube terms are invisible to
/// the walk, so a split threshold moves down by the cube count and snaps to
/// an orbit multiple.
pub(crate) fn solver_termination(termination: Termination, cubes: i64, symm: usize) -> (i64, u64) {
    match termination {
        Termination::Limit => (0, 0),
        Termination::Early => (1, 0),
        Termination::Reset => (2, 0),
        Termination::Split { threshold, percent } => {
            let mut t = threshold - cubes;
            t -= t.rem_euclid(symm as i64);
            (t, percent)
        }
    }
}

fn run_walk(
    cfg: &RunConfig,
    run_no: u64,
    rng: &mut ChaCha8Rng,
    mset: Scheme,
    cube_slots: &[Slot],
    start: usize,
    source: Option<PathBuf>,
) -> RunRecord {
    let l = cube_slots.len() as i64;
    let nomuls = mset.muls.len();
    let mut target = cfg.target as i64 - l;
    if target < 0 {
        target += nomuls as i64;
    }
    let (termination, split) = solver_termination(cfg.termination, l, cfg.symm);
    let plus_after = if cfg.plus_after == 0 {
        (cfg.flip_limit * 1007) as i64
    } else if cfg.plus_random {
        -(cfg.plus_after as i64)
    } else {
        cfg.plus_after as i64
    };

    let job = Job {
        symm: cfg.symm,
        target,
        flip_limit: cfg.flip_limit,
        plus_after,
        termination,
        split,
        maxplus: mset.maxplus,
        max_size: cfg.max_size.encoded(),
        seed: rng.gen(),
        slots: mset.muls.iter().map(|m| m[0]).collect(),
    };

    let before = Instant::now();
    let report = walk::run(job);
    let elapsed = before.elapsed().as_secs_f64();

    let speed = if elapsed > 0.0 {
        format!("{}", (60.0 * report.flips as f64 / elapsed / 1e6) as u64)
    } else {
        "N/A".to_string()
    };
    let (rcode, outcome) = match report.outcome {
        // A dead end exactly at the target still counts as a hit.
        Outcome::NoUsableFlips if report.achieved == target => {
            (0, "Target achieved (zero neighbours)")
        }
        o => (o.code(), o.describe()),
    };
    let status = format!(
        "{} - Flips: {} Speed: {} megaflips/min",
        outcome, report.flips, speed,
    );

    let best = (report.minmuls + l) as usize;
    let mut scheme = Scheme::from_slots(cfg.n, &report.slots);
    scheme.flips = report.flips;
    scheme.retain_nonzero();
    for &c in cube_slots {
        scheme.muls.push([c, c, c]);
    }

    RunRecord {
        run_no,
        cubes: l as usize,
        start,
        best,
        rcode,
        status,
        flips: report.flips,
        plus: report.plus,
        scheme,
        source,
    }
}

/// Chooses the saved solution a continuation run starts from: a named file,
/// a random file of a given rank, or a random file of any rank.
fn pick_saved(cfg: &RunConfig, rng: &mut ChaCha8Rng) -> Result<(PathBuf, usize)> {
    if let Some(name) = &cfg.saved_file {
        let path = Path::new(RESULTS_DIR).join(name);
        let start = rank_from_name(&path)?;
        return Ok((path, start));
    }
    let prefix = match cfg.saved_size {
        SavedSize::Rank(k) => format!("m{:03}", k),
        SavedSize::Random => "m".to_string(),
        SavedSize::Unset => bail!("a continuation run needs SAVED_FILE: or SAVED_SIZE:"),
    };
    let mut names: Vec<PathBuf> = fs::read_dir(RESULTS_DIR)
        .context("no saved solutions exist")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|f| f.to_str())
                .map_or(false, |f| f.starts_with(&prefix) && f.ends_with(".txt"))
        })
        .collect();
    ensure!(!names.is_empty(), "no saved solutions matching {}*.txt exist", prefix);
    // Directory order is arbitrary; sort so a seed replays the same choice.
    names.sort();
    let path = names[rng.gen_range(0..names.len())].clone();
    let start = rank_from_name(&path)?;
    Ok((path, start))
}

/// Ranks are embedded in result file names as `m<rank>r<digits>.txt`.
pub(crate) fn rank_from_name(path: &Path) -> Result<usize> {
    path.file_name()
        .and_then(|f| f.to_str())
        .and_then(|f| f.get(1..4))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("cannot read a rank from file name {}", path.display()))
}

/// Applies the save policy and appends the continuation history. Returns the
/// path the scheme was saved to, if any.
pub fn persist(
    cfg: &RunConfig,
    ctx: &RunContext,
    record: &RunRecord,
    rng: &mut ChaCha8Rng,
) -> Result<Option<PathBuf>> {
    let save = match cfg.save {
        SavePolicy::UpTo(k) => record.best <= k,
        SavePolicy::All => match record.source {
            None => record.best < record.start,
            Some(_) => record.best <= record.start,
        },
    };
    let mut saved = None;
    if save {
        fs::create_dir_all(RESULTS_DIR).context("failed to create the results directory")?;
        let path = match &record.source {
            // No improvement on the start file: refresh it in place.
            Some(source) if record.best == record.start => source.clone(),
            _ => unused_result_name(record.best, rng),
        };
        record.scheme.write_solution(&path, &ctx.layout, true)?;
        saved = Some(path);
    }
    if let Some(source) = &record.source {
        append_line(
            HISTORY_FILE,
            &format!(
                "{} {} {} {}\n",
                source.display(),
                record.start,
                record.best,
                record.flips,
            ),
        )?;
    }
    Ok(saved)
}

fn unused_result_name(best: usize, rng: &mut ChaCha8Rng) -> PathBuf {
    let mut rf: u64 = rng.gen_range(0..10_000_000_000);
    loop {
        let path = Path::new(RESULTS_DIR).join(format!("m{:03}r{:010}.txt", best, rf));
        if !path.exists() {
            return path;
        }
        rf += 1;
    }
}

pub fn append_line(path: &str, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append to {}", path))
}


#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::config::{
        MaxSize, RunConfig, RunType, SavePolicy, SavedSize, SchemeStyle, Termination, Verbosity,
    };
    use crate::tensor::{mulmat_tensor, Layout};

    use super::{rank_from_name, solve_one, solver_termination, RunContext};

    fn strassen_config() -> RunConfig {
        RunConfig {
            n: 2,
            flip_limit: 50_000,
            termination: Termination::Limit,
            plus_after: 0,
            plus_random: false,
            plus_limit: 0,
            solves: 1,
            verbosity: Verbosity::None,
            scheme_style: SchemeStyle::Full,
            write_log: false,
            save: SavePolicy::UpTo(0),
            seed: Some(1),
            max_size: MaxSize::None,
            run_type: RunType::New,
            target: 7,
            symm: 3,
            saved_file: None,
            saved_size: SavedSize::Unset,
            diag_cubes: Some(vec!["11".to_string()]),
            full_cubes: None,
        }
    }

    #[test]
    fn standard_run_keeps_representing_the_target() {
        let layout = Layout::new(2, true);
        let target = mulmat_tensor(&layout);
        let ctx = RunContext { layout, target };
        let cfg = strassen_config();

        for seed in 0..5 {
            let record = solve_one(&cfg, &ctx, seed + 1, seed).unwrap();
            assert_eq!(record.scheme.error(&ctx.target), 0, "seed {}", seed);
            assert!(record.scheme.muls.len() <= record.best, "seed {}", seed);
            assert_eq!(record.cubes, 1);
            assert_eq!(record.start, 12, "two dihedral seed orbits");
            assert!(record.best >= 7, "below the rank of 2x2 multiplication");
            assert!(record.status.contains("Flips:"), "got: {}", record.status);
        }
    }

    #[test]
    fn split_threshold_moves_into_solver_space() {
        assert_eq!(
            solver_termination(Termination::Split { threshold: 49, percent: 40 }, 1, 6),
            (48, 40),
        );
        assert_eq!(
            solver_termination(Termination::Split { threshold: 24, percent: 50 }, 2, 3),
            (21, 50),
        );
        assert_eq!(solver_termination(Termination::Early, 5, 3), (1, 0));
    }

    #[test]
    fn ranks_embedded_in_file_names() {
        assert_eq!(rank_from_name(Path::new("results/m049r0123456789.txt")).unwrap(), 49);
        assert_eq!(rank_from_name(Path::new("m007r0000000001.txt")).unwrap(), 7);
        assert!(rank_from_name(Path::new("results/history.txt")).is_err());
    }
}
