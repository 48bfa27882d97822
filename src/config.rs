//! The keyword input file that describes a batch of runs.

use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Run until the flip limit.
    Limit,
    /// Scale the remaining budget by the remaining distance to the target.
    Early,
    /// A fresh budget on every new record rank.
    Reset,
    /// Early termination against `percent` of the budget until `threshold`
    /// is reached, then against the full budget.
    Split { threshold: i64, percent: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    None,
    Summary,
    Standard,
    Detailed,
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeStyle {
    Full,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Keep every improved result.
    All,
    /// Keep results of rank at most this; 0 keeps nothing.
    UpTo(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSize {
    None,
    /// Cap on the popcount of any single slot.
    Length(u32),
    /// Cap on the popcount product of a term's three slots.
    Volume(u32),
}

impl MaxSize {
    /// Solver encoding: negative = length cap, positive = volume cap.
    pub fn encoded(self) -> i64 {
        match self {
            MaxSize::None => 0,
            MaxSize::Length(k) => -(k as i64),
            MaxSize::Volume(k) => k as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    New,
    Continuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedSize {
    Unset,
    /// Continue from a randomly chosen saved rank.
    Random,
    Rank(usize),
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub n: usize,
    pub flip_limit: u64,
    pub termination: Termination,
    /// Flips between plus transitions; 0 disables them.
    pub plus_after: u64,
    pub plus_random: bool,
    /// Rank cap for plus transitions; 0 means no headroom is reserved.
    pub plus_limit: usize,
    pub solves: u64,
    pub verbosity: Verbosity,
    pub scheme_style: SchemeStyle,
    pub write_log: bool,
    pub save: SavePolicy,
    /// None asks for a wall-clock derived seed.
    pub seed: Option<u64>,
    pub max_size: MaxSize,
    pub run_type: RunType,
    pub target: usize,
    pub symm: usize,
    pub saved_file: Option<String>,
    pub saved_size: SavedSize,
    pub diag_cubes: Option<Vec<String>>,
    pub full_cubes: Option<Vec<String>>,
}

/// The keywords that must all be present, in flag-bit order.
const REQUIRED: [&str; 16] = [
    "MATRIX_SIZE:",
    "FLIP_LIMIT:",
    "TERMINATION_STRATEGY:",
    "PLUS_TRANSITION_AFTER:",
    "PLUS_TRANSITION_LIMIT:",
    "NUMBER_OF_SOLVES:",
    "PRINT_OUTPUT:",
    "SCHEME_STYLE:",
    "WRITE_LOG:",
    "SAVE:",
    "RANDOM_SEED:",
    "PLUS_TRANSITION_RANDOM:",
    "MAXIMUM_SIZE:",
    "RUN_TYPE:",
    "TARGET:",
    "SYMMETRY:",
];

const WITHDRAWN: [&str; 3] = [
    "PLUS_TRANSITION_HEADROOM:",
    "PLUS_TRANSITION_CAP:",
    "EARLY_TERMINATION:",
];

impl RunConfig {
    pub fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("invalid input file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut flags = 0u16;
        let mut seen = |keyword: &str| {
            let bit = REQUIRED.iter().position(|&k| k == keyword).unwrap();
            flags |= 1 << bit;
        };

        let mut n = None;
        let mut flip_limit = 0;
        let mut termination = Termination::Limit;
        let mut plus_after = 0;
        let mut plus_random = false;
        let mut plus_limit = 0;
        let mut solves = 0;
        let mut verbosity = Verbosity::Standard;
        let mut scheme_style = SchemeStyle::Full;
        let mut write_log = true;
        let mut save = SavePolicy::UpTo(0);
        let mut seed = None;
        let mut max_size = MaxSize::None;
        let mut run_type = RunType::New;
        let mut target = 0;
        let mut symm = 0;
        let mut saved_file = None;
        let mut saved_size = SavedSize::Unset;
        let mut diag_cubes = None;
        let mut full_cubes = None;

        for (lineno, line) in contents.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let keyword = match tokens.first() {
                None => continue,
                Some(&"#") => continue,
                Some(&k) => k,
            };
            let context = |what: &str| format!("{} on line {}", what, lineno + 1);
            let arg = |i: usize| -> Result<&str> {
                tokens
                    .get(i)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!(context("missing argument")))
            };
            let int = |i: usize| -> Result<i64> {
                arg(i)?.parse().with_context(|| context("not an integer"))
            };

            if WITHDRAWN.contains(&keyword) {
                bail!("keyword {} has been withdrawn", keyword);
            }

            match keyword {
                "MATRIX_SIZE:" => {
                    let v = int(1)? as usize;
                    ensure!((1..=8).contains(&v), context("matrix size must be 1..=8"));
                    n = Some(v);
                    seen(keyword);
                }
                "FLIP_LIMIT:" => {
                    flip_limit = int(1)? as u64;
                    seen(keyword);
                }
                "TERMINATION_STRATEGY:" => {
                    termination = match arg(1)? {
                        "LIMIT" => Termination::Limit,
                        "EARLY" => Termination::Early,
                        "RESET" => Termination::Reset,
                        "SPLIT" => Termination::Split {
                            threshold: int(2)?,
                            percent: int(3)? as u64,
                        },
                        other => bail!("unknown termination strategy {}", other),
                    };
                    seen(keyword);
                }
                "PLUS_TRANSITION_AFTER:" => {
                    plus_after = int(1)? as u64;
                    seen(keyword);
                }
                "PLUS_TRANSITION_LIMIT:" => {
                    plus_limit = int(1)? as usize;
                    seen(keyword);
                }
                "NUMBER_OF_SOLVES:" => {
                    solves = int(1)? as u64;
                    seen(keyword);
                }
                "PRINT_OUTPUT:" => {
                    verbosity = match arg(1)? {
                        "NONE" => Verbosity::None,
                        "SUMMARY" => Verbosity::Summary,
                        "STANDARD" => Verbosity::Standard,
                        "DETAILED" => Verbosity::Detailed,
                        "DIAGNOSTIC" => Verbosity::Diagnostic,
                        other => bail!("unknown print option {}", other),
                    };
                    seen(keyword);
                }
                "SCHEME_STYLE:" => {
                    scheme_style = match arg(1)? {
                        "FULL" => SchemeStyle::Full,
                        "SUMMARY" => SchemeStyle::Summary,
                        other => bail!("unknown scheme style {}", other),
                    };
                    seen(keyword);
                }
                "WRITE_LOG:" => {
                    write_log = match arg(1)? {
                        "YES" => true,
                        "NO" => false,
                        other => bail!("unknown log option {}", other),
                    };
                    seen(keyword);
                }
                "SAVE:" => {
                    save = match arg(1)? {
                        "ALL" => SavePolicy::All,
                        k => SavePolicy::UpTo(
                            k.parse().with_context(|| context("not an integer"))?,
                        ),
                    };
                    seen(keyword);
                }
                "RANDOM_SEED:" => {
                    seed = match arg(1)? {
                        "AUTO" => None,
                        k => Some(k.parse().with_context(|| context("not an integer"))?),
                    };
                    seen(keyword);
                }
                "PLUS_TRANSITION_RANDOM:" => {
                    plus_random = match arg(1)? {
                        "YES" => true,
                        "NO" => false,
                        other => bail!("unknown plus spacing option {}", other),
                    };
                    seen(keyword);
                }
                "MAXIMUM_SIZE:" => {
                    max_size = match arg(1)? {
                        "NONE" => MaxSize::None,
                        "LENGTH" => MaxSize::Length(int(2)? as u32),
                        "VOLUME" => MaxSize::Volume(int(2)? as u32),
                        other => bail!("unknown size cap {}", other),
                    };
                    seen(keyword);
                }
                "RUN_TYPE:" => {
                    run_type = match arg(1)? {
                        "NEW" => RunType::New,
                        "CONTINUATION" => RunType::Continuation,
                        other => bail!("unknown run type {}", other),
                    };
                    seen(keyword);
                }
                "TARGET:" => {
                    target = int(1)? as usize;
                    seen(keyword);
                }
                "SYMMETRY:" => {
                    let v = int(1)? as usize;
                    ensure!(v == 3 || v == 6, context("symmetry must be 3 or 6"));
                    symm = v;
                    seen(keyword);
                }
                "SAVED_FILE:" => {
                    saved_file = Some(arg(1)?.to_string());
                }
                "SAVED_SIZE:" => {
                    saved_size = match arg(1)? {
                        "RANDOM" => SavedSize::Random,
                        k => SavedSize::Rank(
                            k.parse().with_context(|| context("not an integer"))?,
                        ),
                    };
                }
                "DIAGONAL_CUBES:" => {
                    let n = n.ok_or_else(|| {
                        anyhow::anyhow!(context("DIAGONAL_CUBES: must follow MATRIX_SIZE:"))
                    })?;
                    diag_cubes = Some(collect_cubes(&tokens[1..], n));
                }
                "FULL_CUBES:" => {
                    let n = n.ok_or_else(|| {
                        anyhow::anyhow!(context("FULL_CUBES: must follow MATRIX_SIZE:"))
                    })?;
                    full_cubes = Some(collect_cubes(&tokens[1..], n * n));
                }
                _ => {}
            }
        }

        if flags != u16::MAX {
            let missing: Vec<&str> = REQUIRED
                .iter()
                .enumerate()
                .filter(|&(bit, _)| flags & (1 << bit) == 0)
                .map(|(_, &k)| k)
                .collect();
            bail!("missing input: {}", missing.join(" "));
        }
        if run_type == RunType::Continuation {
            ensure!(
                saved_file.is_some() || saved_size != SavedSize::Unset,
                "a continuation run needs SAVED_FILE: or SAVED_SIZE:",
            );
        }

        Ok(Self {
            n: n.unwrap(),
            flip_limit,
            termination,
            plus_after,
            plus_random,
            plus_limit,
            solves,
            verbosity,
            scheme_style,
            write_log,
            save,
            seed,
            max_size,
            run_type,
            target,
            symm,
            saved_file,
            saved_size,
            diag_cubes,
            full_cubes,
        })
    }
}

/// Takes the leading run of tokens of the expected pattern length; anything
/// after the first mismatch is ignored.
fn collect_cubes(tokens: &[&str], len: usize) -> Vec<String> {
    tokens
        .iter()
        .take_while(|t| t.len() == len && t.chars().all(|c| c == '0' || c == '1'))
        .map(|t| t.to_string())
        .collect()
}
