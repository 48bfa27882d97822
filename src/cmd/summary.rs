use ahash::AHashMap;

use crate::runner::RunRecord;


/// Aggregates the outcomes of a batch of runs.
pub struct Summary {
    target: usize,

    /// Runs recorded so far.
    num_runs: u64,

    /// Runs whose best rank hit the target.
    num_hits: u64,

    /// The lowest best rank over all runs.
    best_overall: Option<usize>,

    total_flips: u64,

    total_plus: u64,

    /// How many runs ended at which best rank.
    rank_counts: AHashMap<usize, u64>,

    /// How many runs ended with which solver code.
    code_counts: AHashMap<i64, u64>,
}

impl Summary {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            num_runs: 0,
            num_hits: 0,
            best_overall: None,
            total_flips: 0,
            total_plus: 0,
            rank_counts: AHashMap::new(),
            code_counts: AHashMap::new(),
        }
    }

    pub fn record(&mut self, record: &RunRecord) {
        self.num_runs += 1;
        if record.best == self.target {
            self.num_hits += 1;
        }
        self.best_overall = Some(match self.best_overall {
            None => record.best,
            Some(best) => best.min(record.best),
        });
        self.total_flips += record.flips;
        self.total_plus += record.plus;
        *self.rank_counts.entry(record.best).or_insert(0) += 1;
        *self.code_counts.entry(record.rcode).or_insert(0) += 1;
    }

    /// The one-line rank histogram that also goes to the run log:
    /// `Summary: 49/3 50/7` means three runs ended at rank 49, seven at 50.
    pub fn compact_line(&self) -> String {
        let mut ranks: Vec<(&usize, &u64)> = self.rank_counts.iter().collect();
        ranks.sort();
        let mut line = String::from("Summary:");
        for (rank, count) in ranks {
            line.push_str(&format!(" {}/{}", rank, count));
        }
        line
    }

    fn percent(&self, v: u64) -> String {
        let percent = 100.0 * (v as f64) / (self.num_runs as f64);
        format!("{:.2}%", percent)
    }

    pub fn print_report(&self) {
        bunt::println!("{$blue+bold}▸ Results:{/$}");

        match self.best_overall {
            None => {
                println!("- no runs were recorded");
                return;
            }
            Some(best) => {
                bunt::println!("- The best rank found is: {[green+bold]}", best);
            }
        }
        bunt::println!(
            "- {[green+bold]} of {} runs ({[green+bold]}) reached the target rank {}",
            self.num_hits,
            self.num_runs,
            self.percent(self.num_hits),
            self.target,
        );

        let mut codes: Vec<(&i64, &u64)> = self.code_counts.iter().collect();
        codes.sort();
        for (&code, &count) in codes {
            bunt::println!(
                "  - {[yellow+bold]} ({[yellow+bold]}) {}",
                count,
                self.percent(count),
                describe_code(code),
            );
        }

        println!(
            "- {} flips and {} plus transitions in total",
            self.total_flips, self.total_plus,
        );
        println!();
        println!("{}", self.compact_line());
    }
}

fn describe_code(code: i64) -> &'static str {
    match code {
        0 => "achieved the target",
        -1 => "ran out of usable flips",
        1 => "hit the flip limit",
        2 => "were terminated early",
        6 => "escaped a size-cap deadlock",
        _ => "returned no result",
    }
}
