//! The flip-graph random walk that does the actual searching.
//!
//! A walk owns one flat array of d-slots. The e and f slots of term `i` are
//! the d-slots of its orbit mates `me[i]` and `mf[i]`, so mutating one array
//! entry updates a whole orbit consistently and the symmetry can never drift.
//! Each step samples a duplicated value, flips two slots, and fixes up the
//! index; everything is O(1) in the problem size.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    index::{PairTable, SlotIndex},
    scheme::partner_tables,
    tensor::Slot,
};


/// How a random walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The set was reduced to the target rank.
    TargetReached,

    /// No value is held by two positions anymore, so no flip exists.
    NoUsableFlips,

    /// The flip budget ran out.
    FlipLimitReached,

    /// The termination strategy cut the walk short of the full budget.
    EarlyTerminated,

    /// 1000 consecutive candidates violated the size cap.
    SizeCapEscape,
}

impl Outcome {
    pub fn code(self) -> i64 {
        match self {
            Outcome::TargetReached => 0,
            Outcome::NoUsableFlips => -1,
            Outcome::FlipLimitReached => 1,
            Outcome::EarlyTerminated => 2,
            Outcome::SizeCapEscape => 6,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Outcome::TargetReached => "Target achieved",
            Outcome::NoUsableFlips => "State with zero neighbours",
            Outcome::FlipLimitReached => "Flip limit reached",
            Outcome::EarlyTerminated => "Terminated early",
            Outcome::SizeCapEscape => "Escaped infinite loop",
        }
    }
}


/// One solver invocation, handed over from the run shell.
///
/// `slots` is the flat d-slot array; its length is the term count. `target`
/// and `maxplus` are in solver space, i.e. with any cube terms already
/// subtracted by the caller.
#[derive(Clone)]
pub struct Job {
    pub symm: usize,
    pub target: i64,
    pub flip_limit: u64,
    /// Flip spacing between plus transitions. Negative requests random
    /// spacing over twice the magnitude. Never zero; callers encode "no plus
    /// transitions" as a value beyond any reachable flip count.
    pub plus_after: i64,
    /// 0 = run to the flip limit, 1 = early termination, 2 = reset the
    /// budget on every new record, above 2 = split threshold.
    pub termination: i64,
    /// Percentage of the budget spent above the split threshold.
    pub split: u64,
    /// Rank cap; plus transitions are disabled once the rank reaches it.
    pub maxplus: i64,
    /// 0 = unconstrained, positive = cap on a term's popcount volume,
    /// negative = cap on any single slot's popcount.
    pub max_size: i64,
    pub seed: u64,
    pub slots: Vec<Slot>,
}

/// What a walk reports back: final counters plus the returned slot array,
/// which is the best snapshot if that is strictly better than the live set.
pub struct WalkReport {
    pub outcome: Outcome,
    pub flips: u64,
    pub achieved: i64,
    pub minmuls: i64,
    pub plus: u64,
    pub slots: Vec<Slot>,
}

pub fn run(job: Job) -> WalkReport {
    let mut walk = Walk::new(job);
    let outcome = walk.walk_loop();
    let slots = if walk.minmuls < walk.achieved {
        walk.best
    } else {
        walk.muls
    };
    WalkReport {
        outcome,
        flips: walk.flips,
        achieved: walk.achieved,
        minmuls: walk.minmuls,
        plus: walk.plus_count,
        slots,
    }
}


struct Walk {
    symm: usize,
    nomuls: usize,
    muls: Vec<Slot>,
    me: Vec<usize>,
    mf: Vec<usize>,
    index: SlotIndex,
    pairs: PairTable,
    rng: ChaCha8Rng,

    flips: u64,
    achieved: i64,
    minmuls: i64,
    best: Vec<Slot>,
    plus_count: u64,
    plus_by: u64,
    limit: u64,

    target: i64,
    flip_limit: u64,
    plus_after: i64,
    termination: i64,
    split: u64,
    maxplus: i64,
    max_size: i64,
}

fn volume(d: Slot, e: Slot, f: Slot) -> i64 {
    d.count_ones() as i64 * e.count_ones() as i64 * f.count_ones() as i64
}

impl Walk {
    fn new(job: Job) -> Self {
        let nomuls = job.slots.len();
        let (me, mf) = partner_tables(nomuls);
        let index = SlotIndex::from_slots(&job.slots);
        let achieved = job.slots.iter().filter(|&&m| m != 0).count() as i64;
        Self {
            symm: job.symm,
            nomuls,
            best: job.slots.clone(),
            muls: job.slots,
            me,
            mf,
            index,
            pairs: PairTable::new(),
            rng: ChaCha8Rng::seed_from_u64(job.seed),
            flips: 0,
            achieved,
            minmuls: achieved,
            plus_count: 0,
            plus_by: 0,
            limit: 0,
            target: job.target,
            flip_limit: job.flip_limit,
            plus_after: job.plus_after,
            termination: job.termination,
            split: job.split,
            maxplus: job.maxplus,
            max_size: job.max_size,
        }
    }

    fn walk_loop(&mut self) -> Outcome {
        if self.achieved <= self.target {
            return Outcome::TargetReached;
        }
        if !self.index.has_pairs() {
            return Outcome::NoUsableFlips;
        }
        self.schedule_plus();
        self.limit = self.update_limit();

        loop {
            self.flips += self.symm as u64;

            let (p, q) = match self.select_flip() {
                Some(pq) => pq,
                None => return Outcome::SizeCapEscape,
            };
            if let Some(outcome) = self.apply_flip(p, q) {
                return outcome;
            }

            if self.flips >= self.plus_by {
                if let Some(outcome) = self.plus_transition() {
                    return outcome;
                }
            }

            if self.flips >= self.limit {
                return if self.flips >= self.flip_limit {
                    Outcome::FlipLimitReached
                } else {
                    Outcome::EarlyTerminated
                };
            }
        }
    }

    /// Picks two positions holding the same value, from different orbits.
    /// With a size cap in force the sampling is bounded; `None` means 1000
    /// consecutive candidates were rejected.
    fn select_flip(&mut self) -> Option<(usize, usize)> {
        if self.max_size == 0 {
            loop {
                let (p, q) = self.sample_pair();
                if p / self.symm != q / self.symm {
                    return Some((p, q));
                }
            }
        }

        for _ in 0..1000 {
            let (p, q) = self.sample_pair();
            let pe = self.muls[self.me[p]];
            let pf = self.muls[self.mf[p]];
            let qe = self.muls[self.me[q]];
            let qf = self.muls[self.mf[q]];
            let pen = qe ^ pe;
            let qfn = qf ^ pf;
            let fits = if self.max_size > 0 {
                volume(self.muls[p], pen, pf) <= self.max_size
                    && volume(self.muls[q], qe, qfn) <= self.max_size
            } else {
                let cap = -self.max_size;
                (pen.count_ones() as i64) <= cap && (qfn.count_ones() as i64) <= cap
            };
            if p / self.symm != q / self.symm && fits {
                return Some((p, q));
            }
        }
        None
    }

    fn sample_pair(&mut self) -> (usize, usize) {
        let v = self.index.sample_value(&mut self.rng);
        let bucket = self.index.bucket(v);
        let (pi, qi) = self.pairs.sample(&mut self.rng, bucket.len());
        (bucket[pi], bucket[qi])
    }

    /// Removes the old value at `pos` from the index, installs the new one.
    fn replace(&mut self, pos: usize, old: Slot, new: Slot) {
        self.index.remove(pos, old);
        self.index.add(pos, new);
        self.muls[pos] = new;
    }

    /// The flip itself: term p gets e ^= e_q, term q gets f ^= f_p, which
    /// cancels over GF(2) because both share the d-slot. Returns the final
    /// outcome if a collapse ended the walk.
    fn apply_flip(&mut self, p: usize, q: usize) -> Option<Outcome> {
        debug_assert_ne!(p / self.symm, q / self.symm, "flip within one orbit");
        if self.symm == 3 {
            self.apply_flip_cyclic(p, q)
        } else {
            self.apply_flip_dihedral(p, q)
        }
    }

    fn apply_flip_cyclic(&mut self, p: usize, q: usize) -> Option<Outcome> {
        let pe = self.muls[self.me[p]];
        let pf = self.muls[self.mf[p]];
        let qe = self.muls[self.me[q]];
        let qf = self.muls[self.mf[q]];
        let pen = qe ^ pe;
        let qfn = qf ^ pf;

        self.replace(self.me[p], pe, pen);
        self.replace(self.mf[q], qf, qfn);

        if pen == 0 {
            let pd = self.muls[p];
            self.index.remove(p, pd);
            self.index.remove(self.me[p], pen);
            self.index.remove(self.mf[p], pf);
            self.muls[p] = 0;
            self.muls[self.mf[p]] = 0;
            self.achieved -= 3;
            if let Some(outcome) = self.after_reduction() {
                return Some(outcome);
            }
        }

        if qfn == 0 {
            let qd = self.muls[q];
            self.index.remove(q, qd);
            self.index.remove(self.me[q], qe);
            self.index.remove(self.mf[q], qfn);
            self.muls[q] = 0;
            self.muls[self.me[q]] = 0;
            self.achieved -= 3;
            if let Some(outcome) = self.after_reduction() {
                return Some(outcome);
            }
        }

        None
    }

    /// As the cyclic flip, but the reflected partner orbit positions p±3 and
    /// q±3 undergo the identical mutation. A term can also die here by
    /// becoming equal to its own reflection, in which case the orbit cancels
    /// pairwise even though the mutated slot is nonzero.
    fn apply_flip_dihedral(&mut self, p: usize, q: usize) -> Option<Outcome> {
        let pp = if p % 6 < 3 { p + 3 } else { p - 3 };
        let qq = if q % 6 < 3 { q + 3 } else { q - 3 };

        let pd = self.muls[p];
        let pe = self.muls[self.me[p]];
        let pf = self.muls[self.mf[p]];
        let qd = self.muls[q];
        let qe = self.muls[self.me[q]];
        let qf = self.muls[self.mf[q]];
        let ppd = self.muls[pp];
        let ppe = self.muls[self.me[pp]];
        let ppf = self.muls[self.mf[pp]];
        let qqd = self.muls[qq];
        let qqe = self.muls[self.me[qq]];
        let qqf = self.muls[self.mf[qq]];
        let pen = qe ^ pe;
        let qfn = qf ^ pf;
        let ppen = qqe ^ ppe;
        let qqfn = qqf ^ ppf;

        self.replace(self.me[p], pe, pen);
        self.replace(self.me[pp], ppe, ppen);
        self.replace(self.mf[q], qf, qfn);
        self.replace(self.mf[qq], qqf, qqfn);

        if pen == 0 || (pd == ppd && pen == ppen && pf == ppf) {
            self.index.remove(p, pd);
            self.index.remove(self.me[p], pen);
            self.index.remove(self.mf[p], pf);
            self.muls[p] = 0;
            self.muls[self.mf[p]] = 0;
            self.index.remove(pp, ppd);
            self.index.remove(self.me[pp], ppen);
            self.index.remove(self.mf[pp], ppf);
            self.muls[pp] = 0;
            self.muls[self.mf[pp]] = 0;
            if pen != 0 {
                // Matched the reflection: the surviving e slots must be
                // zeroed by hand or the dead orbit would still evaluate.
                self.muls[self.me[p]] = 0;
                self.muls[self.me[pp]] = 0;
            }
            self.achieved -= 6;
            if let Some(outcome) = self.after_reduction() {
                return Some(outcome);
            }
        }

        if qfn == 0 || (qd == qqd && qe == qqe && qfn == qqfn) {
            self.index.remove(q, qd);
            self.index.remove(self.me[q], qe);
            self.index.remove(self.mf[q], qfn);
            self.muls[q] = 0;
            self.muls[self.me[q]] = 0;
            self.index.remove(qq, qqd);
            self.index.remove(self.me[qq], qqe);
            self.index.remove(self.mf[qq], qqfn);
            self.muls[qq] = 0;
            self.muls[self.me[qq]] = 0;
            if qfn != 0 {
                self.muls[self.mf[q]] = 0;
                self.muls[self.mf[qq]] = 0;
            }
            self.achieved -= 6;
            if let Some(outcome) = self.after_reduction() {
                return Some(outcome);
            }
        }

        None
    }

    /// Common bookkeeping after an orbit died: record-keeping, snapshotting,
    /// plus rescheduling, exit checks and the stuck-state guard.
    fn after_reduction(&mut self) -> Option<Outcome> {
        if self.achieved < self.minmuls {
            self.minmuls = self.achieved;
            if self.achieved > self.target {
                self.limit = self.update_limit();
            }
        }
        if self.achieved <= self.minmuls {
            self.snapshot();
        }
        self.schedule_plus();

        if !self.index.has_pairs() {
            return Some(Outcome::NoUsableFlips);
        }
        if self.achieved <= self.target {
            return Some(Outcome::TargetReached);
        }

        // If every duplicated value sits inside a single orbit, no legal flip
        // remains and the loop would spin forever; force a plus transition.
        if self.no_cross_orbit_pairs() {
            self.plus_by = self.flips;
        }
        None
    }

    fn snapshot(&mut self) {
        self.best.clear();
        self.best.extend_from_slice(&self.muls);
        #[cfg(debug_assertions)]
        self.index.check_consistency(&self.muls);
    }

    fn no_cross_orbit_pairs(&self) -> bool {
        self.index.pair_values().iter().all(|&v| {
            let bucket = self.index.bucket(v);
            bucket.iter().all(|&w| w / self.symm == bucket[0] / self.symm)
        })
    }

    fn schedule_plus(&mut self) {
        self.plus_by = if self.achieved >= self.maxplus {
            self.flip_limit * 1007
        } else if self.plus_after < 0 {
            let span = (-2 * self.plus_after) as u64;
            self.flips + self.rng.gen_range(0..span) + self.symm as u64
        } else {
            self.flips + self.plus_after as u64
        };
    }

    /// Rewrites two terms and fills one reserved orbit so that the set grows
    /// by σ terms while representing the same tensor, opening flip moves a
    /// local minimum does not have. Returns the final outcome if the walk
    /// cannot continue without one.
    fn plus_transition(&mut self) -> Option<Outcome> {
        let r = match self.muls.iter().position(|&m| m == 0) {
            Some(r) => r,
            // No reserved orbit left. When the stuck-state guard forced this
            // transition there is no cross-orbit flip either, so the walk
            // has nowhere left to go; otherwise disable further transitions
            // instead of clobbering a live orbit.
            None => {
                if self.no_cross_orbit_pairs() {
                    return Some(Outcome::NoUsableFlips);
                }
                self.plus_by = self.flip_limit * 1007;
                return None;
            }
        };
        if self.symm == 3 {
            self.plus_cyclic(r);
        } else {
            self.plus_dihedral(r);
        }
        self.plus_count += self.symm as u64;
        self.achieved += self.symm as i64;
        self.schedule_plus();
        None
    }

    fn plus_cyclic(&mut self, r: usize) {
        let (p, q) = loop {
            let p = self.rng.gen_range(0..self.nomuls);
            let q = self.rng.gen_range(0..self.nomuls);
            let pd = self.muls[p];
            let pe = self.muls[self.me[p]];
            let pf = self.muls[self.mf[p]];
            let qd = self.muls[q];
            let qe = self.muls[self.me[q]];
            let qf = self.muls[self.mf[q]];
            if !self.plus_candidate_fits(pd, pe, pf, qd, qe, qf) {
                continue;
            }
            if pd == 0 || qd == 0 || pd == qd || pe == qe || pf == qf {
                continue;
            }
            if p / self.symm == q / self.symm {
                continue;
            }
            break (p, q);
        };

        let pd = self.muls[p];
        let pe = self.muls[self.me[p]];
        let pf = self.muls[self.mf[p]];
        let qd = self.muls[q];
        let qe = self.muls[self.me[q]];
        let qf = self.muls[self.mf[q]];
        let pen = pe ^ qe;
        let qfn = pf ^ qf;
        let rdn = pd ^ qd;

        self.index.remove(self.me[p], pe);
        self.index.add(self.me[p], pen);
        self.index.remove(q, qd);
        self.index.add(q, pd);
        self.index.remove(self.mf[q], qf);
        self.index.add(self.mf[q], qfn);
        self.index.add(r, rdn);
        self.index.add(self.me[r], qe);
        self.index.add(self.mf[r], qf);

        self.muls[self.me[p]] = pen;
        self.muls[q] = pd;
        self.muls[self.mf[q]] = qfn;
        self.muls[r] = rdn;
        self.muls[self.me[r]] = qe;
        self.muls[self.mf[r]] = qf;
    }

    fn plus_dihedral(&mut self, r: usize) {
        let rr = r + 3;
        let (p, q, pp, qq) = loop {
            let p = self.rng.gen_range(0..self.nomuls);
            let q = self.rng.gen_range(0..self.nomuls);
            let pp = if p % 6 < 3 { p + 3 } else { p - 3 };
            let qq = if q % 6 < 3 { q + 3 } else { q - 3 };
            let pd = self.muls[p];
            let pe = self.muls[self.me[p]];
            let pf = self.muls[self.mf[p]];
            let qd = self.muls[q];
            let qe = self.muls[self.me[q]];
            let qf = self.muls[self.mf[q]];
            let ppd = self.muls[pp];
            let ppe = self.muls[self.me[pp]];
            let ppf = self.muls[self.mf[pp]];
            let qqd = self.muls[qq];
            let qqe = self.muls[self.me[qq]];
            let qqf = self.muls[self.mf[qq]];
            if !self.plus_candidate_fits(pd, pe, pf, qd, qe, qf) {
                continue;
            }
            if pd == 0 || qd == 0 || ppd == 0 || qqd == 0 {
                continue;
            }
            if pd == qd || pe == qe || pf == qf {
                continue;
            }
            if ppd == qqd || ppe == qqe || ppf == qqf {
                continue;
            }
            if p / self.symm == q / self.symm {
                continue;
            }
            break (p, q, pp, qq);
        };

        let pd = self.muls[p];
        let pe = self.muls[self.me[p]];
        let pf = self.muls[self.mf[p]];
        let qd = self.muls[q];
        let qe = self.muls[self.me[q]];
        let qf = self.muls[self.mf[q]];
        let ppd = self.muls[pp];
        let ppe = self.muls[self.me[pp]];
        let ppf = self.muls[self.mf[pp]];
        let qqd = self.muls[qq];
        let qqe = self.muls[self.me[qq]];
        let qqf = self.muls[self.mf[qq]];
        let pen = pe ^ qe;
        let qfn = pf ^ qf;
        let rdn = pd ^ qd;
        let ppen = ppe ^ qqe;
        let qqfn = ppf ^ qqf;
        let rrdn = ppd ^ qqd;

        self.index.remove(self.me[p], pe);
        self.index.add(self.me[p], pen);
        self.index.remove(q, qd);
        self.index.add(q, pd);
        self.index.remove(self.mf[q], qf);
        self.index.add(self.mf[q], qfn);
        self.index.add(r, rdn);
        self.index.add(self.me[r], qe);
        self.index.add(self.mf[r], qf);
        self.index.remove(self.me[pp], ppe);
        self.index.add(self.me[pp], ppen);
        self.index.remove(qq, qqd);
        self.index.add(qq, ppd);
        self.index.remove(self.mf[qq], qqf);
        self.index.add(self.mf[qq], qqfn);
        self.index.add(rr, rrdn);
        self.index.add(self.me[rr], qqe);
        self.index.add(self.mf[rr], qqf);

        self.muls[self.me[p]] = pen;
        self.muls[q] = pd;
        self.muls[self.mf[q]] = qfn;
        self.muls[r] = rdn;
        self.muls[self.me[r]] = qe;
        self.muls[self.mf[r]] = qf;
        self.muls[self.me[pp]] = ppen;
        self.muls[qq] = ppd;
        self.muls[self.mf[qq]] = qqfn;
        self.muls[rr] = rrdn;
        self.muls[self.me[rr]] = qqe;
        self.muls[self.mf[rr]] = qqf;
    }

    /// Size-cap screen for a plus candidate, over the three rewritten terms.
    fn plus_candidate_fits(&self, pd: Slot, pe: Slot, pf: Slot, qd: Slot, qe: Slot, qf: Slot) -> bool {
        let pen = pe ^ qe;
        let qfn = pf ^ qf;
        let rdn = pd ^ qd;
        if self.max_size > 0 {
            volume(pd, pen, pf) <= self.max_size
                && volume(pd, qe, qfn) <= self.max_size
                && volume(rdn, qe, qf) <= self.max_size
        } else if self.max_size < 0 {
            let cap = -self.max_size;
            (pen.count_ones() as i64) <= cap
                && (qfn.count_ones() as i64) <= cap
                && (rdn.count_ones() as i64) <= cap
        } else {
            true
        }
    }

    /// The flip count at which the current termination strategy stops the
    /// walk, recomputed on every new record rank.
    fn update_limit(&self) -> u64 {
        let flips = self.flips as i64;
        let flimit = self.flip_limit as i64;
        let symm = self.symm as i64;
        let rlimit = match self.termination {
            0 => flimit,
            1 => {
                let steps = ((self.achieved - self.target) / symm).max(1);
                flips + (flimit - flips).div_euclid(steps)
            }
            2 => flips + flimit,
            threshold => {
                let slimit = self.split as i64 * flimit / 100;
                if self.achieved > threshold {
                    let steps = ((self.achieved - threshold) / symm).max(1);
                    flips + (slimit - flips).div_euclid(steps)
                } else {
                    let steps = ((self.achieved - self.target) / symm).max(1);
                    flips + (flimit - flips).div_euclid(steps)
                }
            }
        };
        rlimit.max(0) as u64
    }
}


#[cfg(test)]
mod tests {
    use crate::scheme::{diagonal_cube, partner_tables, Scheme};
    use crate::tensor::{mulmat_tensor, Layout, Slot, Tensor};

    use super::{run, Job, Outcome, Walk};

    fn eval_slots(size: usize, slots: &[Slot]) -> Tensor {
        let (me, mf) = partner_tables(slots.len());
        let mut t = Tensor::zero(size);
        for i in 0..slots.len() {
            t.xor_outer(slots[i], slots[me[i]], slots[mf[i]]);
        }
        t
    }

    /// The n = 2 search seeded by the full diagonal cube, as slots plus the
    /// residual the slots must keep representing.
    fn strassen_job(symm: usize, seed: u64, flip_limit: u64) -> (Job, Tensor) {
        let layout = Layout::new(2, true);
        let cube = diagonal_cube(2, "11");
        let mut residual = mulmat_tensor(&layout);
        residual.xor_outer(cube, cube, cube);
        assert!(residual.is_palindrome());

        let scheme = Scheme::from_pattern(2, &residual, 6);
        let slots: Vec<Slot> = scheme.muls.iter().map(|m| m[0]).collect();
        let maxplus = slots.len() as i64;
        let job = Job {
            symm,
            target: 6, // rank 7 minus the cube term
            flip_limit,
            plus_after: (flip_limit * 1007) as i64,
            termination: 0,
            split: 0,
            maxplus,
            max_size: 0,
            seed,
            slots,
        };
        (job, residual)
    }

    #[test]
    fn strassen_cyclic() {
        let mut hit = false;
        for seed in 0..20 {
            let (job, residual) = strassen_job(3, seed, 50_000);
            let report = run(job);
            assert_eq!(eval_slots(4, &report.slots), residual, "tensor drifted, seed {}", seed);
            if report.outcome == Outcome::TargetReached {
                assert_eq!(report.achieved, 6);
                let rank = report.slots.iter().filter(|&&m| m != 0).count();
                assert_eq!(rank, 6, "seed {}", seed);
                hit = true;
            }
        }
        assert!(hit, "no seed out of 20 reached rank 7 for n = 2");
    }

    #[test]
    fn strassen_dihedral() {
        let mut hit = false;
        for seed in 0..20 {
            let (job, residual) = strassen_job(6, seed, 50_000);
            let report = run(job);
            assert_eq!(eval_slots(4, &report.slots), residual, "tensor drifted, seed {}", seed);
            if report.outcome == Outcome::TargetReached {
                assert_eq!(report.achieved, 6);
                // The six survivors form one dihedral orbit.
                let live: Vec<usize> = (0..report.slots.len())
                    .filter(|&i| report.slots[i] != 0)
                    .collect();
                assert_eq!(live.len(), 6);
                assert_eq!(live[0] % 6, 0);
                assert!(live.windows(2).all(|w| w[1] == w[0] + 1));
                hit = true;
            }
        }
        assert!(hit, "no seed out of 20 reached rank 7 for n = 2");
    }

    #[test]
    fn walk_is_deterministic() {
        let (job_a, _) = strassen_job(3, 7, 5_000);
        let (job_b, _) = strassen_job(3, 7, 5_000);
        let a = run(job_a);
        let b = run(job_b);
        assert_eq!(a.flips, b.flips);
        assert_eq!(a.achieved, b.achieved);
        assert_eq!(a.slots, b.slots);
    }

    #[test]
    fn tensor_preserved_with_plus_transitions() {
        let layout = Layout::new(3, true);
        let cube = diagonal_cube(3, "111");
        let mut residual = mulmat_tensor(&layout);
        residual.xor_outer(cube, cube, cube);

        let scheme = Scheme::from_pattern(3, &residual, 6);
        let mut slots: Vec<Slot> = scheme.muls.iter().map(|m| m[0]).collect();
        let start = slots.len();
        // Reserve three orbits of headroom for plus transitions.
        slots.extend(std::iter::repeat(0).take(9));

        let job = Job {
            symm: 3,
            target: 22,
            flip_limit: 30_000,
            plus_after: 6,
            termination: 0,
            split: 0,
            maxplus: start as i64 + 9,
            max_size: 0,
            seed: 3,
            slots,
        };
        let report = run(job);
        assert_eq!(eval_slots(9, &report.slots), residual, "tensor drifted");
        assert!(report.plus > 0, "a spacing of 6 must fire within a few steps");
        assert_eq!(report.plus % 3, 0);
    }

    #[test]
    fn empty_set_reports_target_reached() {
        let job = Job {
            symm: 3,
            target: 0,
            flip_limit: 1000,
            plus_after: 1007000,
            termination: 0,
            split: 0,
            maxplus: 0,
            max_size: 0,
            seed: 0,
            slots: Vec::new(),
        };
        let report = run(job);
        assert_eq!(report.outcome, Outcome::TargetReached);
        assert_eq!(report.flips, 0);
    }

    #[test]
    fn all_unique_values_report_zero_neighbours() {
        // Two orbits, six distinct values: nothing is duplicated, no flip
        // exists, and the walk must say so without doing anything.
        let job = Job {
            symm: 3,
            target: 0,
            flip_limit: 1000,
            plus_after: 1007000,
            termination: 0,
            split: 0,
            maxplus: 6,
            max_size: 0,
            seed: 0,
            slots: vec![1, 4, 2, 8, 32, 16],
        };
        let report = run(job);
        assert_eq!(report.outcome, Outcome::NoUsableFlips);
        assert_eq!(report.flips, 0);
        assert_eq!(report.achieved, 6);
    }

    #[test]
    fn impossible_size_cap_escapes() {
        // Orbits (1, 2, 4) and (1, 8, 16) share the d-slot value 1, so pairs
        // exist, but every flip produces a two-bit slot. A length cap of 1
        // rejects all of them.
        let job = Job {
            symm: 3,
            target: 0,
            flip_limit: 1000,
            plus_after: 1007000,
            termination: 0,
            split: 0,
            maxplus: 6,
            max_size: -1,
            seed: 0,
            slots: vec![1, 4, 2, 1, 16, 8],
        };
        let report = run(job);
        assert_eq!(report.outcome, Outcome::SizeCapEscape);
        assert_eq!(report.flips, 3, "escape happens within the first step");
    }

    #[test]
    fn plus_transition_grows_rank_and_preserves_tensor() {
        // Two live orbits with pairwise distinct components, one reserved.
        let slots: Vec<Slot> = vec![1, 4, 2, 8, 32, 16, 0, 0, 0];
        let before = eval_slots(8, &slots);
        let job = Job {
            symm: 3,
            target: 0,
            flip_limit: 1000,
            plus_after: 10,
            termination: 0,
            split: 0,
            maxplus: 9,
            max_size: 0,
            seed: 5,
            slots,
        };
        let mut walk = Walk::new(job);
        assert!(walk.plus_transition().is_none());
        assert_eq!(walk.achieved, 9);
        assert_eq!(walk.plus_count, 3);
        assert!(walk.muls.iter().all(|&m| m != 0));
        assert_eq!(eval_slots(8, &walk.muls), before, "plus must be an identity");
        #[cfg(debug_assertions)]
        walk.index.check_consistency(&walk.muls);
    }

    #[test]
    fn plus_transition_dihedral_grows_rank_and_preserves_tensor() {
        // Two dihedral orbits built from reflection-free patterns on an
        // 8-entry slot space, plus one reserved orbit of six.
        let layout = Layout::new(2, true);
        let t = mulmat_tensor(&layout);
        let scheme = Scheme::from_pattern(2, &t, 6);
        let mut slots: Vec<Slot> = scheme.muls.iter().map(|m| m[0]).collect();
        slots.extend(std::iter::repeat(0).take(6));
        let before = eval_slots(4, &slots);
        let live = slots.iter().filter(|&&m| m != 0).count() as i64;

        let job = Job {
            symm: 6,
            target: 0,
            flip_limit: 1000,
            plus_after: 10,
            termination: 0,
            split: 0,
            maxplus: live + 6,
            max_size: 0,
            seed: 9,
            slots,
        };
        let mut walk = Walk::new(job);
        let achieved = walk.achieved;
        assert!(walk.plus_transition().is_none());
        assert_eq!(walk.achieved, achieved + 6);
        assert_eq!(eval_slots(4, &walk.muls), before, "plus must be an identity");
    }

    #[test]
    fn stuck_state_guard_forces_plus() {
        // The only duplicated value (5) lives entirely inside orbit 0, so no
        // legal flip remains and the guard must pull the plus forward.
        let job = Job {
            symm: 3,
            target: 0,
            flip_limit: 1000,
            plus_after: 1007000,
            termination: 0,
            split: 0,
            maxplus: 0, // plus nominally disabled
            max_size: 0,
            seed: 0,
            slots: vec![5, 5, 9, 3, 6, 10],
        };
        let mut walk = Walk::new(job);
        assert!(walk.no_cross_orbit_pairs());
        walk.flips = 120;
        walk.target = -1; // keep after_reduction from exiting early
        let outcome = walk.after_reduction();
        assert!(outcome.is_none());
        assert_eq!(walk.plus_by, 120, "guard must schedule the plus now");

        // All terms are live, so the forced transition has no reserved
        // orbit to fill. It must end the walk rather than hand control
        // back to a flip selection that can never produce a pair.
        assert_eq!(walk.plus_transition(), Some(Outcome::NoUsableFlips));
    }

    #[test]
    fn cross_orbit_pairs_do_not_trigger_guard() {
        let job = Job {
            symm: 3,
            target: 0,
            flip_limit: 1000,
            plus_after: 1007000,
            termination: 0,
            split: 0,
            maxplus: 6,
            max_size: 0,
            seed: 0,
            slots: vec![5, 7, 9, 5, 6, 10],
        };
        let mut walk = Walk::new(job);
        assert!(!walk.no_cross_orbit_pairs());

        // With no reserved orbit but flips still available, the transition
        // only disables itself and the walk goes on.
        assert!(walk.plus_transition().is_none());
        assert_eq!(walk.plus_by, 1000 * 1007);
        assert_eq!(walk.plus_count, 0);
    }

    #[test]
    fn termination_limits() {
        let base = Job {
            symm: 3,
            target: 6,
            flip_limit: 1000,
            plus_after: 1007000,
            termination: 0,
            split: 0,
            maxplus: 0,
            max_size: 0,
            seed: 0,
            slots: vec![1, 4, 2, 8, 32, 16, 3, 12, 10, 24, 48, 33],
        };

        // Plain limit.
        let walk = Walk::new(base.clone());
        assert_eq!(walk.update_limit(), 1000);

        // Early: achieved 12, target 6 -> two reduction steps left.
        let walk = Walk::new(Job { termination: 1, ..base.clone() });
        assert_eq!(walk.update_limit(), 500);

        // Reset: a fresh budget on top of the current count.
        let mut walk = Walk::new(Job { termination: 2, ..base.clone() });
        walk.flips = 300;
        assert_eq!(walk.update_limit(), 1300);

        // Split: above the threshold only 40% of the budget is in play.
        let walk = Walk::new(Job { termination: 9, split: 40, ..base.clone() });
        assert_eq!(walk.update_limit(), 400);

        // Split: at or below the threshold the full budget applies.
        let mut walk = Walk::new(Job { termination: 9, split: 40, ..base.clone() });
        walk.achieved = 9;
        assert_eq!(walk.update_limit(), 1000);
    }
}
