//! Multiplication schemes: sets of rank-one terms over GF(2).
//!
//! A scheme holds full (d, e, f) triples and is what the shell code passes
//! around: seeding, saved-solution files, verification and printing. The
//! walk itself only ever sees the flat d-slot array, since within an orbit
//! the e and f slots are the d-slots of the orbit mates.

use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};

use crate::tensor::{bits, slot_string, Layout, Slot, Tensor};


/// Partner tables for a flat d-slot array: the e and f slots of term `i`
/// live at positions `me[i]` and `mf[i]`. Wired in blocks of three; the two
/// halves of a 6-orbit repeat the same wiring.
pub fn partner_tables(nomuls: usize) -> (Vec<usize>, Vec<usize>) {
    debug_assert_eq!(nomuls % 3, 0, "term count must be a multiple of 3");
    let mut me = vec![0; nomuls];
    let mut mf = vec![0; nomuls];
    let mut i = 0;
    while i < nomuls {
        me[i] = i + 2;
        mf[i] = i + 1;
        me[i + 1] = i;
        mf[i + 1] = i + 2;
        me[i + 2] = i + 1;
        mf[i + 2] = i;
        i += 3;
    }
    (me, mf)
}

/// A diagonal cube pattern: character y selects diagonal entry (y, y). The
/// resulting slot is used for all three factors of the cube term.
pub fn diagonal_cube(n: usize, pattern: &str) -> Slot {
    let mut slot = 0;
    for (y, ch) in pattern.chars().enumerate() {
        if ch == '1' {
            slot |= 1 << (y * n + y);
        }
    }
    slot
}

/// A full cube pattern: one character per matrix entry, bit y is entry y.
pub fn full_cube(pattern: &str) -> Slot {
    let mut slot = 0;
    for (y, ch) in pattern.chars().enumerate() {
        if ch == '1' {
            slot |= 1 << y;
        }
    }
    slot
}


pub struct Scheme {
    pub n: usize,
    pub size: usize,
    pub muls: Vec<[Slot; 3]>,
    pub flips: u64,
    /// Rank cap for plus transitions, grown by reserved headroom orbits.
    pub maxplus: i64,
}

impl Scheme {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            size: n * n,
            muls: Vec::new(),
            flips: 0,
            maxplus: 0,
        }
    }

    /// Builds a term set of single-bit terms representing `pattern`, grouped
    /// into orbits of the requested symmetry.
    ///
    /// The sweep visits coordinates in a fixed order; each set bit emits its
    /// full orbit (cyclic images for 3, plus reflected images for 6) and
    /// clears the covered coordinates, so every coefficient is produced
    /// exactly once.
    pub fn from_pattern(n: usize, pattern: &Tensor, symm: usize) -> Self {
        let s = n * n;
        debug_assert_eq!(pattern.size(), s);
        let mut left = pattern.clone();
        let mut muls = Vec::new();
        for a in 0..s {
            for b in 0..s {
                for c in 0..s {
                    let d = a + s * b + s * s * c;
                    if !left.bit(d) {
                        continue;
                    }
                    match symm {
                        1 => {
                            muls.push([1 << a, 1 << b, 1 << c]);
                            left.toggle_bit(d);
                        }
                        3 => {
                            muls.push([1 << a, 1 << b, 1 << c]);
                            left.toggle_bit(a + s * b + s * s * c);
                            muls.push([1 << c, 1 << a, 1 << b]);
                            left.toggle_bit(c + s * a + s * s * b);
                            muls.push([1 << b, 1 << c, 1 << a]);
                            left.toggle_bit(b + s * c + s * s * a);
                        }
                        6 => {
                            muls.push([1 << a, 1 << b, 1 << c]);
                            left.toggle_bit(a + s * b + s * s * c);
                            muls.push([1 << c, 1 << a, 1 << b]);
                            left.toggle_bit(c + s * a + s * s * b);
                            muls.push([1 << b, 1 << c, 1 << a]);
                            left.toggle_bit(b + s * c + s * s * a);
                            let (ma, mb, mc) = (s - 1 - a, s - 1 - b, s - 1 - c);
                            muls.push([1 << ma, 1 << mb, 1 << mc]);
                            left.toggle_bit(ma + s * mb + s * s * mc);
                            muls.push([1 << mc, 1 << ma, 1 << mb]);
                            left.toggle_bit(mc + s * ma + s * s * mb);
                            muls.push([1 << mb, 1 << mc, 1 << ma]);
                            left.toggle_bit(mb + s * mc + s * s * ma);
                        }
                        _ => panic!("unsupported symmetry degree {}", symm),
                    }
                }
            }
        }
        let maxplus = muls.len() as i64;
        Self {
            n,
            size: s,
            muls,
            flips: 0,
            maxplus,
        }
    }

    /// Reassembles full triples from a flat d-slot array via the partner
    /// tables.
    pub fn from_slots(n: usize, slots: &[Slot]) -> Self {
        let (me, mf) = partner_tables(slots.len());
        let muls = (0..slots.len())
            .map(|i| [slots[i], slots[me[i]], slots[mf[i]]])
            .collect();
        Self {
            n,
            size: n * n,
            muls,
            flips: 0,
            maxplus: slots.len() as i64,
        }
    }

    /// XOR of the outer products of all terms.
    pub fn eval(&self) -> Tensor {
        let mut t = Tensor::zero(self.size);
        for m in &self.muls {
            t.xor_outer(m[0], m[1], m[2]);
        }
        t
    }

    /// Number of coefficients by which the scheme misses the target.
    pub fn error(&self, target: &Tensor) -> u32 {
        let mut r = self.eval();
        r.xor_in(target);
        r.popcount()
    }

    /// Drops reserved and collapsed terms, keeping only the live scheme.
    pub fn retain_nonzero(&mut self) {
        self.muls.retain(|m| m.iter().all(|&s| s != 0));
    }

    /// Appends reserved zero orbits as future plus-transition headroom.
    pub fn push_reserved(&mut self, terms: usize) {
        for _ in 0..terms {
            self.muls.push([0, 0, 0]);
            self.maxplus += 1;
        }
    }

    pub fn volume(term: &[Slot; 3]) -> u64 {
        term.iter().map(|s| s.count_ones() as u64).product()
    }

    /// Writes the scheme in the product-of-sums text format, one term per
    /// line: `(a11+a12)*(b11+b21)*(c11)`. Entries are 1-based (row, column)
    /// pairs; with `transposed` the C factor is labelled through the
    /// straight maps, undoing the transposed search order.
    pub fn write_solution(&self, path: &Path, layout: &Layout, transposed: bool) -> Result<()> {
        let co = if transposed { 1 } else { 2 };
        let mut out = String::new();
        for m in &self.muls {
            for factor in 0..3 {
                let letter = ['a', 'b', 'c'][factor];
                let maps = if factor == 2 { co } else { factor };
                out.push_str(if factor == 0 { "(" } else { ")*(" });
                for (k, e) in bits(m[factor]).enumerate() {
                    if k > 0 {
                        out.push('+');
                    }
                    out.push(letter);
                    out.push_str(&(layout.row[maps][e] + 1).to_string());
                    out.push_str(&(layout.col[maps][e] + 1).to_string());
                }
            }
            out.push_str(")\n");
        }
        fs::write(path, out).with_context(|| format!("failed to write solution to {}", path.display()))
    }

    /// Parses a solution file written by `write_solution` back into slots.
    pub fn load_solution(n: usize, path: &Path, layout: &Layout, transposed: bool) -> Result<Self> {
        let co = if transposed { 1 } else { 2 };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read solution from {}", path.display()))?;
        let mut muls = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut term = [0 as Slot; 3];
            let mut chars = line.chars();
            while let Some(ch) = chars.next() {
                let factor = match ch {
                    'a' => 0,
                    'b' => 1,
                    'c' => 2,
                    _ => continue,
                };
                let entry = match (chars.next().and_then(|c| c.to_digit(10)), chars.next().and_then(|c| c.to_digit(10))) {
                    (Some(r), Some(c)) if (1..=n as u32).contains(&r) && (1..=n as u32).contains(&c) => {
                        (r as usize - 1) * n + (c as usize - 1)
                    }
                    _ => bail!("malformed entry on line {} of {}", lineno + 1, path.display()),
                };
                let maps = if factor == 2 { co } else { factor };
                term[factor] |= 1 << layout.odr[maps][entry];
            }
            ensure!(
                term.iter().all(|&s| s != 0),
                "term without entries on line {} of {}", lineno + 1, path.display(),
            );
            muls.push(term);
        }
        Ok(Self {
            n,
            size: n * n,
            muls,
            flips: 0,
            maxplus: 0,
        })
    }

    /// One-line report: term count, per-term volumes, flip count, error.
    pub fn summary_line(&self, target: &Tensor, run_no: u64) -> String {
        let mut sizes = String::from("[ ");
        for m in &self.muls {
            sizes.push_str(&Self::volume(m).to_string());
            sizes.push(' ');
        }
        sizes.push(']');
        format!(
            "{} Muls: {} {} Flips: {} Error: {}",
            run_no,
            self.muls.len(),
            sizes,
            self.flips,
            self.error(target),
        )
    }

    /// The full multi-line report: factor headers, one row per term with its
    /// slot bits and volume, the residual grid and the counters.
    pub fn render_full(&self, layout: &Layout, target: &Tensor, run_no: u64) -> String {
        let mut out = String::from("\n");
        if self.n <= 6 {
            if !self.muls.is_empty() {
                out.push_str(&format!("Multiplication set ({}):\n", self.muls.len()));
                out.push_str("R: ");
                for factor in 0..3 {
                    out.push('|');
                    for p in 0..self.size {
                        out.push_str(&(layout.row[factor][p] + 1).to_string());
                    }
                    out.push('|');
                    if factor < 2 {
                        out.push_str("    ");
                    }
                }
                out.push_str("\nC: ");
                for factor in 0..3 {
                    out.push('|');
                    for p in 0..self.size {
                        out.push_str(&(layout.col[factor][p] + 1).to_string());
                    }
                    out.push('|');
                    if factor < 2 {
                        out.push_str("    ");
                    }
                }
                out.push('\n');
                out.push_str(&"-".repeat(self.size * 3 + 31));
                out.push('\n');
            }
            for (i, m) in self.muls.iter().enumerate() {
                out.push_str(&format!(
                    "A: |{}| B: |{}| C: |{}| {:3}{:4}\n",
                    slot_string(m[0], self.size),
                    slot_string(m[1], self.size),
                    slot_string(m[2], self.size),
                    i,
                    Self::volume(m),
                ));
            }
        }
        let mut residual = self.eval();
        residual.xor_in(target);
        out.push_str(&residual.grid_string());
        out.push_str(&format!(
            "Run: {} Flips: {} Error: {}\n",
            run_no,
            self.flips,
            residual.popcount(),
        ));
        out
    }
}


#[cfg(test)]
mod tests {
    use crate::tensor::{mulmat_tensor, Layout, Slot, Tensor};

    use super::{diagonal_cube, full_cube, partner_tables, Scheme};

    #[test]
    fn partner_tables_are_cyclic() {
        let (me, mf) = partner_tables(6);
        assert_eq!(me, vec![2, 0, 1, 5, 3, 4]);
        assert_eq!(mf, vec![1, 2, 0, 4, 5, 3]);
    }

    #[test]
    fn cube_patterns() {
        assert_eq!(diagonal_cube(2, "11"), 0b1001);
        assert_eq!(diagonal_cube(2, "10"), 0b0001);
        assert_eq!(diagonal_cube(3, "111"), 0b1_0001_0001);
        assert_eq!(full_cube("0111"), 0b1110);
        assert_eq!(full_cube("100000000"), 0b1);
    }

    #[test]
    fn seeding_represents_the_pattern() {
        for n in 2..=3 {
            let target = mulmat_tensor(&Layout::new(n, true));
            for &symm in &[1usize, 3] {
                let scheme = Scheme::from_pattern(n, &target, symm);
                assert_eq!(scheme.eval(), target, "n = {}, symm = {}", n, symm);
                assert_eq!(scheme.muls.len() % symm, 0);
            }
        }
    }

    #[test]
    fn dihedral_seeding_represents_the_residual() {
        // 6-way seeding needs a pattern without self-reflective coordinates;
        // subtracting the full diagonal cube clears them, which is also how
        // the runs set themselves up.
        for n in 2..=3 {
            let layout = Layout::new(n, true);
            let cube = diagonal_cube(n, &"1".repeat(n));
            let mut residual = mulmat_tensor(&layout);
            residual.xor_outer(cube, cube, cube);
            assert!(residual.is_palindrome());

            let scheme = Scheme::from_pattern(n, &residual, 6);
            assert_eq!(scheme.eval(), residual, "n = {}", n);
            assert_eq!(scheme.muls.len() % 6, 0);
        }
    }

    #[test]
    fn cyclic_orbits_are_rotations() {
        let target = mulmat_tensor(&Layout::new(3, true));
        let scheme = Scheme::from_pattern(3, &target, 3);
        for orbit in scheme.muls.chunks(3) {
            let [d, e, f] = orbit[0];
            assert_eq!(orbit[1], [f, d, e]);
            assert_eq!(orbit[2], [e, f, d]);
        }
    }

    #[test]
    fn dihedral_orbits_reflect() {
        let target = mulmat_tensor(&Layout::new(2, true));
        let scheme = Scheme::from_pattern(2, &target, 6);
        let s = 4;
        let reflect = |slot: Slot| {
            crate::tensor::bits(slot).fold(0 as Slot, |acc, b| acc | 1 << (s - 1 - b))
        };
        for orbit in scheme.muls.chunks(6) {
            for k in 0..3 {
                let mirrored = [
                    reflect(orbit[k][0]),
                    reflect(orbit[k][1]),
                    reflect(orbit[k][2]),
                ];
                assert_eq!(orbit[k + 3], mirrored);
            }
        }
    }

    #[test]
    fn slots_round_trip_through_partner_tables() {
        let target = mulmat_tensor(&Layout::new(2, true));
        let scheme = Scheme::from_pattern(2, &target, 3);
        let slots: Vec<Slot> = scheme.muls.iter().map(|m| m[0]).collect();
        let rebuilt = Scheme::from_slots(2, &slots);
        assert_eq!(rebuilt.muls, scheme.muls);
    }

    #[test]
    fn residual_of_cube_plus_seed_is_zero() {
        let layout = Layout::new(2, true);
        let target = mulmat_tensor(&layout);
        let cube = diagonal_cube(2, "11");

        let mut residual = target.clone();
        residual.xor_outer(cube, cube, cube);
        let mut scheme = Scheme::from_pattern(2, &residual, 3);
        scheme.muls.push([cube, cube, cube]);
        assert_eq!(scheme.error(&target), 0);
    }

    #[test]
    fn solution_file_round_trip() {
        let layout = Layout::new(2, true);
        let target = mulmat_tensor(&layout);
        let mut residual = target.clone();
        let cube = diagonal_cube(2, "11");
        residual.xor_outer(cube, cube, cube);
        let mut scheme = Scheme::from_pattern(2, &residual, 3);
        scheme.muls.push([cube, cube, cube]);

        let path = std::env::temp_dir().join(format!("flipgraph-roundtrip-{}.txt", std::process::id()));
        scheme.write_solution(&path, &layout, true).unwrap();
        let loaded = Scheme::load_solution(2, &path, &layout, true).unwrap();
        std::fs::remove_file(&path).ok();

        let mut sorted_a = scheme.muls.clone();
        let mut sorted_b = loaded.muls.clone();
        sorted_a.sort();
        sorted_b.sort();
        assert_eq!(sorted_a, sorted_b, "term multisets must survive the file");
        assert_eq!(loaded.error(&target), 0);
    }

    #[test]
    fn multi_entry_terms_round_trip() {
        let layout = Layout::new(2, true);
        // A rank-one term with several entries per factor.
        let scheme = Scheme {
            n: 2,
            size: 4,
            muls: vec![[0b1001, 0b0110, 0b1111], [0b0011, 0b1000, 0b0101]],
            flips: 0,
            maxplus: 0,
        };
        let path = std::env::temp_dir().join(format!("flipgraph-multi-{}.txt", std::process::id()));
        scheme.write_solution(&path, &layout, true).unwrap();
        let loaded = Scheme::load_solution(2, &path, &layout, true).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.muls, scheme.muls);

        let mut a = Tensor::zero(4);
        let mut b = Tensor::zero(4);
        for m in &scheme.muls {
            a.xor_outer(m[0], m[1], m[2]);
        }
        for m in &loaded.muls {
            b.xor_outer(m[0], m[1], m[2]);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn load_rejects_out_of_range_entries() {
        let layout = Layout::new(2, true);
        let path = std::env::temp_dir().join(format!("flipgraph-bad-{}.txt", std::process::id()));
        std::fs::write(&path, "(a13)*(b11)*(c11)\n").unwrap();
        let res = Scheme::load_solution(2, &path, &layout, true);
        std::fs::remove_file(&path).ok();
        assert!(res.is_err(), "column 3 does not exist for n = 2");
    }
}
