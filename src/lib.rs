#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! Statistical discovery of denial constraints over a typed, row-sampled
//! table.
//!
//! A denial constraint is a universally-quantified negative rule over pairs
//! of rows: "no two rows may jointly satisfy predicates P1 ∧ P2 ∧ … ∧ Pk".
//! The family of algorithms this crate belongs to is described by these
//! papers:
//!
//! - Chu, Ilyas and Papotti, [Discovering Denial Constraints][dcs], 2013
//! - Bleifuß, Kruse and Naumann, [Efficient Denial Constraint Discovery
//!   with Hydra][hydra], 2017
//!
//! [dcs]: https://www.vldb.org/pvldb/vol6/p1498-papotti.pdf
//! [hydra]: https://www.vldb.org/pvldb/vol11/p311-bleifuss.pdf
//!
//! The engine works in three passes over a [`Table`]:
//!
//! 1. For every applicable self-join predicate (`t0.col θ t1.col`), an
//!    [`EvidenceSet`] records one bit per ordered row pair telling whether
//!    the predicate holds for that pair.
//! 2. A depth-bounded DFS intersects those bit-vectors to count, for every
//!    reachable predicate set, how many row pairs satisfy the whole
//!    conjunction, memoizing each count exactly once.
//! 3. A second DFS walks the same space and keeps an extension only when
//!    its conditional satisfaction rate sits significantly below that of
//!    every weaker context, judged by a digamma/trigamma approximation of
//!    the log-odds-ratio distribution ([`LogOddsTables`]). An extension no
//!    pair satisfies at all is emitted as a [`DenialConstraint`].
//!
//! The unique-key variant ([`discover_unique`]) keeps only the
//! all-equality constraints, which read as composite unique keys.

pub use sorted_iter;

mod table;

pub use table::{Column, ColumnType, Table};

use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::sorted_iterator::SortedByItem;
use sorted_iter::SortedIterator;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::iter;
use std::path::Path;
use std::thread;
use thiserror::Error;
use tracing::{debug, info};

/// Maximum number of predicates that may be combined in one constraint.
pub const MAX_DEPTH: usize = 6;

/// Maximum number of rows a discovery run will sample. Evidence vectors
/// grow with the square of the row count, so this bound is what keeps the
/// pairwise representation in memory.
pub const MAX_SAMPLE_ROWS: usize = 8192;

/// Upper bound on the total size of the evidence matrix, checked before
/// any of it is allocated.
const MAX_EVIDENCE_BYTES: usize = 1 << 30;

/// Errors surfaced by table loading and constraint discovery. All of them
/// are fatal to the discovery call that produced them.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The input is not a table this engine can read.
    #[error("unsupported table format: {0}")]
    UnsupportedFormat(String),

    /// A column's header tag is unknown, or one of its values does not
    /// parse as the declared type.
    #[error("column {column}: {value:?} is not {declared}")]
    TypeTagMismatch {
        /// Name of the offending column.
        column: String,
        /// The tag or value that failed to parse.
        value: String,
        /// What the loader expected to find.
        declared: &'static str,
    },

    /// Fewer than two rows were sampled; pairwise evidence is undefined
    /// below that.
    #[error("table has {0} row(s); pairwise evidence needs at least 2")]
    EmptyOrSingletonTable(usize),

    /// A caller-supplied bound exceeds the configured memory/time budget.
    #[error("{0}")]
    DepthOrSampleTooLarge(String),

    /// Reading the input failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The six comparison operators predicates are built from.
///
/// Negation is total and involutive, and each operator knows which other
/// operators it implies:
///
/// ```
/// use denial_constraints::Operator;
///
/// assert_eq!(Operator::Gt.negate(), Operator::Le);
/// assert_eq!(Operator::Gt.negate().negate(), Operator::Gt);
/// assert!(Operator::Gt.implications().contains(&Operator::Ne));
/// assert!(Operator::Gt.compare(2.0, 1.0));
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operator {
    /// `==`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl Operator {
    /// Every operator, in catalog enumeration order.
    pub const ALL: [Operator; 6] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
    ];

    /// The operator that holds exactly when this one does not.
    pub fn negate(self) -> Operator {
        match self {
            Operator::Eq => Operator::Ne,
            Operator::Ne => Operator::Eq,
            Operator::Gt => Operator::Le,
            Operator::Le => Operator::Gt,
            Operator::Lt => Operator::Ge,
            Operator::Ge => Operator::Lt,
        }
    }

    /// The operators whose truth follows from this operator's truth on the
    /// same pair of values.
    pub fn implications(self) -> &'static [Operator] {
        match self {
            Operator::Eq => &[Operator::Ge, Operator::Le, Operator::Eq],
            Operator::Ne => &[Operator::Ne],
            Operator::Gt => &[Operator::Gt, Operator::Ge, Operator::Ne],
            Operator::Lt => &[Operator::Lt, Operator::Le, Operator::Ne],
            Operator::Ge => &[Operator::Ge],
            Operator::Le => &[Operator::Le],
        }
    }

    /// The display symbol used in a constraint's canonical text.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }

    /// Evaluates the operator on two numeric values.
    pub fn compare(self, a: f64, b: f64) -> bool {
        match self {
            Operator::Eq => a == b,
            Operator::Ne => a != b,
            Operator::Gt => a > b,
            Operator::Ge => a >= b,
            Operator::Lt => a < b,
            Operator::Le => a <= b,
        }
    }

    /// The closed-form satisfaction rate this operator would have on two
    /// values drawn independently from the distribution described by
    /// `frequencies` — per-distinct-value counts ordered by ascending
    /// value, which is what [`Table::value_frequencies`] produces. The
    /// denominator counts all n² draws, the identical-row diagonal
    /// included, so these rates are estimates rather than the empirical
    /// pair probabilities the evidence matrix measures.
    ///
    /// ```
    /// use denial_constraints::Operator;
    ///
    /// // Two distinct values, two occurrences each.
    /// let frequencies = [2.0, 2.0];
    /// assert_eq!(Operator::Eq.expected_rate(&frequencies), 0.5);
    /// assert_eq!(Operator::Gt.expected_rate(&frequencies), 0.25);
    /// ```
    pub fn expected_rate(self, frequencies: &[f64]) -> f64 {
        let n: f64 = frequencies.iter().sum();
        if n == 0.0 {
            return 0.0;
        }
        let square_sum = frequencies.iter().map(|l| l * l).sum::<f64>();
        match self {
            Operator::Eq => square_sum / (n * n),
            Operator::Ne => 1.0 - square_sum / (n * n),
            Operator::Ge => ordered_rate(frequencies, n, |cum, _| cum),
            Operator::Gt => ordered_rate(frequencies, n, |cum, l| cum - l),
            Operator::Le => ordered_rate(frequencies, n, |cum, l| n - cum + l),
            Operator::Lt => ordered_rate(frequencies, n, |cum, _| n - cum),
        }
    }
}

/// Shared shape of the cumulative-frequency closed forms: each distinct
/// value contributes its count times some window of the cumulative
/// distribution on the other side of the comparison.
fn ordered_rate(frequencies: &[f64], n: f64, window: impl Fn(f64, f64) -> f64) -> f64 {
    let mut cum = 0.0;
    let mut acc = 0.0;
    for &l in frequencies {
        cum += l;
        acc += l * window(cum, l);
    }
    acc / (n * n)
}

/// A self-join predicate: the same column of two row variables, compared
/// with one operator. Reads as `t0.col θ t1.col`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Predicate {
    /// Index of the column in the table this predicate was built for.
    pub column: u16,
    /// The comparison applied between the two row variables.
    pub operator: Operator,
}

impl Predicate {
    /// Returns `true` if this predicate failing on a pair forces `other`
    /// to fail on it, which requires both to range over the same column.
    ///
    /// ```
    /// use denial_constraints::{Operator, Predicate};
    ///
    /// let ne = Predicate { column: 0, operator: Operator::Ne };
    /// let gt = Predicate { column: 0, operator: Operator::Gt };
    /// assert!(ne.implies(&gt));
    /// assert!(!gt.implies(&ne));
    /// ```
    pub fn implies(&self, other: &Predicate) -> bool {
        self.column == other.column
            && self
                .operator
                .negate()
                .implications()
                .contains(&other.operator.negate())
    }
}

/// A set of predicate ids in canonical (sorted, deduplicated) order.
///
/// Sets this size — never more than [`MAX_DEPTH`] entries inside the
/// search — live inline without heap allocation. The same representation
/// doubles as the memoization key of the pair-count cache.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PredicateSet(SmallVec<[u16; 8]>);

impl PredicateSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        PredicateSet(SmallVec::new())
    }

    /// Creates a set from the given ids; order and duplicates don't
    /// matter.
    ///
    /// ```
    /// use denial_constraints::PredicateSet;
    ///
    /// let set = PredicateSet::from_ids(&[3, 1, 3]);
    /// assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3]);
    /// ```
    pub fn from_ids(ids: &[u16]) -> Self {
        let mut v = SmallVec::from_slice(ids);
        v.sort_unstable();
        v.dedup();
        PredicateSet(v)
    }

    /// The number of predicates in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set holds no predicates.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `id` is a member.
    pub fn contains(&self, id: u16) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// An iterator over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + SortedByItem + Clone + '_ {
        self.0.iter().copied().assume_sorted_by_item()
    }

    /// A copy of this set with `id` added.
    ///
    /// ```
    /// use denial_constraints::PredicateSet;
    ///
    /// let set = PredicateSet::from_ids(&[5]);
    /// assert_eq!(set.with(2).iter().collect::<Vec<_>>(), vec![2, 5]);
    /// assert_eq!(set.with(5), set);
    /// ```
    pub fn with(&self, id: u16) -> Self {
        let mut v = self.0.clone();
        if let Err(insert_at) = v.binary_search(&id) {
            v.insert(insert_at, id);
        }
        PredicateSet(v)
    }

    /// Returns `true` if `other` contains every member of `self`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().intersection(other.iter()).eq(self.iter())
    }

    /// An iterator over every proper subset: the empty set included, the
    /// set itself excluded.
    ///
    /// ```
    /// use denial_constraints::PredicateSet;
    ///
    /// let set = PredicateSet::from_ids(&[1, 2]);
    /// let subsets: Vec<_> = set.proper_subsets().collect();
    /// assert_eq!(subsets.len(), 3);
    /// assert!(!subsets.contains(&set));
    /// ```
    pub fn proper_subsets(&self) -> impl Iterator<Item = PredicateSet> + '_ {
        debug_assert!(self.0.len() < 16);
        let full: u32 = (1 << self.0.len()) - 1;
        (0..full).map(move |mask| {
            self.0
                .iter()
                .enumerate()
                .filter(move |(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, id)| *id)
                .collect()
        })
    }
}

impl Default for PredicateSet {
    fn default() -> Self {
        PredicateSet::new()
    }
}

impl std::fmt::Debug for PredicateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl iter::FromIterator<u16> for PredicateSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut v = SmallVec::from_iter(iter);
        v.sort_unstable();
        v.dedup();
        PredicateSet(v)
    }
}

/// The predicates applicable to a table: `{==, <>}` per text column, all
/// six operators per numeric column, ids assigned column-major.
///
/// Columns with fewer than two distinct values among the sampled rows get
/// no predicates at all: their `==` is satisfied by every pair and their
/// `<>` by none, so no evidence could ever distinguish them from the
/// trivial constraint.
pub struct Catalog {
    predicates: Vec<Predicate>,
}

impl Catalog {
    /// Enumerates the predicates for `table`.
    pub fn build(table: &Table) -> Catalog {
        let mut predicates = Vec::new();
        for (index, column) in table.columns().iter().enumerate() {
            if table.position_list_index(index).len() < 2 {
                debug!(column = column.name(), "skipping degenerate column");
                continue;
            }
            let operators: &[Operator] = match column.column_type() {
                ColumnType::Text => &[Operator::Eq, Operator::Ne],
                ColumnType::Numeric => &Operator::ALL,
            };
            for &operator in operators {
                predicates.push(Predicate {
                    column: index as u16,
                    operator,
                });
            }
        }
        Catalog { predicates }
    }

    /// All predicates; a predicate's id is its index in this slice.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// The number of predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns `true` if no column yielded any predicate.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// The column a predicate ranges over; the searches use this to keep
    /// two predicates over one column out of the same candidate set.
    fn column_of(&self, id: u16) -> u16 {
        self.predicates[id as usize].column
    }
}

/// Per-predicate bit-vectors over all ordered row pairs.
///
/// For a table of `n` rows each vector holds `n·(n−1)` meaningful bits,
/// one per ordered pair `(i, j)` with `i ≠ j`, laid out as: for each row
/// `i`, the pairs against rows `i+1..n`, then against rows `0..i`. Bits
/// pack least-significant-first, eight per byte. `n·(n−1)` need not be a
/// multiple of eight; the spare high bits of the final byte stay zero so
/// population counts never pick up garbage.
pub struct EvidenceSet {
    pair_count: usize,
    byte_len: usize,
    vectors: Vec<Box<[u8]>>,
    probabilities: Vec<f64>,
    by_probability: Vec<u16>,
}

impl EvidenceSet {
    /// Materializes the evidence vector of every predicate in `catalog`.
    ///
    /// Vectors are independent of each other, so a pool of scoped worker
    /// threads fills them one chunk of predicates per core.
    ///
    /// # Panics
    ///
    /// Panics if `table` has fewer than two rows; [`discover`] rejects
    /// such tables with [`DiscoveryError::EmptyOrSingletonTable`] before
    /// reaching this point.
    pub fn build(table: &Table, catalog: &Catalog) -> EvidenceSet {
        let n = table.rows();
        assert!(n >= 2, "pairwise evidence needs at least 2 rows, got {}", n);
        let pair_count = n * (n - 1);
        let byte_len = (pair_count + 7) / 8;
        let mut vectors: Vec<Box<[u8]>> = catalog
            .predicates()
            .iter()
            .map(|_| vec![0u8; byte_len].into_boxed_slice())
            .collect();

        if !vectors.is_empty() {
            let workers = thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1)
                .min(vectors.len());
            let chunk = (vectors.len() + workers - 1) / workers;
            thread::scope(|scope| {
                for (predicates, out) in catalog
                    .predicates()
                    .chunks(chunk)
                    .zip(vectors.chunks_mut(chunk))
                {
                    scope.spawn(move || {
                        for (predicate, bits) in predicates.iter().zip(out.iter_mut()) {
                            fill_vector(table, predicate, bits);
                        }
                    });
                }
            });
        }

        let probabilities: Vec<f64> = vectors
            .iter()
            .map(|bits| popcount(bits) as f64 / pair_count as f64)
            .collect();

        // Lower-probability predicates are more discriminating, so both
        // search passes explore them first. Ties break by id to keep runs
        // deterministic.
        let mut by_probability: Vec<u16> = (0..catalog.len()).map(|id| id as u16).collect();
        by_probability.sort_unstable_by(|a, b| {
            probabilities[*a as usize]
                .total_cmp(&probabilities[*b as usize])
                .then(a.cmp(b))
        });

        debug!(
            predicates = catalog.len(),
            bytes = byte_len * catalog.len(),
            "evidence matrix built"
        );
        EvidenceSet {
            pair_count,
            byte_len,
            vectors,
            probabilities,
            by_probability,
        }
    }

    /// The number of meaningful bits in each vector: `n·(n−1)`.
    pub fn pair_count(&self) -> usize {
        self.pair_count
    }

    /// The packed evidence bits of one predicate.
    pub fn vector(&self, id: u16) -> &[u8] {
        &self.vectors[id as usize]
    }

    /// The fraction of ordered row pairs satisfying one predicate.
    pub fn probability(&self, id: u16) -> f64 {
        self.probabilities[id as usize]
    }

    /// All predicate ids, ascending by empirical satisfaction probability.
    pub fn by_probability(&self) -> &[u16] {
        &self.by_probability
    }

    /// The all-pairs vector the searches start from: every meaningful bit
    /// set, every spare bit clear.
    pub fn universe(&self) -> Vec<u8> {
        let mut bits = vec![0xFF_u8; self.byte_len];
        let spare = self.byte_len * 8 - self.pair_count;
        if spare > 0 {
            if let Some(last) = bits.last_mut() {
                *last >>= spare;
            }
        }
        bits
    }
}

fn fill_vector(table: &Table, predicate: &Predicate, bits: &mut [u8]) {
    let column = table.column(predicate.column as usize);
    let n = table.rows();
    let mut bit = 0;
    for i in 0..n {
        for j in (i + 1..n).chain(0..i) {
            if column.satisfies(predicate.operator, i, j) {
                bits[bit >> 3] |= 1 << (bit & 7);
            }
            bit += 1;
        }
    }
}

fn popcount(bits: &[u8]) -> u64 {
    bits.iter().map(|byte| u64::from(byte.count_ones())).sum()
}

fn intersect(x: &[u8], y: &[u8]) -> Vec<u8> {
    x.iter().zip(y).map(|(a, b)| a & b).collect()
}

/// `ψ(1)`: the negated Euler–Mascheroni constant, to the precision the
/// recurrence is seeded with.
const DIGAMMA_ONE: f64 = -0.5772156649;

/// Memoized digamma (`ψ`) and trigamma (`ψ′`) sequences at integer
/// arguments, which give the mean and standard deviation of the
/// log-odds-ratio estimator behind the significance test.
///
/// Both sequences extend lazily: `ψ(n) = ψ(n−1) + 1/(n−1)` from
/// `ψ(1) = −0.5772156649`, and `ψ′(n) = ψ′(n−1) − 1/(n−1)²` from
/// `ψ′(1) = π²/6`.
///
/// ```
/// use denial_constraints::LogOddsTables;
///
/// let mut psi = LogOddsTables::new();
/// assert_eq!(psi.digamma(1), -0.5772156649);
/// assert!((psi.digamma(2) - 0.4227843351).abs() < 1e-9);
/// assert!((psi.trigamma(1) - std::f64::consts::PI.powi(2) / 6.0).abs() < 1e-12);
/// ```
pub struct LogOddsTables {
    digamma: Vec<f64>,
    trigamma: Vec<f64>,
}

impl LogOddsTables {
    /// Creates the tables with only `ψ(1)` and `ψ′(1)` populated.
    pub fn new() -> Self {
        LogOddsTables {
            digamma: vec![DIGAMMA_ONE],
            trigamma: vec![PI * PI / 6.0],
        }
    }

    /// `ψ(n)` for `n ≥ 1`, extending the table as needed.
    pub fn digamma(&mut self, n: u64) -> f64 {
        debug_assert!(n >= 1);
        let n = n as usize;
        while self.digamma.len() < n {
            let k = self.digamma.len();
            let next = self.digamma[k - 1] + 1.0 / k as f64;
            self.digamma.push(next);
        }
        self.digamma[n - 1]
    }

    /// `ψ′(n)` for `n ≥ 1`, extending the table as needed.
    pub fn trigamma(&mut self, n: u64) -> f64 {
        debug_assert!(n >= 1);
        let n = n as usize;
        while self.trigamma.len() < n {
            let k = self.trigamma.len();
            let next = self.trigamma[k - 1] - 1.0 / (k as f64 * k as f64);
            self.trigamma.push(next);
        }
        self.trigamma[n - 1]
    }

    /// Mean of the log odds ratio between a Bernoulli sample with `a1`
    /// successes and `b1` failures and one with `a2` successes and `b2`
    /// failures, under unit-pseudocount posteriors.
    pub fn mean(&mut self, a1: u64, b1: u64, a2: u64, b2: u64) -> f64 {
        self.digamma(a1 + 1) - self.digamma(b1 + 1) - self.digamma(a2 + 1) + self.digamma(b2 + 1)
    }

    /// Standard deviation of the same estimator.
    pub fn deviation(&mut self, a1: u64, b1: u64, a2: u64, b2: u64) -> f64 {
        (self.trigamma(a1 + 1)
            + self.trigamma(b1 + 1)
            + self.trigamma(a2 + 1)
            + self.trigamma(b2 + 1))
        .sqrt()
    }
}

impl Default for LogOddsTables {
    fn default() -> Self {
        LogOddsTables::new()
    }
}

/// State shared by the two DFS passes of one discovery call. Nothing in
/// here survives the call.
struct Search<'a> {
    catalog: &'a Catalog,
    evidence: &'a EvidenceSet,
    depth: usize,
    /// How many row pairs satisfy each predicate set, populated exactly
    /// once per set by the counting pass.
    counts: HashMap<PredicateSet, u64>,
    /// The constraint pass prunes differently than the counting pass, so
    /// it keeps its own visited set.
    visited: HashSet<PredicateSet>,
    stats: LogOddsTables,
    results: Vec<PredicateSet>,
}

impl<'a> Search<'a> {
    fn new(catalog: &'a Catalog, evidence: &'a EvidenceSet, depth: usize) -> Self {
        Search {
            catalog,
            evidence,
            depth,
            counts: HashMap::new(),
            visited: HashSet::new(),
            stats: LogOddsTables::new(),
            results: Vec::new(),
        }
    }

    fn count_candidates(&mut self) {
        let universe = self.evidence.universe();
        self.count_rec(PredicateSet::new(), PredicateSet::new(), universe);
    }

    fn count_rec(&mut self, predicates: PredicateSet, columns: PredicateSet, pairs: Vec<u8>) {
        self.counts.insert(predicates.clone(), popcount(&pairs));
        if predicates.len() >= self.depth {
            return;
        }
        let catalog = self.catalog;
        let evidence = self.evidence;
        for &p in evidence.by_probability() {
            let column = catalog.column_of(p);
            if columns.contains(column) {
                continue;
            }
            let extended = predicates.with(p);
            if self.counts.contains_key(&extended) {
                continue;
            }
            let filtered = intersect(&pairs, evidence.vector(p));
            self.count_rec(extended, columns.with(column), filtered);
        }
    }

    fn run(&mut self) {
        self.search_rec(PredicateSet::new(), PredicateSet::new());
    }

    fn search_rec(&mut self, predicates: PredicateSet, columns: PredicateSet) {
        if !self.visited.insert(predicates.clone()) {
            return;
        }
        if predicates.len() >= self.depth {
            return;
        }
        let catalog = self.catalog;
        let evidence = self.evidence;
        for &p in evidence.by_probability() {
            let column = catalog.column_of(p);
            if columns.contains(column) {
                continue;
            }
            let extended = predicates.with(p);
            // Successes and failures of p among the pairs satisfying the
            // current conjunction.
            let a1 = self.counts[&extended];
            let b1 = self.counts[&predicates] - a1;

            // The extension is justified only if P(p | predicates) sits
            // significantly below P(p | T) for every weaker context T.
            let mut justified = true;
            for context in predicates.proper_subsets() {
                let a2 = self.counts[&context.with(p)];
                let b2 = self.counts[&context] - a2;
                let u = self.stats.mean(a1, b1, a2, b2);
                let s = self.stats.deviation(a1, b1, a2, b2);
                if u + 2.0 * s > 0.0 {
                    justified = false;
                    break;
                }
            }
            if !justified {
                continue;
            }

            if a1 == 0 {
                // No pair satisfies the extended conjunction: an exact
                // denial constraint, maximal for this branch.
                self.results.push(extended);
            } else {
                self.search_rec(extended, columns.with(column));
            }
        }
    }
}

/// A discovered denial constraint: a conjunction of predicates no pair of
/// rows may jointly satisfy. Two constraints are equal exactly when their
/// predicate sets are equal.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DenialConstraint {
    predicates: Vec<Predicate>,
}

impl DenialConstraint {
    /// Creates a constraint over the given predicates, stored in canonical
    /// (sorted, deduplicated) order.
    pub fn new(mut predicates: Vec<Predicate>) -> Self {
        predicates.sort_unstable();
        predicates.dedup();
        DenialConstraint { predicates }
    }

    /// The predicates of the conjunction, sorted by column then operator.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Returns `true` if any pair violating this constraint also violates
    /// `other`: every predicate of `self` [implies](Predicate::implies)
    /// some predicate of `other`.
    pub fn implies(&self, other: &DenialConstraint) -> bool {
        self.predicates
            .iter()
            .all(|p| other.predicates.iter().any(|q| p.implies(q)))
    }

    /// The canonical textual form, `¬(t0.colA θ t1.colA ∧ …)`, with column
    /// names taken from the table the constraint was discovered on.
    pub fn canonical(&self, table: &Table) -> String {
        let mut text = String::from("¬(");
        for (k, predicate) in self.predicates.iter().enumerate() {
            if k > 0 {
                text.push_str(" ∧ ");
            }
            let name = table.column(predicate.column as usize).name();
            text.push_str("t0.");
            text.push_str(name);
            text.push(' ');
            text.push_str(predicate.operator.symbol());
            text.push_str(" t1.");
            text.push_str(name);
        }
        text.push(')');
        text
    }
}

/// Removes every constraint implied by another surviving constraint. On
/// mutual implication the lowest index survives, so equivalent constraints
/// are never both eliminated.
pub fn reduce(constraints: &[DenialConstraint]) -> Vec<DenialConstraint> {
    let mut keep = vec![true; constraints.len()];
    for (i, a) in constraints.iter().enumerate() {
        for (j, b) in constraints.iter().enumerate() {
            if a.implies(b) {
                if b.implies(a) {
                    keep[j] = keep[j] && j <= i;
                } else {
                    keep[j] = false;
                }
            }
        }
    }
    constraints
        .iter()
        .zip(keep)
        .filter_map(|(constraint, kept)| kept.then(|| constraint.clone()))
        .collect()
}

fn assemble(catalog: &Catalog, results: Vec<PredicateSet>) -> Vec<DenialConstraint> {
    let mut seen = HashSet::new();
    let mut constraints = Vec::new();
    for set in results {
        if seen.insert(set.clone()) {
            constraints.push(DenialConstraint::new(
                set.iter()
                    .map(|id| catalog.predicates()[id as usize])
                    .collect(),
            ));
        }
    }
    constraints
}

fn check_budget(table: &Table, catalog: &Catalog, depth: usize) -> Result<(), DiscoveryError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(DiscoveryError::DepthOrSampleTooLarge(format!(
            "depth {} outside the supported range 1..={}",
            depth, MAX_DEPTH
        )));
    }
    let rows = table.rows();
    if rows < 2 {
        return Err(DiscoveryError::EmptyOrSingletonTable(rows));
    }
    if rows > MAX_SAMPLE_ROWS {
        return Err(DiscoveryError::DepthOrSampleTooLarge(format!(
            "{} rows exceed the {} row sample budget",
            rows, MAX_SAMPLE_ROWS
        )));
    }
    if catalog.len() > usize::from(u16::MAX) {
        return Err(DiscoveryError::DepthOrSampleTooLarge(format!(
            "{} predicates exceed the catalog budget",
            catalog.len()
        )));
    }
    let pair_bytes = (rows * (rows - 1) + 7) / 8;
    if catalog.len() * pair_bytes > MAX_EVIDENCE_BYTES {
        return Err(DiscoveryError::DepthOrSampleTooLarge(format!(
            "evidence matrix would need {} bytes, budget is {}",
            catalog.len() * pair_bytes,
            MAX_EVIDENCE_BYTES
        )));
    }
    Ok(())
}

/// Discovers the denial constraints of `table`, combining at most `depth`
/// predicates per constraint.
pub fn discover(table: &Table, depth: usize) -> Result<Vec<DenialConstraint>, DiscoveryError> {
    let catalog = Catalog::build(table);
    check_budget(table, &catalog, depth)?;
    info!(
        rows = table.rows(),
        columns = table.columns().len(),
        predicates = catalog.len(),
        depth,
        "starting discovery"
    );

    let evidence = EvidenceSet::build(table, &catalog);
    let mut search = Search::new(&catalog, &evidence, depth);
    search.count_candidates();
    debug!(candidate_sets = search.counts.len(), "counting pass done");
    search.run();

    let constraints = assemble(&catalog, std::mem::take(&mut search.results));
    info!(constraints = constraints.len(), "discovery complete");
    Ok(constraints)
}

/// Discovers unique-column constraints: the subset of denial constraints
/// built from equality predicates only, each reading as "two distinct rows
/// cannot agree on all of these columns" — a composite unique key.
pub fn discover_unique(
    table: &Table,
    depth: usize,
) -> Result<Vec<DenialConstraint>, DiscoveryError> {
    let mut constraints = discover(table, depth)?;
    constraints.retain(|constraint| {
        constraint
            .predicates()
            .iter()
            .all(|p| p.operator == Operator::Eq)
    });
    Ok(constraints)
}

/// Loads up to `row_limit` rows of the CSV table at `table_path` and
/// returns the canonical text of every discovered denial constraint,
/// sorted for stable output.
pub fn discover_denial_constraints<P: AsRef<Path>>(
    table_path: P,
    row_limit: usize,
    depth: usize,
) -> Result<Vec<String>, DiscoveryError> {
    let table = Table::from_csv_path(table_path, row_limit)?;
    let mut lines: Vec<String> = discover(&table, depth)?
        .iter()
        .map(|constraint| constraint.canonical(&table))
        .collect();
    lines.sort();
    Ok(lines)
}

/// Like [`discover_denial_constraints`], but keeps only the all-equality
/// constraints of the unique-key variant.
pub fn discover_unique_constraints<P: AsRef<Path>>(
    table_path: P,
    row_limit: usize,
    depth: usize,
) -> Result<Vec<String>, DiscoveryError> {
    let table = Table::from_csv_path(table_path, row_limit)?;
    let mut lines: Vec<String> = discover_unique(&table, depth)?
        .iter()
        .map(|constraint| constraint.canonical(&table))
        .collect();
    lines.sort();
    Ok(lines)
}
