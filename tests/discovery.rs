use denial_constraints::{
    discover, discover_unique, discover_unique_constraints, reduce, Catalog, DenialConstraint,
    DiscoveryError, EvidenceSet, Operator, Predicate, Table,
};
use std::io::Write;

fn table(csv: &str) -> Table {
    Table::from_csv_reader(csv.as_bytes(), 2048).unwrap()
}

/// A k×k grid over two text columns: every combination of `a0..ak` and
/// `b0..bk` appears exactly once. Neither column alone determines a row,
/// but the pair does.
fn grid_csv(k: usize) -> String {
    let mut csv = String::from("A(String),B(String)\n");
    for i in 0..k {
        for j in 0..k {
            csv.push_str(&format!("a{},b{}\n", i, j));
        }
    }
    csv
}

fn canonical(table: &Table, constraints: &[DenialConstraint]) -> Vec<String> {
    let mut lines: Vec<String> = constraints.iter().map(|c| c.canonical(table)).collect();
    lines.sort();
    lines
}

#[test]
fn composite_key_emerges_from_a_grid() {
    let t = table(&grid_csv(4));
    let constraints = discover_unique(&t, 2).unwrap();
    assert_eq!(
        canonical(&t, &constraints),
        vec!["¬(t0.A == t1.A ∧ t0.B == t1.B)"]
    );
}

#[test]
fn grid_discovery_finds_nothing_but_the_key() {
    // Every non-equality combination either holds for some pair or fails
    // the significance screen, so the full denial search agrees with the
    // unique-key variant here.
    let t = table(&grid_csv(4));
    let constraints = discover(&t, 2).unwrap();
    assert_eq!(
        canonical(&t, &constraints),
        vec!["¬(t0.A == t1.A ∧ t0.B == t1.B)"]
    );
}

#[test]
fn tiny_samples_are_screened_out() {
    // The same grid shape at 2×2 scale: four rows give too little evidence
    // for the log-odds screen, so nothing is reported even though the pair
    // of columns is a key of these four rows.
    let t = table("A(String),B(String)\nx,p\nx,q\ny,p\ny,q\n");
    let constraints = discover(&t, 2).unwrap();
    assert!(constraints.is_empty());
}

#[test]
fn constant_columns_never_appear() {
    let mut csv = String::from("A(String),B(String),Fixed(String),Zero(int)\n");
    for i in 0..4 {
        for j in 0..4 {
            csv.push_str(&format!("a{},b{},same,0\n", i, j));
        }
    }
    let t = table(&csv);
    let constraints = discover(&t, 2).unwrap();
    let lines = canonical(&t, &constraints);
    assert_eq!(lines, vec!["¬(t0.A == t1.A ∧ t0.B == t1.B)"]);
    assert!(lines.iter().all(|line| !line.contains("Fixed")));
    assert!(lines.iter().all(|line| !line.contains("Zero")));
}

#[test]
fn unique_numeric_column_is_a_singleton_key() {
    let mut csv = String::from("A(String),B(String),N(int)\n");
    for i in 0..4 {
        for j in 0..4 {
            csv.push_str(&format!("a{},b{},{}\n", i, j, i * 4 + j));
        }
    }
    let t = table(&csv);
    let constraints = discover_unique(&t, 2).unwrap();
    assert_eq!(
        canonical(&t, &constraints),
        vec![
            "¬(t0.A == t1.A ∧ t0.B == t1.B)",
            "¬(t0.N == t1.N)",
        ]
    );
}

#[test]
fn unique_variant_reports_equalities_only() {
    let mut csv = String::from("A(String),N(int)\n");
    for i in 0..20 {
        csv.push_str(&format!("a{},{}\n", i % 4, i));
    }
    let t = table(&csv);
    for constraint in discover_unique(&t, 3).unwrap() {
        assert!(constraint
            .predicates()
            .iter()
            .all(|p| p.operator == Operator::Eq));
    }
}

#[test]
fn discovery_is_deterministic() {
    let mut csv = String::from("A(String),B(String),N(int)\n");
    for i in 0..5 {
        for j in 0..5 {
            csv.push_str(&format!("a{},b{},{}\n", i, j, (i * 5 + j) % 7));
        }
    }
    let t = table(&csv);
    let first = canonical(&t, &discover(&t, 3).unwrap());
    let second = canonical(&t, &discover(&t, 3).unwrap());
    assert_eq!(first, second);
}

#[test]
fn constraints_respect_depth_and_column_disjointness() {
    let mut csv = String::from("A(String),B(String),N(int)\n");
    for i in 0..5 {
        for j in 0..5 {
            csv.push_str(&format!("a{},b{},{}\n", i, j, i * 5 + j));
        }
    }
    let t = table(&csv);
    for constraint in discover(&t, 3).unwrap() {
        assert!(constraint.predicates().len() <= 3);
        let mut columns: Vec<u16> = constraint.predicates().iter().map(|p| p.column).collect();
        columns.dedup();
        assert_eq!(columns.len(), constraint.predicates().len());
    }
}

#[test]
fn evidence_probabilities_match_brute_force() {
    let t = table("A(String),N(Double)\nx,1.5\ny,2.5\nx,2.5\nz,1.5\ny,9.0\n");
    let catalog = Catalog::build(&t);
    let evidence = EvidenceSet::build(&t, &catalog);
    let n = t.rows();
    assert_eq!(evidence.pair_count(), n * (n - 1));

    for (id, predicate) in catalog.predicates().iter().enumerate() {
        let column = predicate.column as usize;
        let mut satisfied = 0;
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let holds = match t.number(column, i) {
                    Some(a) => predicate.operator.compare(a, t.number(column, j).unwrap()),
                    None => {
                        let equal = t.text(column, i) == t.text(column, j);
                        match predicate.operator {
                            Operator::Eq => equal,
                            Operator::Ne => !equal,
                            other => panic!("{:?} on a text column", other),
                        }
                    }
                };
                if holds {
                    satisfied += 1;
                }
            }
        }
        let expected = satisfied as f64 / evidence.pair_count() as f64;
        assert_eq!(evidence.probability(id as u16), expected, "{:?}", predicate);
    }
}

#[test]
fn expected_rate_consumes_value_frequencies() {
    let t = table("N(int)\n1\n1\n2\n3\n3\n3\n");
    let frequencies = t.value_frequencies(0);
    assert_eq!(frequencies, vec![2.0, 1.0, 3.0]);
    // Σl²/n² with the diagonal included.
    let eq = Operator::Eq.expected_rate(&frequencies);
    assert!((eq - 14.0 / 36.0).abs() < 1e-12);
    assert!((Operator::Ne.expected_rate(&frequencies) - 22.0 / 36.0).abs() < 1e-12);
}

#[test]
fn reduction_drops_implied_constraints() {
    let ne = DenialConstraint::new(vec![Predicate {
        column: 0,
        operator: Operator::Ne,
    }]);
    let gt = DenialConstraint::new(vec![Predicate {
        column: 0,
        operator: Operator::Gt,
    }]);
    // ¬(t0.c <> t1.c) failing on a pair means the values differ, which
    // also breaks ¬(t0.c > t1.c) whenever that one fails; the narrower
    // rule is redundant in either input order.
    assert_eq!(reduce(&[ne.clone(), gt.clone()]), vec![ne.clone()]);
    assert_eq!(reduce(&[gt, ne.clone()]), vec![ne]);
}

#[test]
fn reduction_keeps_one_of_an_equivalent_pair() {
    let a = DenialConstraint::new(vec![Predicate {
        column: 2,
        operator: Operator::Eq,
    }]);
    let reduced = reduce(&[a.clone(), a.clone(), a.clone()]);
    assert_eq!(reduced, vec![a]);
}

#[test]
fn reduction_keeps_unrelated_constraints() {
    let a = DenialConstraint::new(vec![Predicate {
        column: 0,
        operator: Operator::Eq,
    }]);
    let b = DenialConstraint::new(vec![Predicate {
        column: 1,
        operator: Operator::Eq,
    }]);
    assert_eq!(reduce(&[a.clone(), b.clone()]), vec![a, b]);
}

#[test]
fn composite_key_does_not_imply_its_parts() {
    let key = DenialConstraint::new(vec![
        Predicate {
            column: 0,
            operator: Operator::Eq,
        },
        Predicate {
            column: 1,
            operator: Operator::Eq,
        },
    ]);
    let part = DenialConstraint::new(vec![Predicate {
        column: 0,
        operator: Operator::Eq,
    }]);
    // The single-column rule is the stronger one: whenever it fails the
    // composite fails too, not the other way around.
    assert!(part.implies(&key));
    assert!(!key.implies(&part));
    assert_eq!(reduce(&[key, part.clone()]), vec![part]);
}

#[test]
fn file_entry_point_reports_sorted_canonical_text() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", grid_csv(4)).unwrap();
    let lines = discover_unique_constraints(file.path(), 2048, 2).unwrap();
    assert_eq!(lines, vec!["¬(t0.A == t1.A ∧ t0.B == t1.B)"]);
}

#[test]
fn depth_bounds_are_enforced() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", grid_csv(4)).unwrap();
    for depth in [0, 7] {
        let err = discover_unique_constraints(file.path(), 2048, depth).unwrap_err();
        assert!(matches!(err, DiscoveryError::DepthOrSampleTooLarge(_)));
    }
}

#[test]
fn row_budget_is_enforced() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", grid_csv(4)).unwrap();
    let err = discover_unique_constraints(file.path(), 8193, 2).unwrap_err();
    assert!(matches!(err, DiscoveryError::DepthOrSampleTooLarge(_)));
}

#[test]
fn singleton_table_is_rejected() {
    let t = table("A(String),B(String)\nonly,row\n");
    let err = discover(&t, 2).unwrap_err();
    assert!(matches!(err, DiscoveryError::EmptyOrSingletonTable(1)));
}

#[test]
fn headerless_empty_input_is_rejected() {
    let err = Table::from_csv_reader(&b""[..], 2048).unwrap_err();
    assert!(matches!(err, DiscoveryError::UnsupportedFormat(_)));
}

#[test]
fn digamma_recurrence_tracks_the_reference_implementation() {
    use denial_constraints::LogOddsTables;

    let mut psi = LogOddsTables::new();
    for n in [1u64, 2, 10, 50, 200] {
        let reference = statrs::function::gamma::digamma(n as f64);
        assert!(
            (psi.digamma(n) - reference).abs() < 1e-8,
            "ψ({}) drifted from the reference",
            n
        );
    }
}
