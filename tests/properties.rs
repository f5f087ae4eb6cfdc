use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use sheet_reconcile::{
    data::Value,
    dedupe::dedupe,
    expand::{DEFAULT_SEPARATOR, EmptyPolicy, ExpansionSpec, expand},
    join::{JoinKind, JoinSpec, join},
    normalize::{KeyPolicy, join_key, normalize},
    sequence::SequenceCounter,
    table::Table,
};

fn policy() -> impl Strategy<Value = KeyPolicy> {
    prop_oneof![Just(KeyPolicy::Compact), Just(KeyPolicy::Collapse)]
}

proptest! {
    #[test]
    fn normalizing_twice_changes_nothing(
        raw in "[ A-Za-z0-9@._\t-]{0,24}",
        policy in policy()
    ) {
        let once = normalize(&raw, policy);
        prop_assert_eq!(normalize(&once, policy), once.clone());
        prop_assert_eq!(once.trim(), once.as_str());
    }

    #[test]
    fn left_join_keeps_every_left_row(
        left_keys in proptest::collection::vec("[abc]{1,2}", 0..8),
        right_keys in proptest::collection::vec("[ABC ]{1,3}", 0..8)
    ) {
        let left_rows = left_keys
            .iter()
            .enumerate()
            .map(|(idx, key)| vec![key.clone(), format!("L{idx}")])
            .collect::<Vec<_>>();
        let right_rows = right_keys
            .iter()
            .enumerate()
            .map(|(idx, key)| vec![key.clone(), format!("R{idx}")])
            .collect::<Vec<_>>();
        let left = Table::from_strings("left", &["key".to_string(), "left".to_string()], &left_rows)
            .expect("left table");
        let right =
            Table::from_strings("right", &["key".to_string(), "right".to_string()], &right_rows)
                .expect("right table");
        let joined = join(&left, &right, &JoinSpec::left("key", KeyPolicy::Compact))
            .expect("join");

        let mut matches: HashMap<String, usize> = HashMap::new();
        for key in &right_keys {
            if let Some(key) = join_key(&Value::from_cell(key), KeyPolicy::Compact) {
                *matches.entry(key.as_str().to_string()).or_default() += 1;
            }
        }
        let expected = left_keys
            .iter()
            .map(|key| {
                join_key(&Value::from_cell(key), KeyPolicy::Compact)
                    .and_then(|key| matches.get(key.as_str()).copied())
                    .unwrap_or(1)
            })
            .sum::<usize>();
        prop_assert_eq!(joined.len(), expected);

        let left_idx = joined.require_column("left").expect("left column");
        let seen = joined
            .rows()
            .iter()
            .map(|row| row[left_idx].as_display())
            .collect::<HashSet<_>>();
        prop_assert_eq!(seen.len(), left_keys.len());
    }

    #[test]
    fn expansion_yields_one_row_per_token(
        tokens in proptest::collection::vec("[A-Z]{1,3}-[0-9]{1,3}", 1..6)
    ) {
        let packed = tokens.join(", ");
        let table = Table::from_strings(
            "CC",
            &["trip_id".to_string(), "invoice".to_string()],
            &[vec!["T-1".to_string(), packed]],
        )
        .expect("table");
        let spec = ExpansionSpec::new("invoice", DEFAULT_SEPARATOR, EmptyPolicy::Keep)
            .expect("expansion");
        let expanded = expand(&table, &spec).expect("expand");
        prop_assert_eq!(expanded.len(), tokens.len());
        let values = expanded
            .rows()
            .iter()
            .map(|row| row[1].as_display())
            .collect::<Vec<_>>();
        prop_assert_eq!(values, tokens);
        prop_assert!(expanded.rows().iter().all(|row| row[0] == Value::text("T-1")));
    }

    #[test]
    fn dedupe_keeps_first_of_each_tuple(
        pairs in proptest::collection::vec((0u8..4, 0u8..3), 0..20)
    ) {
        let rows = pairs
            .iter()
            .enumerate()
            .map(|(idx, (a, b))| vec![format!("k{a}"), format!("v{b}"), idx.to_string()])
            .collect::<Vec<_>>();
        let table = Table::from_strings(
            "DB",
            &["a".to_string(), "b".to_string(), "row".to_string()],
            &rows,
        )
        .expect("table");
        let deduped = dedupe(&table, &["a".to_string(), "b".to_string()]).expect("dedupe");

        let mut first_seen = Vec::new();
        let mut seen = HashSet::new();
        for (idx, pair) in pairs.iter().enumerate() {
            if seen.insert(*pair) {
                first_seen.push(idx.to_string());
            }
        }
        let kept = deduped
            .rows()
            .iter()
            .map(|row| row[2].as_display())
            .collect::<Vec<_>>();
        prop_assert_eq!(kept, first_seen);
    }

    #[test]
    fn allocations_strictly_increase(start in 0u64..1_000_000, count in 1usize..40) {
        let mut counter = SequenceCounter::new("RE", start, 6);
        let mut issued = Vec::new();
        for _ in 0..count {
            let (identifier, advanced) = counter.next();
            issued.push(identifier);
            counter = advanced;
        }
        let numbers = issued
            .iter()
            .map(|id| id.trim_start_matches("RE-").parse::<u64>().expect("numeric suffix"))
            .collect::<Vec<_>>();
        prop_assert!(numbers.windows(2).all(|pair| pair[1] == pair[0] + 1));
        prop_assert_eq!(numbers[0], start);
        prop_assert_eq!(counter.next_value(), start + count as u64);
    }
}

#[test]
fn one_left_row_fans_out_to_every_match() {
    let left = Table::from_strings("CC", &["trip_id", "amount"], &[vec!["T-1", "10"]])
        .expect("left");
    let right = Table::from_strings(
        "SF",
        &["Trip ID", "agent"],
        &[vec!["t-1", "ann"], vec!["T 1", "nobody"], vec![" T-1", "bob"], vec!["T-1 ", "cy"]],
    )
    .expect("right");
    let spec = JoinSpec {
        left_key: "trip_id".into(),
        right_key: "Trip ID".into(),
        policy: KeyPolicy::Compact,
        kind: JoinKind::Inner,
        suffix: "_sf".into(),
    };
    let joined = join(&left, &right, &spec).expect("join");
    let agents = joined
        .rows()
        .iter()
        .map(|row| row[2].as_display())
        .collect::<Vec<_>>();
    assert_eq!(agents, vec!["ann", "bob", "cy"]);
    assert_eq!(joined.columns(), &["trip_id", "amount", "agent"]);
}
