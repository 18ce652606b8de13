use super::*;

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Checks every structural invariant of `t`, panicking on the first violation.
pub(crate) fn validate_tree<V>(t: &AvlTree<V>) {
    let nodes = t.nodes.borrow();
    if Rc::strong_count(&t.nodes) == 1 {
        assert_eq!(
            nodes.live(),
            t.count,
            "live slots of a private arena must match the entry count"
        );
    }

    let Some(root) = t.root else {
        assert_eq!(t.count, 0, "empty tree must have zero count");
        assert!(t.min.is_none() && t.max.is_none(), "empty tree caches no extrema");
        return;
    };
    assert_eq!(nodes.parent(root), None, "root must not have a parent");

    // (node, exclusive lower bound, exclusive upper bound)
    let mut stack: Vec<(NodeId, Option<i64>, Option<i64>)> = vec![(root, None, None)];
    let mut reachable = 0usize;
    while let Some((id, lo, hi)) = stack.pop() {
        reachable += 1;
        let n = nodes.node(id);
        if let Some(lo) = lo {
            assert!(n.key > lo, "key {} must be above {lo}", n.key);
        }
        if let Some(hi) = hi {
            assert!(n.key < hi, "key {} must be below {hi}", n.key);
        }

        let (hl, hr) = (nodes.height(n.left), nodes.height(n.right));
        assert_eq!(n.height, 1 + hl.max(hr), "stale height at key {}", n.key);
        assert!((hl - hr).abs() <= 1, "unbalanced at key {}", n.key);
        assert_eq!(
            n.size,
            nodes.size(n.left) + nodes.size(n.right) + 1,
            "stale size at key {}",
            n.key
        );

        for child in [n.left, n.right].into_iter().flatten() {
            assert_eq!(
                nodes.parent(child),
                Some(id),
                "parent link of a child of key {}",
                n.key
            );
        }
        if let Some(l) = n.left {
            stack.push((l, lo, Some(n.key)));
        }
        if let Some(r) = n.right {
            stack.push((r, Some(n.key), hi));
        }
    }

    assert_eq!(reachable, t.count, "reachable nodes must match the entry count");
    assert_eq!(nodes.size(Some(root)), t.count, "root size must match the entry count");
    assert_eq!(t.min, Some(nodes.leftmost(root)), "cached minimum");
    assert_eq!(t.max, Some(nodes.rightmost(root)), "cached maximum");

    let keys = t.keys_in_order();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys must be increasing");
    assert_eq!(keys.first().copied(), t.min_key());
    assert_eq!(keys.last().copied(), t.max_key());
}

/// Checks that `trees` are all the trees left in one arena and that the arena
/// holds nothing but their entries.
pub(crate) fn validate_shared_arena<V>(trees: &[&AvlTree<V>]) {
    let first = trees.first().expect("at least one tree");
    for t in trees {
        assert!(t.shares_arena(first), "trees must share one arena");
        validate_tree(t);
    }
    assert_eq!(Rc::strong_count(&first.nodes), trees.len());
    let entries: usize = trees.iter().map(|t| t.len()).sum();
    assert_eq!(first.nodes.borrow().live(), entries);
}

#[derive(Clone, Debug)]
enum Op {
    Insert(i64, u64),
    Delete(i64),
    Get(i64),
    /// Split at the key (when present) and join the halves back together.
    SplitJoin(i64),
    Compact,
}

fn key_strategy() -> impl Strategy<Value = i64> + Clone {
    // Narrow range so deletes, lookups and splits hit existing keys often.
    -64i64..64
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        50 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        25 => key.clone().prop_map(Op::Delete),
        15 => key.clone().prop_map(Op::Get),
        9 => key.clone().prop_map(Op::SplitJoin),
        1 => Just(Op::Compact),
    ];
    prop::collection::vec(op, 0..=500)
}

fn build(keys: &BTreeSet<i64>) -> AvlTree<u64> {
    let mut t = AvlTree::new();
    for &k in keys {
        t.insert(k, k.unsigned_abs()).unwrap();
    }
    t
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let mut t: AvlTree<u64> = AvlTree::new();
        let mut m: BTreeMap<i64, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let got = t.insert(key, value).map(|_| ());
                    if m.contains_key(&key) {
                        prop_assert_eq!(got, Err(AvlError::DuplicateKey(key)));
                    } else {
                        prop_assert_eq!(got, Ok(()));
                        m.insert(key, value);
                    }
                    prop_assert_eq!(t.get(key).map(|v| *v), m.get(&key).copied());
                }
                Op::Delete(key) => {
                    let got = t.delete(key).map(|_| ());
                    match m.remove(&key) {
                        Some(_) => {
                            prop_assert_eq!(got, Ok(()));
                        }
                        None => {
                            prop_assert_eq!(got, Err(AvlError::KeyNotFound(key)));
                        }
                    }
                    prop_assert_eq!(t.search(key).err(), Some(AvlError::KeyNotFound(key)));
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(key).map(|v| *v), m.get(&key).copied());
                }
                Op::SplitJoin(key) => match m.get(&key) {
                    Some(&value) => {
                        let (mut low, high) = t.split(key).unwrap();
                        validate_shared_arena(&[&t, &low, &high]);
                        let low_keys: Vec<i64> = m.range(..key).map(|(k, _)| *k).collect();
                        let high_keys: Vec<i64> = m.range(key + 1..).map(|(k, _)| *k).collect();
                        prop_assert_eq!(low.keys_in_order(), low_keys);
                        prop_assert_eq!(high.keys_in_order(), high_keys);
                        low.join(key, value, high);
                        t = low;
                    }
                    None => {
                        prop_assert!(t.split(key).is_err());
                    }
                },
                Op::Compact => {
                    t.compact();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: Vec<(i64, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(i64, u64)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_join_disjoint(
        low_keys in prop::collection::btree_set(-10_000i64..0, 0..300),
        high_keys in prop::collection::btree_set(1i64..10_000, 0..300),
        low_receives in any::<bool>(),
        same_arena in any::<bool>(),
    ) {
        let low = build(&low_keys);
        let high = if same_arena {
            let mut high = AvlTree::new_in(&low);
            for &k in &high_keys {
                high.insert(k, k.unsigned_abs()).unwrap();
            }
            high
        } else {
            build(&high_keys)
        };
        let expected_cost = (low.height() - high.height()).unsigned_abs() as usize + 1;

        let (mut t, other) = if low_receives { (low, high) } else { (high, low) };
        let cost = t.join(0, 0, other);
        prop_assert_eq!(cost, expected_cost);
        validate_tree(&t);
        prop_assert_eq!(t.nodes.borrow().live(), t.len());

        let mut expected: Vec<i64> = low_keys.iter().copied().collect();
        expected.push(0);
        expected.extend(high_keys.iter().copied());
        prop_assert_eq!(t.keys_in_order(), expected);
    }

    #[test]
    fn prop_split_partitions(
        keys in prop::collection::btree_set(-1_000i64..1_000, 1..400),
        pick in any::<prop::sample::Index>(),
    ) {
        let all: Vec<i64> = keys.iter().copied().collect();
        let x = *pick.get(&all);
        let mut t = build(&keys);
        let height = t.height();

        let (low, high, stats) = t.split_with_stats(x).unwrap();
        prop_assert!(t.is_empty());
        validate_shared_arena(&[&t, &low, &high]);
        prop_assert!(stats.max_cost as i32 <= height + 2);

        let mut rebuilt = low.keys_in_order();
        prop_assert!(rebuilt.iter().all(|&k| k < x));
        prop_assert!(high.keys_in_order().iter().all(|&k| k > x));
        rebuilt.push(x);
        rebuilt.extend(high.keys_in_order());
        prop_assert_eq!(rebuilt, all);
    }
}

/// Calls `f` with every ordering of `items`, generated by Heap's algorithm.
fn for_each_ordering<T: Clone>(items: &[T], mut f: impl FnMut(&[T])) {
    let mut order = items.to_vec();
    let mut counters = vec![0usize; order.len()];
    f(&order);

    let mut i = 1;
    while i < order.len() {
        if counters[i] < i {
            let j = if i % 2 == 0 { 0 } else { counters[i] };
            order.swap(j, i);
            f(&order);
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<i64> = (1..=7).collect();

    let mut orderings = 0;
    for_each_ordering(&keys, |order| {
        orderings += 1;
        let mut t: AvlTree<u64> = AvlTree::new();
        for (i, &k) in order.iter().enumerate() {
            t.insert(k, i as u64).unwrap();
            validate_tree(&t);
        }
        assert_eq!(t.keys_in_order(), keys);
        assert!(t.height() <= 3);
    });
    assert_eq!(orderings, 5040);
}

#[test]
fn exhaustive_delete_order_small_set() {
    let keys: Vec<i64> = (1..=7).collect();

    // Insert in a fixed order, then delete in all permutations.
    let mut base: AvlTree<u64> = AvlTree::new();
    for &k in &keys {
        base.insert(k, k as u64).unwrap();
    }

    for_each_ordering(&keys, |order| {
        let mut t = base.clone();
        let mut remaining: BTreeSet<i64> = keys.iter().copied().collect();
        for &k in order {
            t.delete(k).unwrap();
            remaining.remove(&k);
            validate_tree(&t);
            assert_eq!(t.keys_in_order(), remaining.iter().copied().collect::<Vec<_>>());
        }
        assert!(t.is_empty());
        assert!(t.root.is_none());
    });
}

#[test]
fn exhaustive_split_every_key_of_every_shape() {
    let keys: Vec<i64> = (1..=6).collect();

    for_each_ordering(&keys, |order| {
        let mut base: AvlTree<u64> = AvlTree::new();
        for &k in order {
            base.insert(k, k as u64).unwrap();
        }
        for &x in &keys {
            let mut t = base.clone();
            let (low, high) = t.split(x).unwrap();
            validate_shared_arena(&[&t, &low, &high]);
            assert_eq!(low.keys_in_order(), (1..x).collect::<Vec<_>>());
            assert_eq!(high.keys_in_order(), (x + 1..=6).collect::<Vec<_>>());
        }
    });
}
