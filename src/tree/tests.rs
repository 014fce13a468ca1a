use super::prelude::*;
use rand::{seq::SliceRandom, Rng};
use std::collections::BTreeMap;
use std::io::Cursor;

type TestTree = BplusTreeLong<String, Cursor<Vec<u8>>>;

fn compare(a: &String, b: &String) -> Ordering {
    a.cmp(b)
}

fn new_tree(node_size: usize, max_key_length: usize) -> TestTree {
    BplusTreeLong::initialize_in_stream(
        Cursor::new(Vec::new()),
        0,
        max_key_length,
        node_size,
        127,
        compare,
    )
    .unwrap()
}

fn reopen(tree: TestTree) -> TestTree {
    BplusTreeLong::setup_from_existing_stream(tree.into_inner(), 0, compare).unwrap()
}

fn random_keys(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let mut keys = HashSet::new();
    while keys.len() < count {
        keys.insert(hex::encode(rng.gen::<[u8; 8]>()));
    }
    keys.into_iter().collect()
}

fn collect_keys(tree: &mut TestTree) -> Vec<String> {
    let mut keys = Vec::new();
    let mut current = tree.first_key().unwrap();
    while let Some(key) = current {
        current = tree.next_key(&key).unwrap();
        keys.push(key);
    }
    keys
}

fn check_contents(tree: &mut TestTree, expected: &BTreeMap<String, u64>) {
    let keys = collect_keys(tree);
    assert_eq!(keys, expected.keys().cloned().collect::<Vec<_>>());
    for (key, value) in expected {
        assert_eq!(tree.get(key).unwrap(), *value, "value of {}", key);
    }
    tree.sanity_check(true).unwrap();
}

#[test]
fn three_keys_in_small_nodes() {
    let mut tree = new_tree(2, 10);
    for (value, key) in ["a", "b", "c"].iter().enumerate() {
        tree.set(key.to_string(), value as u64 + 1).unwrap();
    }
    assert!(!tree.nodes[tree.root.unwrap()].is_leaf);
    assert_eq!(tree.first_key().unwrap(), Some("a".to_string()));
    assert_eq!(tree.next_key(&"a".to_string()).unwrap(), Some("b".to_string()));
    assert_eq!(tree.next_key(&"c".to_string()).unwrap(), None);
    tree.commit().unwrap();
    let mut tree = reopen(tree);
    assert_eq!(tree.get(&"a".to_string()).unwrap(), 1);
    assert_eq!(tree.get(&"b".to_string()).unwrap(), 2);
    assert_eq!(tree.get(&"c".to_string()).unwrap(), 3);
    tree.sanity_check(true).unwrap();
}

#[test]
fn empty_tree() {
    let mut tree = new_tree(4, 8);
    assert_eq!(tree.first_key().unwrap(), None);
    assert_eq!(tree.next_key(&"a".to_string()).unwrap(), None);
    assert_eq!(tree.try_get(&"a".to_string()).unwrap(), None);
    let err = tree.remove_key(&"a".to_string()).unwrap_err();
    assert!(Error::is_key_missing(&err));
    tree.commit().unwrap();
    let mut tree = reopen(tree);
    assert_eq!(tree.first_key().unwrap(), None);
    tree.sanity_check(true).unwrap();
}

#[test]
fn ordered_iteration_over_random_keys() {
    let mut tree = new_tree(8, 16);
    let keys = random_keys(1000);
    let mut expected = BTreeMap::new();
    for (value, key) in keys.iter().enumerate() {
        tree.set(key.clone(), value as u64).unwrap();
        expected.insert(key.clone(), value as u64);
    }
    check_contents(&mut tree, &expected);
    tree.commit().unwrap();
    let mut tree = reopen(tree);
    check_contents(&mut tree, &expected);
}

#[test]
fn next_key_between_stored_keys() {
    let mut tree = new_tree(3, 8);
    for key in ["b", "d", "f", "h", "j", "l"] {
        tree.set(key.to_string(), 0).unwrap();
    }
    assert_eq!(tree.next_key(&"a".to_string()).unwrap(), Some("b".to_string()));
    assert_eq!(tree.next_key(&"e".to_string()).unwrap(), Some("f".to_string()));
    assert_eq!(tree.next_key(&"f".to_string()).unwrap(), Some("h".to_string()));
    assert_eq!(tree.next_key(&"l".to_string()).unwrap(), None);
}

#[test]
fn set_replaces_existing_value() {
    let mut tree = new_tree(4, 8);
    for i in 0..20 {
        tree.set(format!("k{:02}", i), i).unwrap();
    }
    tree.set("k07".to_string(), 700).unwrap();
    assert_eq!(tree.get(&"k07".to_string()).unwrap(), 700);
    assert_eq!(collect_keys(&mut tree).len(), 20);
    assert!(tree.update_key(&"k08".to_string(), 800).unwrap());
    assert!(!tree.update_key(&"k99".to_string(), 1).unwrap());
    assert_eq!(tree.get(&"k08".to_string()).unwrap(), 800);
    assert!(!tree.contains_key(&"k99".to_string()).unwrap());
}

#[test]
fn deletes_keep_nodes_balanced() {
    for node_size in [2, 3, 4, 6, 7] {
        let mut tree = new_tree(node_size, 16);
        let keys = random_keys(300);
        let mut expected = BTreeMap::new();
        for (value, key) in keys.iter().enumerate() {
            tree.set(key.clone(), value as u64).unwrap();
            expected.insert(key.clone(), value as u64);
        }
        tree.commit().unwrap();
        let mut order = keys.clone();
        order.shuffle(&mut rand::thread_rng());
        for (i, key) in order.iter().enumerate() {
            tree.remove_key(key).unwrap();
            expected.remove(key);
            assert!(!tree.contains_key(key).unwrap());
            if i % 37 == 0 {
                check_contents(&mut tree, &expected);
            }
            if i % 50 == 0 {
                tree.commit().unwrap();
            }
        }
        check_contents(&mut tree, &expected);
        assert_eq!(tree.first_key().unwrap(), None);
        tree.commit().unwrap();
        let mut tree = reopen(tree);
        tree.sanity_check(true).unwrap();
    }
}

#[test]
fn removed_key_is_missing() {
    let mut tree = new_tree(4, 8);
    tree.set("gone".to_string(), 1).unwrap();
    tree.set("kept".to_string(), 2).unwrap();
    tree.remove_key(&"gone".to_string()).unwrap();
    assert!(!tree.contains_key(&"gone".to_string()).unwrap());
    let err = tree.get(&"gone".to_string()).unwrap_err();
    assert!(Error::is_key_missing(&err));
    let err = tree.remove_key(&"gone".to_string()).unwrap_err();
    assert!(Error::is_key_missing(&err));
    assert_eq!(tree.get(&"kept".to_string()).unwrap(), 2);
}

#[test]
fn abort_restores_committed_state() {
    let mut tree = new_tree(4, 16);
    let mut expected = BTreeMap::new();
    for i in 0..100 {
        tree.set(format!("key{:03}", i), i).unwrap();
        expected.insert(format!("key{:03}", i), i);
    }
    tree.commit().unwrap();
    for i in 0..50 {
        tree.remove_key(&format!("key{:03}", i * 2)).unwrap();
    }
    for i in 100..200 {
        tree.set(format!("key{:03}", i), i).unwrap();
    }
    tree.set("key001".to_string(), 1000).unwrap();
    tree.abort().unwrap();
    check_contents(&mut tree, &expected);
    let mut tree = reopen(tree);
    check_contents(&mut tree, &expected);
}

#[test]
fn space_is_reused_after_commit() {
    let mut tree = new_tree(4, 8);
    for i in 0..50 {
        tree.set(format!("k{:02}", i), i).unwrap();
    }
    tree.commit().unwrap();
    let extent = tree.buffers.next_buffer_number().unwrap();
    for round in 0..10 {
        for i in 0..50 {
            tree.set(format!("k{:02}", i), i + round).unwrap();
        }
        tree.commit().unwrap();
    }
    assert!(tree.buffers.next_buffer_number().unwrap() <= extent * 3);
    tree.sanity_check(true).unwrap();
}

#[test]
fn footprint_limit_evicts_terminal_nodes() {
    let mut tree = new_tree(4, 16);
    tree.set_footprint_limit(5).unwrap();
    let keys = random_keys(500);
    let mut expected = BTreeMap::new();
    for (value, key) in keys.iter().enumerate() {
        tree.set(key.clone(), value as u64).unwrap();
        expected.insert(key.clone(), value as u64);
        assert!(tree.terminals.len() <= 5);
    }
    check_contents(&mut tree, &expected);
    tree.commit().unwrap();
    assert!(tree.loaded_nodes() < 100);
    let err = tree.set_footprint_limit(4).unwrap_err();
    assert_eq!(Error::kind_of(&err), Some(&Kind::WrongConfig));
}

#[test]
fn long_keys_are_rejected() {
    let mut tree = new_tree(4, 5);
    tree.set("12345".to_string(), 1).unwrap();
    let err = tree.set("123456".to_string(), 2).unwrap_err();
    assert_eq!(Error::kind_of(&err), Some(&Kind::BadKeyValue));
    assert_eq!(collect_keys(&mut tree), vec!["12345".to_string()]);
}

#[test]
fn empty_key_is_a_key() {
    let mut tree = new_tree(2, 4);
    tree.set(String::new(), 7).unwrap();
    tree.set("a".to_string(), 8).unwrap();
    tree.commit().unwrap();
    let mut tree = reopen(tree);
    assert_eq!(tree.first_key().unwrap(), Some(String::new()));
    assert_eq!(tree.get(&String::new()).unwrap(), 7);
}

#[test]
fn bad_parameters_are_rejected() {
    for (node_size, key_length) in [(1, 10), (4, 2)] {
        let err = BplusTreeLong::initialize_in_stream(
            Cursor::new(Vec::new()),
            0,
            key_length,
            node_size,
            0,
            compare,
        )
        .unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::WrongConfig));
    }
}

#[test]
fn header_records_parameters() {
    let tree = new_tree(6, 10);
    let raw = tree.into_inner().into_inner();
    assert_eq!(&raw[..5], b"bpNbp");
    assert_eq!(raw[5], 0);
    assert_eq!(&raw[6..10], &6_i32.to_le_bytes());
    assert_eq!(&raw[10..14], &12_i32.to_le_bytes());
    assert_eq!(&raw[14..18], &127_i32.to_le_bytes());
    assert_eq!(&raw[18..26], &(-1_i64).to_le_bytes());
    assert_eq!(&raw[34..39], b"bpNbf");
}

#[test]
fn tree_at_offset() {
    let mut stream = Cursor::new(vec![0xaa; 100]);
    stream.set_position(0);
    let mut tree =
        BplusTreeLong::initialize_in_stream(stream, 100, 8, 4, 127, compare).unwrap();
    tree.set("x".to_string(), 5).unwrap();
    tree.commit().unwrap();
    let raw = tree.into_inner();
    assert_eq!(&raw.get_ref()[..100], &[0xaa; 100][..]);
    let mut tree = BplusTreeLong::setup_from_existing_stream(raw, 100, compare).unwrap();
    assert_eq!(tree.get(&"x".to_string()).unwrap(), 5);
}

#[test]
fn uncommitted_buffers_are_recovered() {
    let mut tree = new_tree(4, 16);
    let mut expected = BTreeMap::new();
    for i in 0..40 {
        tree.set(format!("key{:03}", i), i).unwrap();
        expected.insert(format!("key{:03}", i), i);
    }
    tree.commit().unwrap();
    for i in 40..140 {
        tree.set(format!("key{:03}", i), i).unwrap();
    }
    tree.remove_key(&"key000".to_string()).unwrap();
    tree.shutdown().unwrap();
    // crash: the work since the last commit never reaches the header
    let mut tree = reopen(tree);
    let err = tree.recover(false).unwrap_err();
    assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
    tree.recover(true).unwrap();
    tree.commit().unwrap();
    check_contents(&mut tree, &expected);
    let extent = tree.buffers.next_buffer_number().unwrap();
    for i in 40..60 {
        tree.set(format!("key{:03}", i), i).unwrap();
    }
    tree.commit().unwrap();
    assert_eq!(tree.buffers.next_buffer_number().unwrap(), extent);
}

#[test]
fn describe_lists_nodes() {
    let mut tree = new_tree(2, 4);
    assert_eq!(tree.describe().unwrap(), "<empty>\n");
    for key in ["a", "b", "c"] {
        tree.set(key.to_string(), 0).unwrap();
    }
    let text = tree.describe().unwrap();
    assert!(text.starts_with("node"));
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn reversed_comparator_orders_iteration() {
    fn reversed(a: &String, b: &String) -> Ordering {
        b.cmp(a)
    }
    let mut tree = BplusTreeLong::initialize_in_stream(
        Cursor::new(Vec::new()),
        0,
        8,
        3,
        127,
        reversed,
    )
    .unwrap();
    for key in ["a", "b", "c", "d", "e"] {
        tree.set(key.to_string(), 0).unwrap();
    }
    tree.sanity_check(true).unwrap();
    assert_eq!(tree.first_key().unwrap(), Some("e".to_string()));
    assert_eq!(tree.next_key(&"c".to_string()).unwrap(), Some("b".to_string()));
}
