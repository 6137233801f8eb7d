//! # Mapping Behavior Tests
//!
//! End-to-end tests of the public `Mapping` API on in-memory stores:
//!
//! 1. Lookup and creation of hierarchical paths
//! 2. Tombstoned deletion and re-creation under a fresh row id
//! 3. Inherited payload pages along the parent chain
//! 4. Payload page splits and catalog compaction under load
//!
//! Small pages (512 bytes) are used throughout so that trie and payload page
//! splits happen after a few dozen entries.

use pathcat::{is_fatal, Mapping};

fn mapping() -> Mapping {
    Mapping::builder()
        .in_memory()
        .page_size(512)
        .layers(2)
        .open()
        .unwrap()
}

fn create(mapping: &Mapping, path: &[&str]) -> u32 {
    mapping.find_or_create(path).unwrap().unwrap()
}

mod lookup_tests {
    use super::*;

    #[test]
    fn example_scenario_from_creation_to_parent_deletion() {
        let mapping = mapping();

        let bar = create(&mapping, &["com", "foo", "Bar"]);
        let baz = create(&mapping, &["com", "foo", "Bar", "baz"]);
        assert_eq!(bar, 3);
        assert_eq!(baz, 4);
        assert_eq!(mapping.parent_of(baz).unwrap(), Some(bar));

        mapping.write_info(baz, 0, &[42]).unwrap();
        let info = mapping.locate_info(baz, 0).unwrap().unwrap();
        assert_eq!(info.read(baz), Some(&[42][..]));

        mapping.delete(bar).unwrap();

        assert_eq!(
            mapping.resolve(baz).unwrap(),
            Some(vec![
                "com".to_string(),
                "foo".to_string(),
                "Bar".to_string(),
                "baz".to_string()
            ])
        );
        assert_eq!(mapping.find(&["com", "foo", "Bar"]).unwrap(), None);
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let mapping = mapping();

        let first = create(&mapping, &["org", "example", "Widget"]);
        let second = create(&mapping, &["org", "example", "Widget"]);

        assert_eq!(first, second);
        assert_eq!(mapping.find(&["org", "example", "Widget"]).unwrap(), Some(first));
    }

    #[test]
    fn resolve_round_trips_created_paths() {
        let mapping = mapping();
        let paths: &[&[&str]] = &[
            &["a"],
            &["a", "b"],
            &["a", "c"],
            &["x", "y", "z"],
            &["x", "y"],
        ];

        for path in paths {
            let row = create(&mapping, path);
            let resolved = mapping.resolve(row).unwrap().unwrap();
            assert_eq!(resolved, path.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn parent_chain_follows_path_prefixes() {
        let mapping = mapping();

        let abc = create(&mapping, &["a", "b", "c"]);
        let ab = create(&mapping, &["a", "b"]);
        let a = create(&mapping, &["a"]);

        assert_eq!(mapping.parent_of(abc).unwrap(), Some(ab));
        assert_eq!(mapping.parent_of(ab).unwrap(), Some(a));
        assert_eq!(mapping.parent_of(a).unwrap(), Some(0));
    }

    #[test]
    fn find_of_missing_path_creates_nothing() {
        let mapping = mapping();
        create(&mapping, &["a"]);

        assert_eq!(mapping.find(&["a", "missing", "deep"]).unwrap(), None);
        assert_eq!(mapping.find(&["other"]).unwrap(), None);
        assert_eq!(mapping.max_row_id().unwrap(), 1);
    }

    #[test]
    fn paths_lists_every_live_path() {
        let mapping = mapping();
        let a = create(&mapping, &["a"]);
        let ab = create(&mapping, &["a", "b"]);
        let c = create(&mapping, &["c"]);
        mapping.delete(c).unwrap();

        let paths = mapping.paths().unwrap();

        assert_eq!(
            paths,
            vec![
                (vec!["a".to_string()], a),
                (vec!["a".to_string(), "b".to_string()], ab),
            ]
        );
    }

    #[test]
    fn hundreds_of_siblings_stay_reachable() {
        let mapping = mapping();
        let mut created = Vec::new();
        for i in 0..200 {
            let top = vec![format!("Type{:04}", i)];
            let nested = vec!["pkg".to_string(), format!("Type{:04}", i)];
            created.push((top.clone(), mapping.find_or_create(&top).unwrap().unwrap()));
            created.push((nested.clone(), mapping.find_or_create(&nested).unwrap().unwrap()));
        }

        for (path, row) in &created {
            assert_eq!(mapping.find(path).unwrap(), Some(*row));
            assert_eq!(mapping.resolve(*row).unwrap().as_ref(), Some(path));
        }
    }

    #[test]
    fn component_too_long_for_a_page_creates_nothing() {
        let mapping = mapping();
        let long = "n".repeat(600);

        assert_eq!(mapping.find_or_create(&[long.as_str()]).unwrap(), None);
        assert_eq!(mapping.max_row_id().unwrap(), 0);
        assert_eq!(mapping.stats().unwrap().trie.items, 0);
    }

    #[test]
    fn wide_and_deep_trees_stay_consistent() {
        let mapping = mapping();
        let mut created = Vec::new();
        for pkg in 0..6 {
            for ty in 0..25 {
                let path = vec![
                    "org".to_string(),
                    format!("pkg{}", pkg),
                    format!("Type{:03}", ty),
                ];
                let row = mapping.find_or_create(&path).unwrap().unwrap();
                created.push((path, row));
            }
        }

        for (path, row) in &created {
            assert_eq!(mapping.find(path).unwrap(), Some(*row));
            assert_eq!(mapping.resolve(*row).unwrap().as_ref(), Some(path));
        }
        assert!(mapping.stats().unwrap().trie.pages > 1);
    }
}

mod delete_tests {
    use super::*;

    #[test]
    fn deleted_row_cannot_be_found_or_resolved() {
        let mapping = mapping();
        let row = create(&mapping, &["a", "b"]);

        mapping.delete(row).unwrap();

        assert_eq!(mapping.find(&["a", "b"]).unwrap(), None);
        assert_eq!(mapping.resolve(row).unwrap(), None);
    }

    #[test]
    fn recreating_deleted_path_allocates_new_row() {
        let mapping = mapping();
        let old = create(&mapping, &["a", "b"]);
        mapping.delete(old).unwrap();

        let new = create(&mapping, &["a", "b"]);

        assert_ne!(new, old);
        assert!(new > old);
        assert_eq!(mapping.resolve(old).unwrap(), None);
        assert_eq!(mapping.find(&["a", "b"]).unwrap(), Some(new));
    }

    #[test]
    fn child_of_recreated_parent_keeps_its_path_after_sibling_inserts() {
        let mapping = mapping();
        let bar = create(&mapping, &["com", "foo", "Bar"]);
        let baz = create(&mapping, &["com", "foo", "Bar", "baz"]);
        mapping.delete(bar).unwrap();

        let new_bar = create(&mapping, &["com", "foo", "Bar"]);
        create(&mapping, &["com", "foo", "Aaa"]);
        for i in 0..30 {
            create(&mapping, &["com", "foo", &format!("A{:02}", i)]);
        }

        assert_ne!(new_bar, bar);
        assert_eq!(
            mapping.resolve(baz).unwrap(),
            Some(vec![
                "com".to_string(),
                "foo".to_string(),
                "Bar".to_string(),
                "baz".to_string()
            ])
        );
        assert_eq!(mapping.find(&["com", "foo", "Bar"]).unwrap(), Some(new_bar));
        assert_eq!(mapping.find(&["com", "foo", "Bar", "baz"]).unwrap(), None);
    }

    #[test]
    fn delete_of_unknown_or_deleted_row_is_a_no_op() {
        let mapping = mapping();
        let row = create(&mapping, &["a"]);

        mapping.delete(row).unwrap();
        mapping.delete(row).unwrap();
        mapping.delete(999).unwrap();

        assert_eq!(mapping.stats().unwrap().tombstoned_entries, 1);
    }

    #[test]
    fn delete_removes_payload_from_every_layer() {
        let mapping = mapping();
        let parent = create(&mapping, &["a"]);
        let row = create(&mapping, &["a", "b"]);
        mapping.write_info(parent, 0, &[1]).unwrap();
        mapping.write_info(row, 0, &[2]).unwrap();
        mapping.write_info(row, 1, &[3]).unwrap();
        let page = mapping.locate_info(row, 0).unwrap().unwrap().page_id();

        mapping.delete(row).unwrap();

        assert!(mapping.locate_info(row, 0).unwrap().is_none());
        assert!(mapping.locate_info(row, 1).unwrap().is_none());
        let parent_info = mapping.locate_info(parent, 0).unwrap().unwrap();
        assert_eq!(parent_info.page_id(), page);
        assert!(!parent_info.has_item(row));
        assert_eq!(parent_info.read(parent), Some(&[1][..]));
    }

    #[test]
    fn deleting_parent_keeps_children_resolvable_but_unreachable() {
        let mapping = mapping();
        let parent = create(&mapping, &["a"]);
        let child = create(&mapping, &["a", "b"]);

        mapping.delete(parent).unwrap();

        assert_eq!(
            mapping.resolve(child).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(mapping.find(&["a", "b"]).unwrap(), None);
        assert_eq!(mapping.parent_of(child).unwrap(), Some(parent));
    }

    #[test]
    fn payload_writes_to_deleted_row_are_ignored() {
        let mapping = mapping();
        let row = create(&mapping, &["a"]);
        mapping.delete(row).unwrap();

        mapping.write_info(row, 0, &[1]).unwrap();
        mapping.add_to_info(row, 1, 2).unwrap();

        assert!(mapping.load_info(row, 0).unwrap().is_none());
        assert!(mapping.load_info(row, 1).unwrap().is_none());
    }
}

mod inherited_page_tests {
    use super::*;

    #[test]
    fn child_inherits_parent_page_until_it_writes() {
        let mapping = mapping();
        let x = create(&mapping, &["x"]);
        let y = create(&mapping, &["x", "y"]);
        assert_eq!(mapping.find_page_of(0, y).unwrap(), None);

        mapping.write_info(x, 0, &[1, 2, 3]).unwrap();

        let x_page = mapping.find_page_of(0, x).unwrap();
        assert!(x_page.is_some());
        assert_eq!(mapping.find_page_of(0, y).unwrap(), x_page);
        assert_eq!(mapping.find_page_of(1, y).unwrap(), None);

        mapping.write_info(y, 0, &[4]).unwrap();

        let y_info = mapping.locate_info(y, 0).unwrap().unwrap();
        assert_eq!(mapping.find_page_of(0, y).unwrap(), Some(y_info.page_id()));
        assert_eq!(y_info.read(y), Some(&[4][..]));
    }

    #[test]
    fn first_write_deep_in_chain_sets_every_unset_ancestor() {
        let mapping = mapping();
        let a = create(&mapping, &["a"]);
        let b = create(&mapping, &["a", "b"]);
        let c = create(&mapping, &["a", "b", "c"]);
        let d = create(&mapping, &["a", "b", "c", "d"]);

        mapping.write_info(d, 0, &[9]).unwrap();

        let page = mapping.find_page_of(0, d).unwrap().unwrap();
        for row in [a, b, c] {
            let own = mapping.locate_info(row, 0).unwrap().unwrap();
            assert_eq!(own.page_id(), page);
            assert!(!own.has_item(row));
        }
    }

    #[test]
    fn new_page_stops_at_ancestor_with_own_page() {
        let mapping = mapping();
        let a = create(&mapping, &["a"]);
        let b = create(&mapping, &["a", "b"]);
        let c = create(&mapping, &["a", "b", "c"]);
        mapping.update_page_id(0, a, 30).unwrap();

        mapping.write_newly_allocated_page_id(0, c, 31).unwrap();

        assert_eq!(mapping.find_page_of(0, a).unwrap(), Some(30));
        assert_eq!(mapping.find_page_of(0, b).unwrap(), Some(31));
        assert_eq!(mapping.find_page_of(0, c).unwrap(), Some(31));
    }

    #[test]
    fn write_under_ancestor_with_own_page_uses_that_page() {
        let mapping = mapping();
        let a = create(&mapping, &["a"]);
        let b = create(&mapping, &["a", "b"]);
        let c = create(&mapping, &["a", "b", "c"]);
        let other = create(&mapping, &["z"]);
        mapping.write_info(other, 0, &[1]).unwrap();
        let other_page = mapping.find_page_of(0, other).unwrap().unwrap();
        mapping.update_page_id(0, a, other_page).unwrap();

        mapping.write_info(c, 0, &[5]).unwrap();

        assert_eq!(mapping.find_page_of(0, a).unwrap(), Some(other_page));
        assert_eq!(mapping.find_page_of(0, b).unwrap(), Some(other_page));
        assert_eq!(mapping.find_page_of(0, c).unwrap(), Some(other_page));
        assert_eq!(mapping.load_info(c, 0).unwrap(), Some(vec![5]));
    }

    #[test]
    fn manual_new_page_propagates_and_repeat_is_fatal() {
        let mapping = mapping();
        let a = create(&mapping, &["a"]);
        let b = create(&mapping, &["a", "b"]);

        mapping.write_newly_allocated_page_id(1, b, 17).unwrap();
        assert_eq!(mapping.find_page_of(1, a).unwrap(), Some(17));

        let err = mapping.write_newly_allocated_page_id(1, b, 18).unwrap_err();
        assert!(is_fatal(&err));
        assert_eq!(mapping.find_page_of(1, b).unwrap(), Some(17));
    }
}

mod payload_tests {
    use super::*;

    #[test]
    fn layers_are_independent() {
        let mapping = mapping();
        let row = create(&mapping, &["a"]);

        mapping.write_info(row, 0, &[1, 2]).unwrap();
        mapping.write_info(row, 1, &[3]).unwrap();

        assert_eq!(mapping.load_info(row, 0).unwrap(), Some(vec![1, 2]));
        assert_eq!(mapping.load_info(row, 1).unwrap(), Some(vec![3]));
    }

    #[test]
    fn many_payloads_split_pages_and_stay_readable() {
        let mapping = mapping();
        let mut rows = Vec::new();
        for i in 0..40 {
            let row = create(&mapping, &["root", &format!("child{:02}", i)]);
            let payload: Vec<i32> = (0..20).map(|n| n * 10 + i).collect();
            mapping.write_info(row, 0, &payload).unwrap();
            rows.push((row, payload));
        }

        for (row, payload) in &rows {
            assert_eq!(mapping.load_info(*row, 0).unwrap().as_ref(), Some(payload));
        }
        let stats = mapping.stats().unwrap();
        assert!(stats.layers[0].pages > 1);
        assert_eq!(stats.layers[0].payloads(), 40);
    }

    #[test]
    fn appending_grows_payload_across_pages() {
        let mapping = mapping();
        let parent = create(&mapping, &["p"]);
        let a = create(&mapping, &["p", "a"]);
        let b = create(&mapping, &["p", "b"]);
        mapping.write_info(parent, 0, &[0]).unwrap();

        for i in 0..60 {
            mapping.add_to_info(a, 0, i).unwrap();
            mapping.add_to_info(b, 0, -i).unwrap();
        }

        assert_eq!(mapping.load_info(a, 0).unwrap().unwrap().len(), 60);
        assert_eq!(mapping.load_info(b, 0).unwrap().unwrap().len(), 60);
        assert_eq!(mapping.load_info(parent, 0).unwrap(), Some(vec![0]));
    }
}

mod maintenance_tests {
    use super::*;

    #[test]
    fn compaction_without_holes_moves_nothing() {
        let mapping = mapping();
        let mut rows = Vec::new();
        for i in 0..60 {
            let name = format!("n{:02}", i);
            rows.push((name.clone(), create(&mapping, &["c", &name])));
        }
        let keep = rows[59].1;
        mapping.write_info(keep, 1, &[7, 8]).unwrap();

        let moved = mapping.compact_catalog().unwrap();

        assert_eq!(moved, 0);
        assert_eq!(mapping.stats().unwrap().released_entries, 0);
        for (name, row) in &rows {
            assert_eq!(mapping.find(&["c", name.as_str()]).unwrap(), Some(*row));
        }
        assert_eq!(mapping.load_info(keep, 1).unwrap(), Some(vec![7, 8]));
    }

    #[test]
    fn stats_count_live_and_tombstoned_entries() {
        let mapping = mapping();
        let a = create(&mapping, &["a"]);
        let b = create(&mapping, &["a", "b"]);
        create(&mapping, &["a", "c"]);
        mapping.write_info(a, 0, &[1, 2, 3]).unwrap();
        mapping.write_info(b, 1, &[4]).unwrap();
        mapping.delete(b).unwrap();

        let stats = mapping.stats().unwrap();

        assert_eq!(stats.max_row_id, 3);
        assert_eq!(stats.live_entries, 2);
        assert_eq!(stats.tombstoned_entries, 1);
        assert_eq!(stats.layers[0].payloads(), 1);
        assert_eq!(stats.layers[0].items(), 3);
        assert_eq!(stats.overall.pages, 2);
        assert!(stats.to_string().contains("1 tombstoned"));
    }
}
