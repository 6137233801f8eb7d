//! # Persistence Tests
//!
//! Mappings stored in a directory must come back unchanged after the
//! `Mapping` is dropped and the directory is opened again:
//!
//! 1. Paths resolve to the same row ids, and new ids continue after the old ones
//! 2. Payloads and inherited pages survive
//! 3. Tombstones survive, so deleted ids are never handed out again

use std::path::Path;

use pathcat::Mapping;
use tempfile::tempdir;

fn open(dir: &Path) -> Mapping {
    Mapping::builder()
        .path(dir)
        .page_size(1024)
        .layers(2)
        .open()
        .unwrap()
}

mod reopen_tests {
    use super::*;

    #[test]
    fn paths_and_row_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        let (bar, baz) = {
            let mapping = open(dir.path());
            let bar = mapping.find_or_create(&["com", "foo", "Bar"]).unwrap().unwrap();
            let baz = mapping
                .find_or_create(&["com", "foo", "Bar", "baz"])
                .unwrap()
                .unwrap();
            mapping.sync().unwrap();
            (bar, baz)
        };

        let mapping = open(dir.path());

        assert_eq!(mapping.find(&["com", "foo", "Bar"]).unwrap(), Some(bar));
        assert_eq!(mapping.parent_of(baz).unwrap(), Some(bar));
        assert_eq!(
            mapping.resolve(baz).unwrap(),
            Some(vec![
                "com".to_string(),
                "foo".to_string(),
                "Bar".to_string(),
                "baz".to_string()
            ])
        );

        let next = mapping.find_or_create(&["com", "other"]).unwrap().unwrap();
        assert_eq!(next, baz + 1);
    }

    #[test]
    fn payloads_survive_reopen() {
        let dir = tempdir().unwrap();
        let (parent, child) = {
            let mapping = open(dir.path());
            let parent = mapping.find_or_create(&["p"]).unwrap().unwrap();
            let child = mapping.find_or_create(&["p", "c"]).unwrap().unwrap();
            mapping.write_info(parent, 0, &[3, 1, 2]).unwrap();
            mapping.add_items_to_info(child, 1, &[10, 20]).unwrap();
            mapping.sync().unwrap();
            (parent, child)
        };

        let mapping = open(dir.path());

        assert_eq!(mapping.load_info(parent, 0).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(mapping.load_info(child, 1).unwrap(), Some(vec![10, 20]));
        assert_eq!(
            mapping.find_page_of(0, child).unwrap(),
            mapping.find_page_of(0, parent).unwrap()
        );
    }

    #[test]
    fn tombstones_survive_reopen() {
        let dir = tempdir().unwrap();
        let old = {
            let mapping = open(dir.path());
            let old = mapping.find_or_create(&["gone"]).unwrap().unwrap();
            mapping.delete(old).unwrap();
            mapping.sync().unwrap();
            old
        };

        let mapping = open(dir.path());

        assert_eq!(mapping.find(&["gone"]).unwrap(), None);
        assert_eq!(mapping.resolve(old).unwrap(), None);
        let new = mapping.find_or_create(&["gone"]).unwrap().unwrap();
        assert!(new > old);
        assert_eq!(mapping.stats().unwrap().tombstoned_entries, 1);
    }

    #[test]
    fn many_entries_survive_reopen_after_page_growth() {
        let dir = tempdir().unwrap();
        let created: Vec<(Vec<String>, u32)> = {
            let mapping = open(dir.path());
            let mut created = Vec::new();
            for i in 0..300 {
                let path = vec![format!("ns{}", i % 7), format!("Sym{:04}", i)];
                let row = mapping.find_or_create(&path).unwrap().unwrap();
                mapping.add_to_info(row, 0, i).unwrap();
                created.push((path, row));
            }
            mapping.sync().unwrap();
            created
        };

        let mapping = open(dir.path());

        for (i, (path, row)) in created.iter().enumerate() {
            assert_eq!(mapping.find(path).unwrap(), Some(*row));
            assert_eq!(mapping.load_info(*row, 0).unwrap(), Some(vec![i as i32]));
        }
    }
}
