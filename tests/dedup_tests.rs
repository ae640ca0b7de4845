use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use subtree_dedup::hasher::empty_digest;
use subtree_dedup::utils::IgnoreList;
use subtree_dedup::{resolve, DeletionPlan, Fate, Forest, HashCache, RootSpec, Scan, Scanner};
use tempfile::tempdir;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn label(path: &Path) -> RootSpec {
    RootSpec::new(path.to_str().unwrap())
}

fn run(scanner: &Scanner, roots: &[RootSpec]) -> (Scan, DeletionPlan) {
    let mut scan = scanner.scan(roots).unwrap();
    resolve(&mut scan.forest).unwrap();
    let plan = DeletionPlan::from_forest(&scan.forest);
    (scan, plan)
}

fn fate(forest: &Forest, path: &Path) -> Fate {
    let id = forest.find(path).unwrap();
    forest.node(id).fate()
}

/// Carry out the plan the way the shell would.
fn execute(plan: &DeletionPlan) {
    for removal in plan.removals() {
        if removal.directory {
            if removal.path.exists() {
                fs::remove_dir_all(&removal.path).unwrap();
            }
        } else if removal.path.exists() {
            fs::remove_file(&removal.path).unwrap();
        }
    }
}

#[test]
fn test_file_loser_empties_its_directory() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("x.txt"), "hello");
    write(&root.join("b/y.txt"), "hello");

    let (scan, plan) = run(&Scanner::new(), &[label(root)]);

    let x = scan.forest.find(&root.join("x.txt")).unwrap();
    assert_eq!(fate(&scan.forest, &root.join("b/y.txt")), Fate::Superseded(x));
    assert_eq!(fate(&scan.forest, &root.join("b")), Fate::Pruned);

    assert_eq!(plan.groups.len(), 1);
    assert_eq!(plan.groups[0].keep, root.join("x.txt"));
    assert_eq!(plan.groups[0].remove[0].path, root.join("b/y.txt"));
    assert_eq!(plan.empty_directories[0].path, root.join("b"));

    let mut out = Vec::new();
    plan.write_script(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let keep = text
        .find(&format!("# keep '{}'", root.join("x.txt").display()))
        .unwrap();
    let file = text
        .find(&format!("rm -f -- '{}'", root.join("b/y.txt").display()))
        .unwrap();
    let empty = text.find("# empty directories").unwrap();
    assert!(keep < file && file < empty);
    assert!(text.contains("# 2 removals"));
}

#[test]
fn test_zero_byte_files_never_match() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("e1"), "");
    write(&root.join("sub/e2"), "");
    write(&root.join("keep.txt"), "data");

    let (scan, plan) = run(&Scanner::new(), &[label(root)]);

    for name in ["e1", "sub/e2"] {
        let node = scan.forest.node(scan.forest.find(&root.join(name)).unwrap());
        assert!(node.is_ignored());
        assert_eq!(node.digest(), Some(empty_digest().as_str()));
        assert!(!plan.removes(&root.join(name)));
    }
    assert!(plan.groups.is_empty());
    // sub holds nothing but an ignored file, so it goes as an empty directory.
    assert!(plan.removes(&root.join("sub")));
}

#[test]
fn test_ignored_file_goes_with_its_directory() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("keep.txt"), "data");
    write(&root.join("meta/.DS_Store"), "finder state");

    let (scan, plan) = run(&Scanner::new(), &[label(root)]);

    assert_eq!(fate(&scan.forest, &root.join("meta")), Fate::Pruned);
    assert_eq!(fate(&scan.forest, &root.join("meta/.DS_Store")), Fate::Cascaded);
    assert!(plan.removes(&root.join("meta")));
    assert!(!plan.removes(&root.join("meta/.DS_Store")));

    execute(&plan);
    assert!(!root.join("meta/.DS_Store").exists());
    assert!(root.join("keep.txt").exists());
}

#[test]
fn test_weight_biases_toward_other_root() {
    let dir = tempdir().unwrap();
    let live = dir.path().join("live");
    let backup = dir.path().join("backup");
    for root in [&live, &backup] {
        write(&root.join("photos/p1.jpg"), "p1");
        write(&root.join("photos/p2.jpg"), "p2");
    }
    write(&live.join("notes.txt"), "live notes");
    write(&backup.join("notes.txt"), "backup notes");

    let roots = vec![
        RootSpec::weighted(live.to_str().unwrap(), 3),
        label(&backup),
    ];
    let (scan, plan) = run(&Scanner::new(), &roots);

    let kept = scan.forest.find(&backup.join("photos")).unwrap();
    assert_eq!(fate(&scan.forest, &live.join("photos")), Fate::Superseded(kept));
    assert_eq!(fate(&scan.forest, &live.join("photos/p1.jpg")), Fate::Cascaded);
    assert_eq!(fate(&scan.forest, &live.join("notes.txt")), Fate::Live);

    assert_eq!(plan.groups.len(), 1);
    assert_eq!(plan.groups[0].keep, backup.join("photos"));
    assert!(plan.groups[0].directory);
    assert_eq!(plan.removal_count(), 1);
}

#[test]
fn test_stagger_prefers_earlier_root() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first_root");
    let second = dir.path().join("b");
    write(&first.join("sub/dup.txt"), "same");
    write(&first.join("unique.txt"), "one");
    write(&second.join("sub/dup.txt"), "same");
    write(&second.join("unique.txt"), "two");

    let mut scanner = Scanner::new();
    scanner.set_stagger(true);
    let (scan, _) = run(&scanner, &[label(&first), label(&second)]);

    let second_root = scan.forest.find(&second).unwrap();
    assert_eq!(scan.forest.node(second_root).depth(), 3);

    let kept = scan.forest.find(&first.join("sub")).unwrap();
    assert_eq!(fate(&scan.forest, &second.join("sub")), Fate::Superseded(kept));
}

#[test]
fn test_directory_digest_ignores_names_and_order() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("p/x"), "1");
    write(&root.join("p/y"), "2");
    write(&root.join("q/m"), "2");
    write(&root.join("q/n"), "1");

    let (scan, _) = run(&Scanner::new(), &[label(root)]);

    let p = scan.forest.find(&root.join("p")).unwrap();
    assert_eq!(fate(&scan.forest, &root.join("q")), Fate::Superseded(p));
}

fn mixed_tree(root: &Path) {
    write(&root.join("a/f1"), "first");
    write(&root.join("a/f2"), "second");
    write(&root.join("b/f1"), "first");
    write(&root.join("b/f2"), "second");
    write(&root.join("c/f1"), "first");
    write(&root.join("d/.DS_Store"), "junk");
}

#[test]
fn test_plan_is_self_consistent() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    mixed_tree(root);

    let (scan, plan) = run(&Scanner::new(), &[label(root)]);
    let forest = &scan.forest;

    let a = forest.find(&root.join("a")).unwrap();
    let a_f1 = forest.find(&root.join("a/f1")).unwrap();
    assert_eq!(fate(forest, &root.join("b")), Fate::Superseded(a));
    assert_eq!(fate(forest, &root.join("c/f1")), Fate::Superseded(a_f1));
    assert_eq!(fate(forest, &root.join("c")), Fate::Pruned);
    assert_eq!(fate(forest, &root.join("d")), Fate::Pruned);

    for id in forest.ids() {
        let node = forest.node(id);
        if let Fate::Superseded(winner) = node.fate() {
            assert!(!forest.node(winner).is_deleted());
        }
        if node.is_deleted() {
            for &child in node.children().into_iter().flat_map(|c| c.values()) {
                assert!(forest.node(child).is_deleted());
            }
        }
    }

    assert_eq!(plan.removal_count(), 4);
}

fn removal_paths(plan: &DeletionPlan) -> Vec<std::path::PathBuf> {
    plan.removals().map(|r| r.path.clone()).collect()
}

#[test]
fn test_same_tree_resolves_the_same_way_twice() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    mixed_tree(root);
    write(&root.join("deep/x/f1"), "first");
    write(&root.join("deep/x/f2"), "second");
    write(&root.join("deep/y/g"), "third");
    write(&root.join("g"), "third");

    let (_, first) = run(&Scanner::new(), &[label(root)]);
    let (_, second) = run(&Scanner::new(), &[label(root)]);

    assert!(!first.is_empty());
    assert_eq!(removal_paths(&first), removal_paths(&second));
    let kept = |plan: &DeletionPlan| plan.groups.iter().map(|g| g.keep.clone()).collect::<Vec<_>>();
    assert_eq!(kept(&first), kept(&second));
    assert!(first.removes(&root.join("deep/x")));
    assert!(first.removes(&root.join("deep/y/g")));
}

#[test]
fn test_extra_ignore_names() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("keep.txt"), "data");
    write(&root.join("cache/index.lck"), "lock state");

    let mut ignore = IgnoreList::default();
    ignore.add("INDEX.LCK");
    let mut scanner = Scanner::new();
    scanner.set_ignore_list(ignore);
    let (scan, plan) = run(&scanner, &[label(root)]);

    let lock = scan.forest.find(&root.join("cache/index.lck")).unwrap();
    assert!(scan.forest.node(lock).is_ignored());
    assert!(plan.removes(&root.join("cache")));
}

#[test]
fn test_second_run_finds_nothing() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    mixed_tree(root);

    let (_, plan) = run(&Scanner::new(), &[label(root)]);
    assert!(!plan.is_empty());
    execute(&plan);

    let (_, again) = run(&Scanner::new(), &[label(root)]);
    assert!(again.is_empty());
    assert!(root.join("a/f1").exists());
    assert!(root.join("a/f2").exists());
}

#[test]
fn test_cache_staleness() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let file = data.join("a.txt");
    let cache_path = dir.path().join("cache");
    write(&file, "alpha");
    let past = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&file, past).unwrap();

    let mut scanner = Scanner::new();
    scanner.set_cache_path(cache_path.clone());

    let digest_of = |scan: &Scan| {
        let id = scan.forest.find(&file).unwrap();
        scan.forest.node(id).digest().unwrap().to_string()
    };

    let real = digest_of(&scanner.scan(&[label(&data)]).unwrap());

    let cache = HashCache::open(&cache_path).unwrap();
    cache.put(&file, "planted").unwrap();
    cache.close().unwrap();

    // Older than the store: the cached value is trusted without reading the file.
    let trusted = digest_of(&scanner.scan(&[label(&data)]).unwrap());
    assert_eq!(trusted, "planted");

    let future = SystemTime::now() + Duration::from_secs(3600);
    filetime::set_file_mtime(&file, FileTime::from_system_time(future)).unwrap();
    let recomputed = digest_of(&scanner.scan(&[label(&data)]).unwrap());
    assert_eq!(recomputed, real);

    let cache = HashCache::open(&cache_path).unwrap();
    assert_eq!(cache.get(&file).unwrap(), Some(real));
}

#[test]
fn test_cli_prints_script() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("x.txt"), "hello");
    write(&root.join("b/y.txt"), "hello");

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_dedup"))
        .arg(root)
        .output()
        .unwrap();
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.starts_with("#!/bin/sh\n"));
    assert!(text.contains(&format!("rm -f -- '{}'", root.join("b/y.txt").display())));
    assert!(text.contains(&format!("rm -rf -- '{}'", root.join("b").display())));
}

#[test]
fn test_cli_refuses_overlapping_roots() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write(&data.join("sub/only_copy.txt"), "keep me");

    for second in [data.clone(), data.join("sub")] {
        let output = std::process::Command::new(env!("CARGO_BIN_EXE_dedup"))
            .arg(&data)
            .arg(&second)
            .output()
            .unwrap();
        assert!(!output.status.success());
        assert!(!String::from_utf8_lossy(&output.stdout).contains("rm "));
        assert!(String::from_utf8_lossy(&output.stderr).contains("overlaps"));
    }
    assert!(data.join("sub/only_copy.txt").exists());
}

#[test]
fn test_cli_missing_root_fails() {
    let dir = tempdir().unwrap();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_dedup"))
        .arg(dir.path().join("missing"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(!String::from_utf8_lossy(&output.stdout).contains("rm "));
}
