// tests/rule_filter.rs

//! Authoring rules applied to a real source directory.

use setupkit::{ContentTree, FilterRule, RuleAction, RuleSet};
use std::fs;
use tempfile::TempDir;

fn fixture_rules() -> RuleSet {
    RuleSet::from_rules(vec![
        FilterRule::include("*.txt"),
        FilterRule::exclude("secret*.txt"),
    ])
}

#[test]
fn test_precedence_fixture() {
    let rules = fixture_rules();
    assert_eq!(rules.decide("a.txt"), RuleAction::Include);
    assert_eq!(rules.decide("secret1.txt"), RuleAction::Exclude);
    assert_eq!(rules.decide("notes/a.txt"), RuleAction::Include);
    assert!(setupkit::components::glob_match("**/*.txt", "notes/a.txt"));
}

#[test]
fn test_last_match_wins_regardless_of_specificity() {
    let rules = RuleSet::from_rules(vec![
        FilterRule::exclude("secret1.txt"),
        FilterRule::include("*.txt"),
    ]);
    // The broad include comes last, so it decides
    assert!(rules.includes("secret1.txt"));
}

#[test]
fn test_build_tree_with_rules() {
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path();
    fs::create_dir_all(src.join("notes")).unwrap();
    fs::write(src.join("a.txt"), b"a").unwrap();
    fs::write(src.join("secret1.txt"), b"s").unwrap();
    fs::write(src.join("notes/a.txt"), b"n").unwrap();
    fs::write(src.join("notes/secret2.txt"), b"s").unwrap();

    let tree = ContentTree::build(src, &fixture_rules()).unwrap();
    assert!(tree.lookup("a.txt").is_some());
    assert!(tree.lookup("secret1.txt").is_none());
    assert!(tree.lookup("notes/a.txt").is_some());
    // `secret*.txt` has no `/`, so it does not reach into notes/
    assert!(tree.lookup("notes/secret2.txt").is_some());
}

#[test]
fn test_excluded_directory_prunes_subtree() {
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path();
    fs::create_dir_all(src.join(".git/objects")).unwrap();
    fs::write(src.join(".git/objects/x"), b"obj").unwrap();
    fs::write(src.join("main.rs"), b"fn main() {}").unwrap();

    let mut rules = RuleSet::new();
    rules.push(FilterRule::exclude("**/.git"));
    let tree = ContentTree::build(src, &rules).unwrap();

    assert!(tree.lookup("main.rs").is_some());
    assert!(tree.lookup(".git").is_none());
    assert!(tree.lookup(".git/objects/x").is_none());
}

#[test]
fn test_excluded_directory_hides_included_descendants() {
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path();
    fs::create_dir_all(src.join("notes")).unwrap();
    fs::write(src.join("a.txt"), b"a").unwrap();
    fs::write(src.join("notes/a.txt"), b"n").unwrap();

    let rules = RuleSet::from_rules(vec![
        FilterRule::exclude("*"),
        FilterRule::include("**/*.txt"),
    ]);
    // The rules alone would keep the nested file
    assert!(rules.includes("notes/a.txt"));
    assert!(!rules.includes("notes"));

    let tree = ContentTree::build(src, &rules).unwrap();
    assert!(tree.lookup("a.txt").is_some());
    assert!(tree.lookup("notes").is_none());
    assert!(tree.lookup("notes/a.txt").is_none());
}

#[test]
fn test_rules_file_format() {
    let rules = RuleSet::parse("# authoring rules\ninclude *.txt\nexclude secret*.txt\nbogus line\n");
    assert_eq!(rules.len(), 2);
    assert!(rules.includes("a.txt"));
    assert!(!rules.includes("secret9.txt"));
}

#[test]
fn test_case_insensitive_rules() {
    // No rule matches case-sensitively, so the default include applies
    assert!(fixture_rules().includes("SECRET1.TXT"));
    assert!(!fixture_rules().case_insensitive().includes("SECRET1.TXT"));
}
