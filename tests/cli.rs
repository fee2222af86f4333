//! The `folio` binary end to end.

mod common;

use common::{TestRepo, folio_in, folio_ok};
use serde_json::{Value, json};

fn repo() -> TestRepo {
    TestRepo::new(&[
        ("/data/a.json", r#"{"x": 1}"#),
        ("/data/b.json", r#"{"x": 2}"#),
        ("/data/c.toml", "x = 3\n"),
    ])
}

#[test]
fn index_prints_complete_status() {
    let repo = repo();
    let out = folio_ok(repo.path(), &["-d", "data", "index"]);
    let status: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(status["object_count"], json!(3));
    assert_eq!(status["progress"], Value::Null);
}

#[test]
fn query_lists_matches_in_order() {
    let repo = repo();
    let out = folio_ok(repo.path(), &["-d", "data", "query", "obj.x >= 2"]);
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["/b.json", "/c.toml"]);
}

#[test]
fn put_then_get() {
    let repo = repo();
    folio_ok(
        repo.path(),
        &["-d", "data", "put", "/d.json", r#"{"x": 4}"#, "-m", "add d"],
    );
    let out = folio_ok(repo.path(), &["-d", "data", "get", "/d.json", "/zzz.json"]);
    let objects: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(objects, json!({"/d.json": {"x": 4}, "/zzz.json": null}));

    let out = folio_ok(repo.path(), &["-d", "data", "versions", "/d.json", "HEAD", "HEAD~1"]);
    let versions: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(versions, json!([{"x": 4}, null]));
}

#[test]
fn delete_removes_the_file() {
    let repo = repo();
    folio_ok(repo.path(), &["-d", "data", "delete", "b.json", "-m", "drop b"]);
    assert!(repo.read("data/b.json").is_none());
}

#[test]
fn bad_predicate_fails() {
    let repo = repo();
    let out = folio_in(repo.path(), &["-d", "data", "query", "obj.x >"]);
    assert!(!out.status.success());
}
