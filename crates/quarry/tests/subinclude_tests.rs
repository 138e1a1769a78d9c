//! Subinclude, preloading, builtins loading and the concurrency
//! guarantees of the subinclude cache.

mod common;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use common::{FsHost, TestHost, parser_with_host};
use quarry::{BuildLabel, ErrorKind, Object, Package, ParseMode, Parser, ParserOptions};

const DEFS: &str = "\
_g = glob([\"*\"], allow_empty = True)

CONSTANTS = [1, 2]

_HIDDEN = \"secret\"

def make(name):
    return build_rule(name = name, cmd = \"true\")
";

fn defs_host() -> Arc<TestHost> {
    Arc::new(
        TestHost::default()
            .with_target("//defs:defs", &["defs/defs.build"])
            .with_file("defs/defs.build", DEFS),
    )
}

#[test]
fn subinclude_exposes_public_names() {
    let p = parser_with_host(defs_host());
    let pkg = Arc::new(Package::new("app"));
    let src = "subinclude(\"//defs:defs\")\nmake(name = \"lib\")\nreturn CONSTANTS\n";
    let result = p.eval_data(Some(Arc::clone(&pkg)), src, "app/BUILD").unwrap();
    assert_eq!(result, Object::List(vec![Object::Int(1), Object::Int(2)]));
    assert!(pkg.target("lib").is_some());
}

#[test]
fn subinclude_hides_private_names() {
    let p = parser_with_host(defs_host());
    let pkg = Arc::new(Package::new("app"));
    let src = "subinclude(\"//defs:defs\")\nreturn _HIDDEN\n";
    let err = p.eval_data(Some(pkg), src, "app/BUILD").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Name);
}

#[test]
fn subincluded_values_are_frozen_views() {
    let p = parser_with_host(defs_host());
    let pkg = Arc::new(Package::new("app"));
    let src = "subinclude(\"//defs:defs\")\nCONSTANTS[0] = 9\n";
    let err = p.eval_data(Some(pkg), src, "app/BUILD").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Value);
    assert!(err.message().contains("frozen"));
}

#[test]
fn load_is_an_alias_for_subinclude() {
    let p = parser_with_host(defs_host());
    let pkg = Arc::new(Package::new("app"));
    let src = "load(\"//defs:defs\", \"make\")\nmake(name = \"lib\")\n";
    p.eval_data(Some(Arc::clone(&pkg)), src, "app/BUILD").unwrap();
    assert!(pkg.target("lib").is_some());
}

#[test]
fn unknown_subinclude_target_is_a_domain_error() {
    let p = parser_with_host(Arc::new(TestHost::default()));
    let err = p
        .eval_data(None, "subinclude(\"//no:where\")\n", "t.build")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert!(err.message().contains("//no:where"));
}

#[test]
fn concurrent_subincludes_evaluate_once_and_agree() {
    let host = defs_host();
    let p = Arc::new(Parser::new(
        Arc::clone(&host) as Arc<dyn quarry::BuildHost>,
        BTreeMap::new(),
        &ParserOptions::default(),
    ));
    let mut handles = Vec::new();
    for i in 0..8 {
        let p = Arc::clone(&p);
        handles.push(thread::spawn(move || {
            let pkg = Arc::new(Package::new(format!("pkg{i}")));
            let src = "subinclude(\"//defs:defs\")\nmake(name = \"t\")\nreturn CONSTANTS\n";
            let result = p
                .eval_data(Some(Arc::clone(&pkg)), src, &format!("pkg{i}/BUILD"))
                .unwrap();
            assert!(pkg.target("t").is_some());
            result
        }));
    }
    let results: Vec<Object> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for result in &results {
        assert_eq!(result, &results[0]);
    }
    // The subincluded file calls glob() once per evaluation; the cache
    // must have evaluated it exactly once across all eight parses.
    assert_eq!(*host.glob_calls.lock().unwrap(), 1);
}

#[test]
fn failed_subinclude_can_be_retried() {
    let host = Arc::new(TestHost::default().with_target("//defs:defs", &["defs/defs.build"]));
    let p = parser_with_host(Arc::clone(&host) as Arc<dyn quarry::BuildHost>);
    let pkg = Arc::new(Package::new("app"));
    let src = "subinclude(\"//defs:defs\")\nreturn CONSTANTS\n";
    // The output file does not exist yet: the first attempt fails.
    let err = p
        .eval_data(Some(Arc::clone(&pkg)), src, "app/BUILD")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Value);
    // Once the file appears, the same key evaluates cleanly.
    host.files
        .lock()
        .unwrap()
        .insert("defs/defs.build".to_owned(), "CONSTANTS = [7]\n".to_owned());
    let result = p.eval_data(Some(pkg), src, "app/BUILD2").unwrap();
    assert_eq!(result, Object::List(vec![Object::Int(7)]));
}

#[test]
fn register_preload_seeds_every_evaluation() {
    let p = parser_with_host(defs_host());
    p.register_preload("//defs:defs").unwrap();
    let pkg = Arc::new(Package::new("app"));
    let src = "make(name = \"lib\")\nreturn CONSTANTS\n";
    let result = p.eval_data(Some(Arc::clone(&pkg)), src, "app/BUILD").unwrap();
    assert_eq!(result, Object::List(vec![Object::Int(1), Object::Int(2)]));
    assert!(pkg.target("lib").is_some());
}

#[test]
fn load_builtins_exposes_names_and_snippets() {
    let p = parser_with_host(Arc::new(TestHost::default()));
    let defs = "def _helper(x):\n    return x + 1\n\ndef bump(x):\n    return _helper(x)\n\ndef boom():\n    fail(\"kaboom\")\n";
    p.load_builtins("builtins.build_defs", defs).unwrap();
    assert_eq!(
        p.eval_data(None, "return bump(41)\n", "t.build").unwrap(),
        Object::Int(42)
    );
    // Private helpers do not leak, but public functions still close over
    // them.
    let err = p.eval_data(None, "return _helper(1)\n", "t2.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Name);
    // Failures inside loaded builtins attach a source snippet.
    let err = p.eval_data(None, "boom()\n", "t3.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert_eq!(err.message(), "kaboom");
    let snippet = err.snippet().expect("builtin failure carries a snippet");
    assert!(snippet.contains("fail(\"kaboom\")"));
}

#[test]
fn parse_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let build_path = dir.path().join("BUILD");
    let mut f = std::fs::File::create(&build_path).unwrap();
    writeln!(f, "build_rule(name = \"lib\", cmd = \"true\")").unwrap();
    drop(f);

    let p = parser_with_host(Arc::new(FsHost));
    let pkg = Arc::new(Package::new("p"));
    let label = BuildLabel::new("p", "lib");
    p.parse_file(
        Arc::clone(&pkg),
        &label,
        None,
        ParseMode::Normal,
        build_path.to_str().unwrap(),
    )
    .unwrap();
    assert!(pkg.target("lib").is_some());
}

#[test]
fn parse_reader_evaluates_from_a_stream() {
    let p = parser_with_host(Arc::new(TestHost::default()));
    let pkg = Arc::new(Package::new("p"));
    let label = BuildLabel::new("p", "all");
    let src: &[u8] = b"build_rule(name = \"streamed\", cmd = \"true\")\n";
    p.parse_reader(Arc::clone(&pkg), &label, None, ParseMode::Normal, src, "p/BUILD")
        .unwrap();
    assert!(pkg.target("streamed").is_some());
}

#[test]
fn parse_file_only_and_parse_data_do_not_evaluate() {
    let p = parser_with_host(Arc::new(
        TestHost::default().with_file("p/BUILD", "fail(\"never evaluated\")\nx = 1\n"),
    ));
    let ast = p.parse_file_only("p/BUILD").unwrap();
    assert_eq!(ast.statement_count(), 2);
    let ast = p.parse_data(b"a = 1\nb = 2\nc = 3\n", "mem.build").unwrap();
    assert_eq!(ast.statement_count(), 3);
    let err = p.parse_data(b"def broken(:\n", "bad.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn all_functions_by_file_reports_definitions() {
    let p = parser_with_host(Arc::new(TestHost::default()));
    let src = b"def pub(a, b):\n    \"adds things\"\n    return a + b\n\ndef _priv():\n    pass\n";
    p.parse_data(src, "defs.build").unwrap();
    let functions = p.all_functions_by_file();
    let infos = functions.get("defs.build").expect("file recorded");
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].name, "pub");
    assert_eq!(infos[0].params, vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(infos[0].docstring.as_deref(), Some("adds things"));
    assert!(!infos[0].is_private);
    assert!(infos[1].is_private);
}

#[test]
fn subinclude_config_is_a_private_copy() {
    // The subincluded file mutates its CONFIG; the caller's stays intact.
    let host = Arc::new(
        TestHost::default()
            .with_target("//defs:defs", &["defs/defs.build"])
            .with_file("defs/defs.build", "CONFIG[\"INNER\"] = \"yes\"\nSEEN = CONFIG.INNER\n"),
    );
    let p = parser_with_host(host);
    let src = "subinclude(\"//defs:defs\")\nreturn [SEEN, CONFIG.get(\"INNER\", \"unset\")]\n";
    let result = p.eval_data(None, src, "app/BUILD").unwrap();
    assert_eq!(
        result,
        Object::List(vec![Object::Str("yes".to_owned()), Object::Str("unset".to_owned())])
    );
}
