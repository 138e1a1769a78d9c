#![allow(dead_code)]

//! Shared test double for the host collaborator: an in-memory filesystem,
//! a pre-built target graph, and canned glob results.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use quarry::{BuildHost, BuildLabel, GlobRequest, Object, Parser, ParserOptions, SubrepoSpec};

#[derive(Default)]
pub struct TestHost {
    pub files: Mutex<BTreeMap<String, String>>,
    /// Label string → output file paths; anything else fails to build.
    pub outputs: Mutex<BTreeMap<String, Vec<String>>>,
    pub glob_results: Mutex<Vec<String>>,
    pub glob_calls: Mutex<usize>,
    pub subrepos: Mutex<Vec<SubrepoSpec>>,
}

impl TestHost {
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_owned(), contents.to_owned());
        self
    }

    pub fn with_target(self, label: &str, outputs: &[&str]) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .insert(label.to_owned(), outputs.iter().map(|s| (*s).to_owned()).collect());
        self
    }

    pub fn with_glob_results(self, results: &[&str]) -> Self {
        *self.glob_results.lock().unwrap() = results.iter().map(|s| (*s).to_owned()).collect();
        self
    }
}

impl BuildHost for TestHost {
    fn wait_until_built(&self, label: &BuildLabel) -> Result<Vec<String>, String> {
        self.outputs
            .lock()
            .unwrap()
            .get(&label.to_string())
            .cloned()
            .ok_or_else(|| format!("unknown target {label}"))
    }

    fn read_file(&self, path: &str) -> io::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_owned()))
    }

    fn glob(&self, _package_dir: &str, request: &GlobRequest) -> Vec<String> {
        *self.glob_calls.lock().unwrap() += 1;
        self.glob_results
            .lock()
            .unwrap()
            .iter()
            .filter(|f| !request.exclude.contains(f))
            .cloned()
            .collect()
    }

    fn register_subrepo(&self, spec: SubrepoSpec) -> Result<(), String> {
        self.subrepos.lock().unwrap().push(spec);
        Ok(())
    }
}

/// A host that reads through to the real filesystem (the trait default),
/// for tests driving `parse_file` against temp directories.
pub struct FsHost;

impl BuildHost for FsHost {
    fn wait_until_built(&self, label: &BuildLabel) -> Result<Vec<String>, String> {
        Err(format!("unknown target {label}"))
    }

    fn glob(&self, _package_dir: &str, _request: &GlobRequest) -> Vec<String> {
        Vec::new()
    }
}

pub fn parser() -> Parser {
    Parser::new(Arc::new(TestHost::default()), BTreeMap::new(), &ParserOptions::default())
}

pub fn parser_with_host(host: Arc<dyn BuildHost>) -> Parser {
    Parser::new(host, BTreeMap::new(), &ParserOptions::default())
}

pub fn parser_with_config(entries: &[(&str, Object)]) -> Parser {
    let config = entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect();
    Parser::new(Arc::new(TestHost::default()), config, &ParserOptions::default())
}

/// Evaluates a source fragment with no package, panicking on error.
pub fn eval(parser: &Parser, name: &str, src: &str) -> Object {
    parser
        .eval_data(None, src, name)
        .unwrap_or_else(|e| panic!("evaluation of {name} failed: {e}"))
}
