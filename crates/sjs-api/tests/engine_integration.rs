use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use sjs_api::{Engine, EngineOptions};
use sjs_core::{ErrorKind, Value};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct TestCase {
    template: String,
    #[serde(default)]
    global: Value,
    #[serde(default)]
    local: Value,
    expected: String,
}

type Written = Arc<Mutex<BTreeMap<String, String>>>;

fn testdata_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata")
}

fn load_case(dir: &Path) -> TestCase {
    let text = fs::read_to_string(dir.join("testcase.json")).expect("testcase.json should exist");
    serde_json::from_str(&text).expect("testcase.json should parse")
}

fn load_scripts(dir: &Path) -> BTreeMap<String, String> {
    let scripts = dir.join("scripts");
    if !scripts.is_dir() {
        return BTreeMap::new();
    }
    WalkDir::new(&scripts)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rhai"))
        .map(|entry| {
            let name = entry
                .path()
                .strip_prefix(dir)
                .expect("script should be under the case directory")
                .to_string_lossy()
                .replace('\\', "/");
            let source = fs::read_to_string(entry.path()).expect("script should be readable");
            (name, source)
        })
        .collect()
}

fn case_engine(dir: &Path, global: Value) -> (Engine, Written) {
    let written: Written = Arc::new(Mutex::new(BTreeMap::new()));
    let sink = Arc::clone(&written);
    let engine = Engine::new(EngineOptions {
        search_locations: vec![dir.to_string_lossy().into_owned()],
        write_file: Some(Arc::new(move |path: &str, contents: &[u8]| -> io::Result<()> {
            sink.lock()
                .expect("sink lock")
                .insert(path.to_string(), String::from_utf8_lossy(contents).into_owned());
            Ok(())
        })),
        script_files: load_scripts(dir),
        random_seed: Some(1),
        ..EngineOptions::default()
    })
    .expect("engine should build");
    engine.init(global).expect("init should pass");
    (engine, written)
}

fn case_dirs() -> Vec<PathBuf> {
    let mut dirs = fs::read_dir(testdata_root())
        .expect("testdata root must exist")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join("testcase.json").is_file())
        .collect::<Vec<_>>();
    dirs.sort();
    dirs
}

#[test]
fn fixtures_render_to_expected_output() {
    let dirs = case_dirs();
    assert!(dirs.len() >= 5, "expected fixture cases under testdata");

    for dir in dirs {
        let case = load_case(&dir);
        let (engine, _) = case_engine(&dir, case.global.clone());
        let output = engine
            .template_string(&case.template, case.local.clone())
            .unwrap_or_else(|error| panic!("case {} failed: {}", dir.display(), error));
        assert_eq!(output, case.expected, "case {}", dir.display());
    }
}

#[test]
fn template_file_goes_through_the_write_collaborator() {
    let dir = testdata_root().join("greeting");
    let case = load_case(&dir);
    let (engine, written) = case_engine(&dir, case.global.clone());

    engine
        .template_file(&case.template, "build/greeting.txt", case.local.clone())
        .expect("template_file should pass");
    engine
        .template_file("missing.tmpl", "build/missing.txt", Value::Null)
        .expect_err("missing template should fail");

    let written = written.lock().expect("sink lock");
    assert_eq!(written.len(), 1);
    assert_eq!(written.get("build/greeting.txt"), Some(&case.expected));
}

#[test]
fn missing_templates_report_the_path() {
    let dir = testdata_root().join("greeting");
    let (engine, _) = case_engine(&dir, Value::Null);
    let error = engine
        .template_string("nope.tmpl", Value::Null)
        .expect_err("missing template should fail");
    assert_eq!(error.kind, ErrorKind::Io);
    assert_eq!(error.code, "IO_READ");
    assert!(error.message.starts_with("nope.tmpl: "));
}

#[test]
fn run_script_returns_the_last_value() {
    let dir = testdata_root().join("require");
    let (engine, _) = case_engine(&dir, Value::Null);
    let value = engine
        .run_script("lib/math.rhai")
        .expect("script should run");
    assert_eq!(value, Value::map([("answer", Value::Int(42))]));
    assert_eq!(
        engine
            .run_function("double", &[Value::Int(4)])
            .expect("double should be defined"),
        Value::Int(8)
    );
}

#[test]
fn unrelated_invocations_do_not_share_local_computed() {
    let dir = testdata_root().join("greeting");
    let (engine, _) = case_engine(&dir, Value::Null);
    engine
        .template_string_input(
            "first.tmpl",
            "```sjs\ncontext.LocalComputed.Secret = 1;\nsjs```{{ LocalComputed.Secret }}",
            Value::Null,
        )
        .expect("first render should pass");
    let output = engine
        .template_string_input(
            "second.tmpl",
            "```sjs\nrender(context.LocalComputed.contains(\"Secret\"));\nsjs```",
            Value::Null,
        )
        .expect("second render should pass");
    assert_eq!(output, "false");
}
