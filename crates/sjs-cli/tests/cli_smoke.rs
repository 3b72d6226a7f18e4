use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sjs-smoke-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("scratch dir should be created");
    dir
}

fn sjs(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sjs"))
        .args(args)
        .env("SJS_LOG", "off")
        .output()
        .expect("cli should execute")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn render_prints_the_output_as_json() {
    let dir = scratch_dir("render");
    let template = dir.join("page.tmpl");
    let partial = dir.join("item.tmpl");
    let data = dir.join("data.json");
    fs::write(
        &template,
        "{{ Global.Name }}\n```sjs\nfor item in context.Global.Items {\n  render(templateString(\"item.tmpl\", item));\n}\nsjs```\n",
    )
    .expect("template should be written");
    fs::write(&partial, "- {{ Local }}").expect("partial should be written");
    fs::write(&data, r#"{"Name": "Bob", "Items": ["x", "y"]}"#).expect("data should be written");

    let output = sjs(&[
        "render",
        template.to_str().expect("utf-8 path"),
        "--data",
        data.to_str().expect("utf-8 path"),
    ]);
    assert!(output.status.success(), "stdout:\n{}", stdout(&output));
    let text = stdout(&output);
    assert!(text.contains("RESULT:OK"));
    assert!(
        text.contains(r#"OUTPUT_JSON:"Bob\n- x\n- y""#),
        "unexpected stdout:\n{}",
        text
    );
}

#[test]
fn render_failures_use_the_error_protocol() {
    let dir = scratch_dir("failure");
    let template = dir.join("broken.tmpl");
    fs::write(&template, "ok\n```sjs\nthrow \"nope\";\nsjs```\n").expect("template should be written");

    let output = sjs(&["render", template.to_str().expect("utf-8 path")]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.contains("RESULT:ERROR"));
    assert!(text.contains("ERROR_CODE:SCRIPT_RUNTIME"));
    assert!(text.contains("ERROR_MSG_JSON:"));
    assert!(!text.contains("RESULT:OK"));

    let missing = sjs(&["render", "definitely-missing.tmpl"]);
    assert_eq!(missing.status.code(), Some(1));
    assert!(stdout(&missing).contains("ERROR_CODE:IO_READ"));
}

#[test]
fn run_prints_the_last_value() {
    let dir = scratch_dir("run");
    let script = dir.join("calc.rhai");
    let data = dir.join("data.json");
    fs::write(&script, "#{ total: context.Global.Base * 2 }").expect("script should be written");
    fs::write(&data, r#"{"Base": 21}"#).expect("data should be written");

    let output = sjs(&[
        "run",
        script.to_str().expect("utf-8 path"),
        "--data",
        data.to_str().expect("utf-8 path"),
    ]);
    assert!(output.status.success(), "stdout:\n{}", stdout(&output));
    let text = stdout(&output);
    assert!(text.contains("RESULT:OK"));
    assert!(text.contains(r#"VALUE_JSON:{"total":42}"#), "{}", text);
}
