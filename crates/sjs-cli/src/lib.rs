use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use sjs_api::{Engine, EngineOptions};
use sjs_core::SjsError;
use tracing::debug;

mod cli_args;
mod error_map;
mod source_loader;

pub(crate) use cli_args::{Cli, Mode, RenderArgs, RunArgs};
pub(crate) use error_map::{
    emit_error, map_cli_data_invalid, map_cli_data_read, map_cli_script_read, map_cli_script_scan,
};
pub(crate) use source_loader::{load_data, load_scripts};

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, SjsError> {
    match cli.command {
        Mode::Render(args) => run_render(args),
        Mode::Run(args) => run_script(args),
    }
}

fn run_render(args: RenderArgs) -> Result<i32, SjsError> {
    let global = load_data(args.data.as_deref())?;
    let local = load_data(args.local.as_deref())?;
    let mut search_locations = args.search_dirs;
    if let Some(parent) = Path::new(&args.template).parent() {
        if !parent.as_os_str().is_empty() {
            search_locations.push(parent.to_string_lossy().into_owned());
        }
    }
    debug!(template = %args.template, ?search_locations, "rendering");

    let engine = Engine::new(EngineOptions {
        search_locations,
        script_files: load_scripts(&args.scripts)?,
        random_seed: args.seed,
        script_timeout: args.timeout_ms.map(Duration::from_millis),
        strict_undefined: args.strict,
        debug: args.debug,
        ..EngineOptions::default()
    })?;
    engine.init(global)?;

    match args.out {
        Some(out) => {
            engine.template_file(&args.template, &out, local)?;
            println!("RESULT:OK");
            println!("OUT:{}", out);
        }
        None => {
            let output = engine.template_string(&args.template, local)?;
            println!("RESULT:OK");
            println!(
                "OUTPUT_JSON:{}",
                serde_json::to_string(&output).expect("string json")
            );
        }
    }
    Ok(0)
}

fn run_script(args: RunArgs) -> Result<i32, SjsError> {
    let global = load_data(args.data.as_deref())?;
    let engine = Engine::new(EngineOptions {
        search_locations: args.search_dirs,
        ..EngineOptions::default()
    })?;
    engine.init(global)?;
    let value = engine.run_script(&args.script)?;

    println!("RESULT:OK");
    println!(
        "VALUE_JSON:{}",
        serde_json::to_string(&value.to_json()).expect("value json")
    );
    Ok(0)
}
