use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sjs_core::{SjsError, Value};
use walkdir::WalkDir;

use crate::{map_cli_data_invalid, map_cli_data_read, map_cli_script_read, map_cli_script_scan};

/// Reads a JSON data file; no path means no data.
pub(crate) fn load_data(path: Option<&str>) -> Result<Value, SjsError> {
    let Some(path) = path else {
        return Ok(Value::Null);
    };
    let text = fs::read_to_string(path).map_err(|error| map_cli_data_read(path, error))?;
    serde_json::from_str(&text).map_err(|error| map_cli_data_invalid(path, error))
}

/// Collects script sources keyed by path. Directories contribute every
/// `.rhai` file beneath them.
pub(crate) fn load_scripts(paths: &[String]) -> Result<BTreeMap<String, String>, SjsError> {
    let mut scripts = BTreeMap::new();
    for path in paths {
        if Path::new(path).is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(map_cli_script_scan)?;
                if !entry.file_type().is_file() || !is_script(entry.path()) {
                    continue;
                }
                let name = entry.path().to_string_lossy().replace('\\', "/");
                let source = fs::read_to_string(entry.path())
                    .map_err(|error| map_cli_script_read(&name, error))?;
                scripts.insert(name, source);
            }
        } else {
            let source =
                fs::read_to_string(path).map_err(|error| map_cli_script_read(path, error))?;
            scripts.insert(path.clone(), source);
        }
    }
    Ok(scripts)
}

fn is_script(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("rhai")
}
