use std::fmt::Display;

use sjs_core::{ErrorKind, SjsError};

fn map_error(kind: ErrorKind, code: &'static str, error: impl Display) -> SjsError {
    SjsError::new(kind, code, error.to_string())
}

pub(crate) fn emit_error(error: SjsError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).expect("string json")
    );
    1
}

pub(crate) fn map_cli_data_read(path: &str, error: std::io::Error) -> SjsError {
    SjsError::io("CLI_DATA_READ", path, &error)
}

pub(crate) fn map_cli_data_invalid(path: &str, error: serde_json::Error) -> SjsError {
    map_error(
        ErrorKind::InvalidArgument,
        "CLI_DATA_INVALID",
        format!("{}: {}", path, error),
    )
}

pub(crate) fn map_cli_script_scan(error: walkdir::Error) -> SjsError {
    map_error(ErrorKind::Io, "CLI_SCRIPT_SCAN", error)
}

pub(crate) fn map_cli_script_read(path: &str, error: std::io::Error) -> SjsError {
    SjsError::io("CLI_SCRIPT_READ", path, &error)
}
