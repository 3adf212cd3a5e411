pub mod american;
pub mod real_options;
pub mod simulation;
pub mod sweep;

use serde_json::Value;

use crate::input;

/// Request from `--input` (JSON or YAML) or piped stdin.
pub(crate) fn load_request(
    path: Option<&str>,
    what: &str,
) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        input::file::read_value(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(data)
    } else {
        Err(format!("--input <file.json|file.yaml> or stdin required for {what}").into())
    }
}
