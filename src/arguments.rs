//! Command-line argument access.
//!
//! Arguments are captured once into a thread-safe store so every module can
//! check flags without threading argv through call chains. Tests and helper
//! binaries can override the captured set with `set_cmd_args`.

use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Override the captured arguments (used by tests)
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Get a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => env::args().collect(),
    }
}

/// Check whether a flag is present
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Get the value following a flag, e.g. `--config path/to/config.toml`
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

/// Path to the configuration file (`--config` override or default)
pub fn config_path() -> String {
    get_arg_value("--config").unwrap_or_else(|| crate::constants::CONFIG_FILE_PATH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_value_lookup() {
        set_cmd_args(vec![
            "stakerbot".to_string(),
            "--config".to_string(),
            "custom.toml".to_string(),
            "--debug".to_string(),
        ]);

        assert!(has_arg("--debug"));
        assert!(!has_arg("--verbose"));
        assert_eq!(get_arg_value("--config").as_deref(), Some("custom.toml"));
        assert_eq!(get_arg_value("--missing"), None);
    }
}
