//! Launch parameter handling
//!
//! Component identifiers take the form `[DCE:]<instance>:<application>`.

use crate::error::{GppError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const COMPONENT_IDENTIFIER: &str = "COMPONENT_IDENTIFIER";
pub const NAME_BINDING: &str = "NAME_BINDING";
pub const APPLICATION_NAME: &str = "APPLICATION_NAME";

const SCREEN_BINARY: &str = "screen";
const SCREEN_RC: &str = "gpp.screenrc";

/// Split a component identifier into instance and application parts
pub fn split_component_id(component_id: &str) -> (&str, &str) {
    let id = component_id.strip_prefix("DCE:").unwrap_or(component_id);
    match id.split_once(':') {
        Some((instance, application)) => (instance, application),
        None => (id, ""),
    }
}

/// Application owning a launch, preferring an explicit `APPLICATION_NAME`
pub fn application_name(parameters: &HashMap<String, String>) -> String {
    if let Some(name) = parameters.get(APPLICATION_NAME).filter(|n| !n.is_empty()) {
        return name.clone();
    }
    let component_id = parameters
        .get(COMPONENT_IDENTIFIER)
        .map(String::as_str)
        .unwrap_or_default();
    match split_component_id(component_id) {
        (_, "") => component_id.to_string(),
        (_, application) => application.to_string(),
    }
}

/// First `screen` binary found on the search path
pub fn find_screen(search_path: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(SCREEN_BINARY))
        .find(|candidate| candidate.is_file())
}

/// Arguments that run the child inside a detached screen session
pub fn screen_prepend_args(
    screen: &Path,
    binary_dir: &Path,
    parameters: &HashMap<String, String>,
) -> Vec<String> {
    let mut args = vec![
        screen.display().to_string(),
        "-D".to_string(),
        "-m".to_string(),
        "-c".to_string(),
        binary_dir.join(SCREEN_RC).display().to_string(),
    ];

    let component_id = parameters.get(COMPONENT_IDENTIFIER).filter(|s| !s.is_empty());
    let name_binding = parameters.get(NAME_BINDING).filter(|s| !s.is_empty());
    if let (Some(component_id), Some(name_binding)) = (component_id, name_binding) {
        let (_, waveform) = split_component_id(component_id);
        let session = format!("{waveform}.{name_binding}");
        args.extend(["-S".to_string(), session.clone(), "-t".to_string(), session]);
    }
    args
}

/// Resolve the screen wrapper from `PATH`
pub fn screen_wrapper(binary_dir: &Path, parameters: &HashMap<String, String>) -> Result<Vec<String>> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    let screen = find_screen(&path)
        .ok_or_else(|| GppError::ExecuteFailure("screen not found on PATH".to_string()))?;
    Ok(screen_prepend_args(&screen, binary_dir, parameters))
}
