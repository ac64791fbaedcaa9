use std::{
    fs,
    path::{Path, PathBuf},
};

use fetch_core::DecodeMode;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url: Option<String>,
    pub decode: DecodeMode,
    pub cache: bool,
    pub manual: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: None,
            decode: DecodeMode::Json,
            cache: false,
            manual: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    url: Option<String>,
    decode: Option<DecodeMode>,
    cache: Option<bool>,
    manual: Option<bool>,
}

/// Defaults, overridden by the settings file, overridden by environment
/// variables. A missing default-path file is normal; an explicitly requested
/// file that cannot be read is reported and skipped.
pub fn load_settings(explicit: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from("fetchcli.toml"), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => match toml::from_str::<FileSettings>(&raw) {
            Ok(file) => apply_file(&mut settings, file),
            Err(err) => warn!("config: ignoring malformed {}: {err}", path.display()),
        },
        Err(err) if required => warn!("config: cannot read {}: {err}", path.display()),
        Err(_) => {}
    }

    apply_env(&mut settings);
    settings
}

fn apply_file(settings: &mut Settings, file: FileSettings) {
    if let Some(v) = file.url {
        settings.url = Some(v);
    }
    if let Some(v) = file.decode {
        settings.decode = v;
    }
    if let Some(v) = file.cache {
        settings.cache = v;
    }
    if let Some(v) = file.manual {
        settings.manual = v;
    }
}

fn apply_env(settings: &mut Settings) {
    if let Ok(v) = std::env::var("FETCHCLI_URL") {
        settings.url = Some(v);
    }
    if let Ok(v) = std::env::var("FETCHCLI_DECODE") {
        if let Ok(mode) = v.parse::<DecodeMode>() {
            settings.decode = mode;
        }
    }
    if let Ok(v) = std::env::var("FETCHCLI_CACHE") {
        settings.cache = parse_flag(&v);
    }
    if let Ok(v) = std::env::var("FETCHCLI_MANUAL") {
        settings.manual = parse_flag(&v);
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
