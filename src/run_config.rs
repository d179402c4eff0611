//! Parser for the INI-style run configuration consumed by the UDLF binary.
//!
//! Lines are `KEY=VALUE`; `#` starts a comment line, and `##` or `#` inside a
//! value starts an inline comment. Key order is preserved so the config can
//! be written back out.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

pub const KEY_INPUT_FILE_LIST: &str = "INPUT_FILE_LIST";
pub const KEY_INPUT_FILE_CLASSES: &str = "INPUT_FILE_CLASSES";
pub const KEY_INPUT_IMAGES_PATH: &str = "INPUT_IMAGES_PATH";
pub const KEY_INPUT_FILE: &str = "INPUT_FILE";

/// Dataset locations named by a run config. Missing keys are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetPaths {
    pub dataset_list: String,
    pub class_list: String,
    #[serde(rename = "datasetImages")]
    pub images_dir: String,
    pub input_file: String,
}

impl DatasetPaths {
    /// The stock MPEG-7 layout under a datasets base directory.
    pub fn defaults(datasets_path: &Path) -> Self {
        let mpeg7 = datasets_path.join("mpeg7");
        Self {
            dataset_list: mpeg7.join("lists_mpeg7.txt").display().to_string(),
            class_list: mpeg7.join("classes_mpeg7.txt").display().to_string(),
            images_dir: mpeg7.join("original").display().to_string(),
            input_file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    entries: Vec<(String, String)>,
}

fn strip_inline_comment(value: &str) -> &str {
    let cut = value.find("##").or_else(|| value.find('#'));
    match cut {
        Some(idx) => value[..idx].trim(),
        None => value.trim(),
    }
}

impl RunConfig {
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut config = Self::default();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Lines without `=` or with an empty key are treated as comments.
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            config.set(key, strip_inline_comment(value));
        }
        config
    }

    /// Read and parse a config file from the local filesystem. A missing file
    /// is `NotFound`; any other read failure is `ConfigFormat`.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Self::parse(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::not_found(path.display().to_string()))
            }
            Err(source) => Err(GatewayError::ConfigFormat {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, keeping the original position of an existing key and
    /// appending new keys at the end.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dataset_paths(&self) -> DatasetPaths {
        let value = |key: &str| self.get(key).unwrap_or_default().to_string();
        DatasetPaths {
            dataset_list: value(KEY_INPUT_FILE_LIST),
            class_list: value(KEY_INPUT_FILE_CLASSES),
            images_dir: value(KEY_INPUT_IMAGES_PATH),
            input_file: value(KEY_INPUT_FILE),
        }
    }

    /// Values of path-bearing keys, in config order.
    pub fn path_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries()
            .filter(|(key, value)| is_path_key(key) && is_path_value(value))
    }
}

/// Keys whose values the binary treats as filesystem locations.
pub fn is_path_key(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    key.contains("FILE") || key.contains("MATRIX") || key.contains("PATH")
}

/// Excludes empty values, boolean literals and plain numbers.
pub fn is_path_value(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.eq_ignore_ascii_case("TRUE") || value.eq_ignore_ascii_case("FALSE") {
        return false;
    }
    !is_plain_number(value)
}

/// Optional sign, digits, at most one decimal point. `inf` and `NaN` are not
/// numbers here.
fn is_plain_number(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    (!whole.is_empty() || !fraction.is_empty()) && digits(whole) && digits(fraction)
}
