//! `{token}` substitution for task names, subjects, paths and templates.

use std::collections::HashMap;

use super::model::TaskVariables;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Variable values compiled from a task's measurements.
///
/// Rendering is a single left-to-right pass: substituted values are never
/// scanned again and unknown tokens are copied through untouched, which keeps
/// uploader placeholders such as `{filename}` intact.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    values: HashMap<String, String>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_variables(vars: &TaskVariables) -> Self {
        let mut map = Self::new();

        if let Some(fname) = &vars.fname {
            map.insert("fname", fname.clone());
        }

        let sizes = [
            ("raw_size", vars.raw_size),
            ("rar_size", vars.rar_size),
            ("par_size", vars.par_size),
            ("total_size", vars.total_size),
            ("nyuu_size", vars.nyuu_size),
        ];
        for (key, value) in sizes {
            if let Some(bytes) = value {
                map.insert_size(key, bytes);
            }
        }

        for (key, value) in [("rar_count", vars.rar_count), ("par_count", vars.par_count)] {
            if let Some(count) = value {
                map.insert(key, count.to_string());
            }
        }

        let times = [
            ("rar_time", vars.rar_time),
            ("par_time", vars.par_time),
            ("nyuu_time", vars.nyuu_time),
            ("total_time", vars.total_time),
        ];
        for (key, value) in times {
            if let Some(ms) = value {
                map.insert_duration(key, ms);
            }
        }

        map
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn insert_size(&mut self, key: &str, bytes: u64) {
        self.insert(key, bytes.to_string());
        self.insert(format!("{key}_kb"), bytes.div_ceil(KIB).to_string());
        self.insert(format!("{key}_mb"), bytes.div_ceil(MIB).to_string());
        self.insert(format!("{key}_gb"), bytes.div_ceil(GIB).to_string());
        self.insert(format!("{key}_human"), format_size_human(bytes));
    }

    fn insert_duration(&mut self, key: &str, ms: u64) {
        self.insert(key, ms.to_string());
        self.insert(format!("{key}_hms"), format_duration_hms(ms));
        self.insert(format!("{key}_min_sec"), format_duration_min_sec(ms));
    }

    pub fn render(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };

            let key = &after[..close];
            match self.values.get(key) {
                Some(value) if !key.contains('{') => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// `1536` -> `1.50 KB`.
pub fn format_size_human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < KIB {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// `HH:MM:SS`; hours are not capped at 24.
pub fn format_duration_hms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// `Xm Ys`.
pub fn format_duration_min_sec(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}m {}s", secs / 60, secs % 60)
}
