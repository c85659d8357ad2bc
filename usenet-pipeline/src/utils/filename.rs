//! Filename helpers for task working folders, NZB files and history records.

/// Characters that are invalid in Windows filenames.
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Characters replaced in history record file names.
const HISTORY_REPLACED_CHARS: &[char] = &['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// Windows reserved filenames (case-insensitive).
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turn a task name into a single path component.
///
/// Invalid characters become `_` (runs collapse to one), surrounding spaces and
/// dots are trimmed, reserved Windows names get a `_` prefix and an empty
/// result becomes `unnamed`. Names that are already safe pass through
/// unchanged, so `"Show - 1"` stays `"Show - 1"`.
pub fn sanitize_path_component(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    if WINDOWS_RESERVED_NAMES.contains(&stem) {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// File name for a persisted task record: `<unix-millis> - <name>.json`.
pub fn history_file_name(task_name: &str, timestamp_ms: i64) -> String {
    let raw = format!("{timestamp_ms} - {task_name}.json");
    raw.chars()
        .map(|c| {
            if HISTORY_REPLACED_CHARS.contains(&c) || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect()
}
