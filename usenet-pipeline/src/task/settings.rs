//! Per-task settings: what to archive, how to protect it and how to post it.
//!
//! Every struct uses `#[serde(default)]` so partially written profiles load
//! with the remaining fields at their defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Archive stage options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RarSettings {
    pub recursion: bool,
    pub automatic_volumes: bool,
    /// Manual volume size passed to `-v` when `automatic_volumes` is off.
    pub volumes: String,
    pub excludes: Vec<String>,
    pub solid_archive: bool,
    pub encrypt_headers: bool,
    pub skip_rar_creation: bool,
}

impl Default for RarSettings {
    fn default() -> Self {
        Self {
            recursion: true,
            automatic_volumes: true,
            volumes: String::new(),
            excludes: Vec::new(),
            solid_archive: false,
            encrypt_headers: true,
            skip_rar_creation: false,
        }
    }
}

/// Parity stage options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParSettings {
    pub skip_par_creation: bool,
    /// Derive slice size and redundancy from the payload size.
    pub automatic_params: bool,
    pub redundancy: String,
    pub slices: String,
    pub min_slices: String,
    pub max_slices: String,
}

impl Default for ParSettings {
    fn default() -> Self {
        Self {
            skip_par_creation: false,
            automatic_params: true,
            redundancy: "8%".to_string(),
            slices: "0.5w*10".to_string(),
            min_slices: "1".to_string(),
            max_slices: "32000".to_string(),
        }
    }
}

/// Posting stage options passed through to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NyuuSettings {
    pub include_password_in_nzb: bool,
    pub article_size: String,
    pub check_connections: u32,
    pub check_tries: u32,
    pub check_delay: String,
    pub check_retry_delay: String,
    pub check_post_tries: u32,
    pub check_queue_size: u32,
    pub yenc_name_override: bool,
    pub yenc_name: String,
    pub subject_override: bool,
    pub subject: String,
    pub filename_override: bool,
    pub filename: String,
    pub date_override: bool,
    pub date: String,
    pub message_id_override: bool,
    pub message_id: String,
    pub article_encoding_override: bool,
    pub article_encoding: String,
}

impl Default for NyuuSettings {
    fn default() -> Self {
        Self {
            include_password_in_nzb: false,
            article_size: "700K".to_string(),
            check_connections: 0,
            check_tries: 2,
            check_delay: "5s".to_string(),
            check_retry_delay: "30s".to_string(),
            check_post_tries: 1,
            check_queue_size: 10000,
            yenc_name_override: false,
            yenc_name: "{filename}".to_string(),
            subject_override: false,
            subject: "{comment} [{0filenum}/{files}] - \"{filename}\" yEnc ({part}/{parts}) {filesize} {comment2}"
                .to_string(),
            filename_override: false,
            filename: "{basename}".to_string(),
            date_override: false,
            date: "{now}".to_string(),
            message_id_override: false,
            message_id: "${rand(24)}-{timestamp}@nyuu".to_string(),
            article_encoding_override: false,
            article_encoding: "{filename}".to_string(),
        }
    }
}

/// How a generated name or password is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSettings {
    /// Random string when set, otherwise `custom_name` with variables.
    pub random_name_mode: bool,
    pub custom_name: String,
    pub prefix: String,
    pub suffix: String,
    pub random_name_length: usize,
    pub use_lowercase: bool,
    pub use_uppercase: bool,
    pub use_numbers: bool,
    pub use_special_characters: bool,
}

impl Default for RandomSettings {
    fn default() -> Self {
        Self {
            random_name_mode: true,
            custom_name: String::new(),
            prefix: String::new(),
            suffix: String::new(),
            random_name_length: 10,
            use_lowercase: true,
            use_uppercase: true,
            use_numbers: true,
            use_special_characters: false,
        }
    }
}

impl RandomSettings {
    /// Defaults for task names: the input's file name.
    pub fn name_defaults() -> Self {
        Self {
            random_name_mode: false,
            custom_name: "{fname}".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingSettings {
    pub name_settings: RandomSettings,
    pub password_settings: RandomSettings,
    /// Keep the working folder after a successful post.
    pub save_rar_pars: bool,
    /// Remove the input files after a successful post.
    pub delete_uploaded_files: bool,
    pub files: Vec<PathBuf>,
    pub post_from: String,
    pub post_from_randomized: bool,
    pub post_groups: String,
    pub obfuscate_subject: bool,
    pub obfuscate_filename: bool,
    pub obfuscate_yenc_name: bool,
}

impl Default for PostingSettings {
    fn default() -> Self {
        Self {
            name_settings: RandomSettings::name_defaults(),
            password_settings: RandomSettings::default(),
            save_rar_pars: false,
            delete_uploaded_files: false,
            files: Vec::new(),
            post_from: String::new(),
            post_from_randomized: true,
            post_groups: "alt.binaries.test".to_string(),
            obfuscate_subject: false,
            obfuscate_filename: false,
            obfuscate_yenc_name: false,
        }
    }
}

/// A content template enabled (or not) for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSelection {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub rar_settings: RarSettings,
    pub par_settings: ParSettings,
    pub nyuu_settings: NyuuSettings,
    pub posting_settings: PostingSettings,
    pub server_id: String,
    pub backup_server_id: String,
    pub content_templates: Vec<TemplateSelection>,
}
