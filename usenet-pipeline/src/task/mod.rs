//! Task records and the per-task stage machine.

pub mod entry;
pub mod files;
pub mod model;
pub mod naming;
pub mod settings;
pub mod variables;

pub use entry::{Task, TaskContext};
pub use model::{
    CommandData, ContentTemplateData, TaskConfig, TaskStep, TaskVariableFile, TaskVariables,
};
pub use settings::{
    NyuuSettings, ParSettings, PostingSettings, RandomSettings, RarSettings, TaskSettings,
    TemplateSelection,
};
