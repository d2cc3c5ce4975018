pub mod api;
pub mod editor;
pub mod error;
pub mod job;
pub mod library;
pub mod logging;
pub mod prefs;
pub mod prompts;
pub mod references;
pub mod settings;
pub mod store;
