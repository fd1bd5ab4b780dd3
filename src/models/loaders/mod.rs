pub mod json_loader;
pub mod toml_loader;

pub use json_loader::{load_answers, load_questions, write_json};
pub use toml_loader::load_run_config;
