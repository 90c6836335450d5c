//! CLI command implementations.

mod config;
mod doctor;
mod podcast;
mod process;
mod status;

pub use config::run_config;
pub use doctor::run_doctor;
pub use podcast::run_podcast;
pub use process::run_process;
pub use status::run_status;
