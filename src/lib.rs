pub mod branch;
pub mod clients;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod propagate;
pub mod rebase;
pub mod remotes;

mod app;
pub mod commands;

// Re-export App and Config from modules
pub use app::App;
pub use config::Config;

// Disable colors for all tests to get clean output
#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    colored::control::set_override(false);
}
