//! CLI command implementations.

pub mod bootstrap;
pub mod clean;
pub mod completions;
pub mod config;
pub mod install;
pub mod rpmdb;

/// Suite names followed by command-line names, without duplicates.
pub(crate) fn merge_names(cli: &[String], suite: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(cli.len() + suite.len());
    for name in suite.iter().chain(cli) {
        if !merged.contains(name) {
            merged.push(name.clone());
        }
    }
    merged
}
