//! `completions`: shell completion scripts for yumbootstrap.

use std::io::{self, Write};

use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::Generator;
use clap_complete_nushell::Nushell;

use crate::cli::Cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Nushell,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

fn generate(generator: impl Generator, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(generator, &mut cmd, name, out);
}

/// Write the completion script for `shell` to `out`.
pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    match shell {
        Shell::Bash => generate(clap_complete::Shell::Bash, out),
        Shell::Zsh => generate(clap_complete::Shell::Zsh, out),
        Shell::Fish => generate(clap_complete::Shell::Fish, out),
        Shell::Nushell => generate(Nushell, out),
    }
}

pub fn run(args: &CompletionsArgs) -> Result<()> {
    write_completions(args.shell, &mut io::stdout().lock());
    Ok(())
}
