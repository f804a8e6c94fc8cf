use clap::Subcommand;

use super::replay::ReplayArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay a scenario and print every reporting event as a JSON line
    Replay(ReplayArgs),
}
