use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agent-brake")]
#[command(about = "AgentBrake - policy firewall between an agent and its tool server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to policy config file (TOML, or JSON by extension)
    #[arg(long, env = "AGENT_BRAKE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend command followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Backend program and its argument vector
    pub fn backend(&self) -> (&str, &[String]) {
        match self.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("", &[]),
        }
    }
}
