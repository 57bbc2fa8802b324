use clap::{Parser, Subcommand};

/// Stream agent answers to the terminal as they are generated.
#[derive(Parser, Debug)]
#[command(name = "deltaflow", version, about = "Stream agent answers to the terminal")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/deltaflow/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Relay base URL; chat requests go to `<URL>/fortune-teller` instead of the agent API
    #[arg(long, global = true)]
    pub relay: Option<String>,

    /// Agent bot id (overrides env var and config file)
    #[arg(long, global = true)]
    pub bot_id: Option<String>,

    /// API key for the service the command talks to (overrides env var and config file)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask for a bazi reading. Birth details come from INFO or stdin.
    Fortune {
        /// Free-form birth details, e.g. "1990-05-01 08:30, male, Hangzhou"
        info: Option<String>,
    },
    /// Send a raw query to the agent.
    Chat {
        query: String,
    },
    /// Generate a social-media note for a topic.
    Copywrite {
        #[arg(long)]
        topic: String,
        /// Comma-separated keywords
        #[arg(long)]
        keywords: Option<String>,
    },
}
