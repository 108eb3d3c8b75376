use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "klaxon")]
#[command(about = "Chat bot that plays a sound clip into voice channels and keeps team ladder stats")]
pub struct Cli {
    /// Gateway authentication token.
    #[arg(short, long)]
    pub token: String,

    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: String,
}
