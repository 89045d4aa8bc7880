use clap::Parser;

#[derive(Parser)]
#[command(name = "tariff")]
pub(crate) struct Cli {
    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    pub(crate) version: bool,
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    /// Overrides TARIFF_PORT.
    #[arg(long)]
    pub(crate) port: Option<u16>,
}
