//! Command-line configuration.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tic-tac-toe-server", about = "Networked two-player tic-tac-toe server")]
pub struct Args {
    /// TCP port to listen on.
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub max_clients: usize,
}
