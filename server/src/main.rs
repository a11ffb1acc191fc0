use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, binds the listener and runs the dispatch loop.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "1234")]
        port: u16,
        /// Width of the ASCII length header in bytes
        #[clap(long, default_value = "10")]
        header_width: usize,
        /// Largest accepted payload in bytes (defaults to the header's capacity)
        #[clap(long)]
        max_payload: Option<usize>,
        /// Broadcasts buffered per client before it is dropped
        #[clap(long, default_value = "64")]
        outbound_queue: usize,
        /// Seconds a new client may take to send its username
        #[clap(long, default_value = "30")]
        handshake_timeout_secs: u64,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        header_width: args.header_width,
        max_payload: args.max_payload,
        outbound_queue: args.outbound_queue,
        handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
    };

    let server = Server::bind(&config).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
