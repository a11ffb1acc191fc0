use clap::Parser;
use client::ChatClient;
use log::{error, info};
use shared::FrameCodec;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:1234")]
    server: String,

    /// Username to register with
    #[arg(short = 'u', long)]
    username: String,

    /// Width of the ASCII length header in bytes
    #[arg(long, default_value = "10")]
    header_width: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let codec = FrameCodec::new(args.header_width, None)?;

    let client = ChatClient::connect(&args.server, &args.username, codec).await?;
    info!("Type a line and press enter to chat as {}", client.username());
    let (mut incoming, mut outgoing) = client.into_split();

    let mut printer = tokio::spawn(async move {
        loop {
            match incoming.next_message().await {
                Ok(Some(message)) => println!("{} > {}", message.username, message.message),
                Ok(None) => {
                    info!("Connection closed by server");
                    break;
                }
                Err(e) => {
                    error!("Failed to read from server: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            outgoing.send_message(line).await?;
                        }
                    }
                    None => break,
                }
            },
            _ = &mut printer => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                break;
            }
        }
    }

    Ok(())
}
