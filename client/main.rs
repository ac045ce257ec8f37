// hio-send: send lines to a server and print what comes back
use clap::Parser;
use hio::{logging, Config, Result};
use hio_client::LineClient;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hio-send")]
#[command(about = "Send lines over TCP or TLS and print the replies", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server host (overrides [client] host)
    #[arg(short = 'a', long)]
    host: Option<String>,

    /// Server port (overrides [client] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Line to send; repeatable. Without any, lines are read from stdin
    #[arg(short, long = "message", value_name = "LINE")]
    messages: Vec<String>,

    /// Give up after this many milliseconds without finishing
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = cli.host {
        config.client.host = host;
    }
    if let Some(port) = cli.port {
        config.client.port = port;
    }
    logging::init(&config.log)?;

    let mut lines = cli.messages;
    if lines.is_empty() {
        for line in io::stdin().lock().lines() {
            lines.push(line?);
        }
    }

    let midfix = format!("{}_{}", config.client.host, config.client.port);
    let wlog = config.open_wirelog("hio-send", &midfix);
    let mut client = LineClient::from_config(&config, wlog)?;
    if !client.open() {
        warn!(host = %config.client.host, port = config.client.port, "could not open client socket");
        std::process::exit(1);
    }
    for line in &lines {
        client.send_line(line);
    }

    let deadline = Instant::now() + Duration::from_millis(cli.timeout_ms);
    let tick = Duration::from_millis(cli.tick_ms);
    let mut replies = 0;
    let mut announced = false;
    while replies < lines.len() {
        if client.service()? && !announced {
            info!(host = %config.client.host, port = config.client.port, "connected");
            announced = true;
        }
        for reply in client.take_lines() {
            println!("{}", reply);
            replies += 1;
        }
        if client.cutoff() {
            warn!("server closed the connection");
            break;
        }
        if Instant::now() >= deadline {
            warn!(replies, expected = lines.len(), "timed out");
            std::process::exit(2);
        }
        thread::sleep(tick);
    }
    Ok(())
}
