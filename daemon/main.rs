// hio-echod: echo server driving a plain or TLS Server from one poll loop
use clap::Parser;
use hio::{logging, Config, Result, Server, ServerTls, Transport};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hio-echod")]
#[command(about = "Echo every byte back to the sender over TCP or TLS", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen host (overrides [server] host)
    #[arg(short = 'a', long)]
    host: Option<String>,

    /// Listen port (overrides [server] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,
}

enum Listener {
    Plain(Server),
    Tls(ServerTls),
}

/// Receive, echo and flush every live connection, then evict the dead ones.
fn echo<I: Transport>(server: &mut Server<I>) {
    let cas: Vec<_> = server.ixes().keys().copied().collect();
    for ca in cas {
        let Some(ix) = server.ix_mut(&ca) else {
            continue;
        };
        let result = ix.service_all_rx().and_then(|_| {
            let data = ix.rxbs().to_vec();
            if !data.is_empty() {
                ix.tx(&data);
                ix.clear_rxbs();
            }
            ix.service_txes()
        });
        if let Err(e) = result {
            warn!(%ca, error = %e, "dropping connection");
            ix.shutclose();
        }
    }
    for ca in server.cutoff_ixes() {
        if let Ok(mut ix) = server.remove_ix(&ca) {
            ix.shutclose();
            info!(%ca, "connection closed");
        }
    }
    // shut-closed after an error but never cut off
    let closed: Vec<_> = server
        .ixes()
        .iter()
        .filter(|(_, ix)| !ix.link().is_open())
        .map(|(ca, _)| *ca)
        .collect();
    for ca in closed {
        let _ = server.remove_ix(&ca);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    logging::init(&config.log)?;

    let section = &config.server;
    let midfix = format!("{}_{}", section.host, section.port);
    let wlog = config.open_wirelog("hio-echod", &midfix);
    let verbosity = config.log.verbosity;

    let mut listener = match &config.tls {
        Some(tls) => {
            let mut server =
                ServerTls::bind(&section.host, section.port, section.bufsize, tls)?.with_verbosity(verbosity);
            if let Some(wlog) = wlog {
                server = server.with_wirelog(wlog);
            }
            Listener::Tls(server)
        }
        None => {
            let mut server: Server =
                Server::bind(&section.host, section.port, section.bufsize)?.with_verbosity(verbosity);
            if let Some(wlog) = wlog {
                server = server.with_wirelog(wlog);
            }
            Listener::Plain(server)
        }
    };

    let opened = match &mut listener {
        Listener::Plain(server) => server.open(),
        Listener::Tls(server) => server.open(),
    };
    if !opened {
        warn!(host = %section.host, port = section.port, "could not listen");
        std::process::exit(1);
    }
    info!(host = %section.host, port = section.port, tls = config.tls.is_some(), "hio-echod serving");

    let tick = Duration::from_millis(cli.tick_ms);
    loop {
        match &mut listener {
            Listener::Plain(server) => {
                if let Err(e) = server.service_connects() {
                    warn!(error = %e, "accept failed");
                }
                echo(server);
            }
            Listener::Tls(server) => {
                if let Err(e) = server.service_connects() {
                    warn!(error = %e, "tls accept failed");
                }
                echo(&mut **server);
            }
        }
        thread::sleep(tick);
    }
}
