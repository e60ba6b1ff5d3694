//! `gossipnet-peer <host> <port>` — run one peer node.
//!
//! Exit codes: 0 clean shutdown, 1 fatal startup error (bind failure,
//! missing config, no reachable seed), 2 registration rejected.

use {
    clap::{App, Arg},
    gossipnet_peer::{PeerConfig, PeerError, PeerNode},
    gossipnet_wire::{config::load_seeds, logger, NodeId},
    log::{error, info},
    std::{path::Path, process::exit},
    tokio::sync::watch,
};

fn main() {
    let matches = App::new("gossipnet-peer")
        .about("Peer node: gossip dissemination over a power-law overlay")
        .arg(
            Arg::with_name("host")
                .help("Host or IP to listen on")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("port")
                .help("TCP port to listen on")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .help("Seed directory file")
                .takes_value(true)
                .default_value("config.csv"),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or_default().to_owned();
    let port: u16 = match matches.value_of("port").unwrap_or_default().parse() {
        Ok(port) => port,
        Err(_) => {
            eprintln!("invalid port");
            exit(1);
        }
    };

    if let Err(e) = logger::init("peer", port) {
        eprintln!("cannot initialise logging: {e}");
        exit(1);
    }

    let config_path = matches.value_of("config").unwrap_or("config.csv");
    let seeds = match load_seeds(Path::new(config_path)) {
        Ok(seeds) => seeds,
        Err(e) => {
            error!("cannot load seed directory: {e}");
            exit(1);
        }
    };

    let identity = NodeId::new(host, port);
    let node = PeerNode::new(identity, seeds, PeerConfig::default());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("cannot start runtime: {e}");
            exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
        });
        node.run(shutdown_rx).await
    });

    match result {
        Ok(()) => exit(0),
        Err(e @ PeerError::Rejected(_)) => {
            error!("{e}");
            exit(2);
        }
        Err(e) => {
            error!("fatal: {e}");
            exit(1);
        }
    }
}
