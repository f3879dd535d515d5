use std::process;

use clap::Parser;
use colored::*;
use env_logger::Builder;
use log::{debug, info, warn, LevelFilter};

use bgpd_rde::display::{OutputTable, RouteRow};
use bgpd_rde::replay::{events_from_file, Event};
use bgpd_rde::rib::{Family, RdePeer};
use bgpd_rde::{RdeError, ServerConfig, RIB};

#[derive(Parser, Debug)]
#[clap(name = "bgpd-rde", rename_all = "kebab-case")]
/// Replay peer and nexthop events through the BGP decision process
pub struct Args {
    /// Path to the RDE config.toml
    config_path: String,
    /// Path to a JSON event script
    events_path: String,
    /// Only print the selected route of each network
    #[clap(long)]
    active_only: bool,
    /// Show debug logs (additive for trace logs)
    #[clap(short, parse(from_occurrences))]
    pub verbose: u8,
}

fn replay(args: &Args) -> Result<RIB, RdeError> {
    let config = ServerConfig::from_file(&args.config_path)?;
    let mut rib = RIB::from_config(&config)?;
    let events: Vec<Event> = events_from_file(&args.events_path)?;
    info!("Replaying {} events from {}", events.len(), args.events_path);

    for (i, event) in events.iter().enumerate() {
        debug!("#{} {}", i, event);
        if let Err(err) = event.apply(&mut rib) {
            warn!("#{} {} rejected: {}", i, event, err);
        }
        for notification in rib.take_events() {
            info!("#{} {}", i, notification);
        }
    }
    Ok(rib)
}

fn print_rib(rib: &RIB, active_only: bool) {
    let mut peers: OutputTable<RdePeer> = OutputTable::new();
    for peer in rib.peers() {
        peers.add_row(peer);
    }
    peers.print();
    println!();

    for family in Family::ALL.iter() {
        let mut table = OutputTable::new();
        rib.dump(*family, |node, routes| {
            for route in routes {
                let active = node.active == Some(route.prefix);
                if active_only && !active {
                    continue;
                }
                table.add_row(&RouteRow {
                    route: route.clone(),
                    active,
                });
            }
        });
        if table.is_empty() {
            continue;
        }
        println!("{}", family.to_string().bold());
        table.print();
        println!();
    }
}

fn main() {
    let args = Args::parse();

    let (rde_level, other_level) = match args.verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("bgpd_rde"), rde_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", rde_level, other_level);

    match replay(&args) {
        Ok(rib) => {
            debug!("{:?}", rib);
            print_rib(&rib, args.active_only);
        }
        Err(err) => {
            eprintln!("{}", err.to_string().red());
            process::exit(1);
        }
    }
}
