//! Factory-sim: process entry point for the hackathon factory floor (§4.13).
//!
//! Real MQTT wiring is out of scope (§1 Non-goals); this binary always runs
//! the simulation core against the in-memory `Publisher`/`CommandSource`
//! reference implementation. `--no-mqtt` is accepted for compatibility with
//! the spec's flag set but has no separate effect, since that is already the
//! only bus this binary drives.

use anyhow::Context;
use clap::Parser;
use factory_core::command::{Command, CommandAction, CommandParams};
use factory_core::id::{AgvId, LineId, StationaryDeviceId};
use factory_core::publisher::InMemoryBus;
use factory_core::scheduler::FaultTarget;
use factory_core::{SimConfig, Simulation};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "factory-sim")]
#[command(about = "Discrete-event simulation of a three-line hackathon factory floor")]
struct Args {
    /// Enables an interactive console thread (status / fault / command); no
    /// effect on core simulation behavior.
    #[arg(long)]
    menu: bool,

    /// Accepted for compatibility with the spec's flag set; this binary only
    /// ever drives the in-memory bus, so this is a no-op.
    #[arg(long)]
    no_mqtt: bool,

    /// Path to a YAML `SimConfig`; falls back to defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.no_mqtt {
        info!("--no-mqtt given; this binary only ever drives the in-memory bus");
    }

    let config = match &args.config {
        Some(path) => SimConfig::load_from_path(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => SimConfig::default(),
    };
    config.validate().context("validating simulation config")?;

    let topic_root = config.resolve_topic_root();
    info!(topic_root = %topic_root, line_count = config.line_count, "starting factory-sim");

    let mut sim = Simulation::new(config, InMemoryBus::new());

    let console_rx = if args.menu {
        Some(spawn_console())
    } else {
        None
    };

    loop {
        if let Some(rx) = &console_rx {
            while let Ok(line) = rx.try_recv() {
                handle_console_line(&mut sim, &line);
            }
        }
        if !sim.step() {
            info!("scheduler idle, exiting");
            break;
        }
    }

    Ok(())
}

fn spawn_console() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            if stdin.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let trimmed = line.trim().to_string();
            if !trimmed.is_empty() && tx.send(trimmed).is_err() {
                break;
            }
        }
    });
    rx
}

/// Parses and applies one console line. Recognized forms:
/// `status`, `fault <line> <device>`, `cmd <line> <action> [target_point]`.
fn handle_console_line(sim: &mut Simulation<InMemoryBus>, line: &str) {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["status"] => println!("{}", sim.status_report()),
        ["fault", line_name, device_name] => match (parse_line_id(line_name), parse_fault_target(device_name)) {
            (Some(line_id), Some(target)) => {
                sim.inject_fault(line_id, target, 20.0);
                println!("injected fault on {line_name}/{device_name}");
            }
            _ => warn!(line_name, device_name, "unrecognized fault target"),
        },
        ["cmd", line_name, action, rest @ ..] => match (parse_line_id(line_name), parse_action(action)) {
            (Some(line_id), Some(command_action)) => {
                let target_point = rest.first().map(|s| s.to_string());
                let command = Command {
                    command_id: Some(format!("console-{line}")),
                    action: command_action,
                    target: rest.get(1).and_then(|s| parse_agv_id(s)),
                    params: CommandParams { target_point, ..CommandParams::default() },
                };
                sim.bus_mut().submit_command(line_id, command);
                println!("queued command on {line_name}");
            }
            _ => warn!(line_name, action, "unrecognized command"),
        },
        _ => warn!(%line, "unrecognized console input (try: status | fault <line> <device> | cmd <line> <action> [target] [agv])"),
    }
}

fn parse_line_id(s: &str) -> Option<LineId> {
    match s {
        "line1" | "1" => Some(LineId::Line1),
        "line2" | "2" => Some(LineId::Line2),
        "line3" | "3" => Some(LineId::Line3),
        _ => None,
    }
}

fn parse_agv_id(s: &str) -> Option<AgvId> {
    match s {
        "agv1" | "1" => Some(AgvId::Agv1),
        "agv2" | "2" => Some(AgvId::Agv2),
        _ => None,
    }
}

fn parse_action(s: &str) -> Option<CommandAction> {
    match s {
        "move" => Some(CommandAction::Move),
        "charge" => Some(CommandAction::Charge),
        "load" => Some(CommandAction::Load),
        "unload" => Some(CommandAction::Unload),
        "get_result" => Some(CommandAction::GetResult),
        _ => None,
    }
}

fn parse_fault_target(s: &str) -> Option<FaultTarget> {
    use StationaryDeviceId::*;
    let stationary = match s {
        "raw_material" => Some(RawMaterial),
        "station_a" => Some(StationA),
        "conveyor_ab" => Some(ConveyorAB),
        "station_b" => Some(StationB),
        "conveyor_bc" => Some(ConveyorBC),
        "station_c" => Some(StationC),
        "conveyor_cq" => Some(ConveyorCQ),
        "quality_check" => Some(QualityCheck),
        "finished_goods" => Some(FinishedGoods),
        _ => None,
    };
    if let Some(device) = stationary {
        return Some(FaultTarget::Stationary(device));
    }
    parse_agv_id(s).map(FaultTarget::Agv)
}
