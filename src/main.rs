
//! # Hand Interface Entry Point
//! Samples the gripper, streams snapshots to one TCP client and announces itself on the
//! test-cell network while the operator (or the wrist button / relay latch) opens and
//! closes the fingers.
//!
//! ## Threads
//! - **Sampler:** polls the device every 250 ms → latest-wins snapshot cell.
//! - **Stream server:** one client at ~30 Hz, JSON or XML, single line per frame.
//! - **Heartbeat:** UDP multicast timestamp once per second.
//! - **Input watchers:** momentary (debounced toggle) and/or latched (mirror).
//!
//! ## Usage
//! `testcell_telemetry [config.toml]`, then drive the simulated switches from the menu.
//! Ctrl-C or `5` shuts everything down and appends a run summary to the metrics CSV.

use testcell_telemetry::{
    component_a::{device::SimulatedGripper, serializer::serialize},
    component_b::{
        input_watcher::{LatchedWatcher, MomentaryWatcher},
        switch::{SimulatedSwitch, SwitchInput},
    },
    runtime::HandContext,
    utils::{
        config::AppConfig,
        console::{next_line, prompt, spawn_line_reader},
        metrics::{calculate_stats_u64, lock_metrics},
        metrics_export::export_summary_csv,
    },
};

use chrono::Local;
use std::{env, path::PathBuf, process, time::Duration};
use log::{error, info, warn};

const SHORT_PRESS: Duration = Duration::from_millis(200);
const LONG_PRESS: Duration = Duration::from_millis(800);

fn main() {
    env_logger::init();
    info!("=== HAND INTERFACE START ===");

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration rejected: {}", e);
            process::exit(2);
        }
    };
    let started_at = Local::now().to_rfc3339();

    let mut ctx = HandContext::new(config.clone(), Box::new(SimulatedGripper::new()));
    let cancel = ctx.cancel_token();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            warn!("Ctrl-C handler not installed: {}", e);
        }
    }

    if let Err(e) = ctx.bring_up_device() {
        error!("Gripper bring-up failed: {}", e);
        process::exit(1);
    }
    let addr = match ctx.start_telemetry() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Telemetry startup failed: {}", e);
            process::exit(1);
        }
    };
    println!("Streaming {:?} snapshots on {}", config.telemetry.format, addr);

    let wrist = SimulatedSwitch::new("wrist-button");
    let latch = SimulatedSwitch::new("relay-latch");
    if config.input.momentary {
        let watcher = MomentaryWatcher::new(
            wrist.clone(),
            config.input.debounce(),
            config.input.edge_poll(),
            ctx.actuation_port(),
        );
        if let Err(e) = ctx.attach_watcher(Box::new(watcher)) {
            error!("Momentary watcher not started: {}", e);
        }
    }
    if config.input.latched {
        let watcher = LatchedWatcher::new(latch.clone(), config.input.latch_poll(), ctx.actuation_port());
        if let Err(e) = ctx.attach_watcher(Box::new(watcher)) {
            error!("Latched watcher not started: {}", e);
        }
    }

    run_console(&ctx, &wrist, &latch);

    info!("[Main] shutting down...");
    ctx.shutdown();
    report(&ctx, &started_at);
    info!("=== HAND INTERFACE FINISHED ===");
}

fn print_menu() {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     HAND INTERFACE                          │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Tap wrist button (short, ignored)       │");
    println!("│  2) Hold wrist button (long, toggles)       │");
    println!("│  3) Flip relay latch                        │");
    println!("│  4) Show latest snapshot                    │");
    println!("│  5) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
}

fn run_console(ctx: &HandContext, wrist: &SimulatedSwitch, latch: &SimulatedSwitch) {
    let cancel = ctx.cancel_token();
    let lines = match spawn_line_reader() {
        Ok(rx) => rx,
        Err(e) => {
            warn!("No console input ({}); waiting for Ctrl-C", e);
            while cancel.sleep(Duration::from_secs(1)) {}
            return;
        }
    };

    print_menu();
    loop {
        prompt("Select [1/2/3/4/5]: ");
        let Some(choice) = next_line(&lines, &cancel) else {
            println!();
            return;
        };
        match choice.as_str() {
            "1" => wrist.pulse(SHORT_PRESS),
            "2" => wrist.pulse(LONG_PRESS),
            "3" => {
                let level = !latch.is_pressed();
                latch.set(level);
                println!("Relay latch {}", if level { "ON" } else { "OFF" });
            }
            "4" => {
                let snapshot = ctx.cell().read_snapshot();
                match serialize(&snapshot, ctx.config().telemetry.format) {
                    Ok(text) => println!("{}", text),
                    Err(e) => println!("Snapshot {} could not be encoded: {}", snapshot.seq, e),
                }
            }
            "5" | "q" | "quit" => {
                println!("Exiting. Goodbye!");
                return;
            }
            "" => print_menu(),
            other => println!("Unrecognized option '{}', please try again.", other),
        }
    }
}

fn report(ctx: &HandContext, started_at: &str) {
    {
        let m = lock_metrics(ctx.metrics());
        info!(
            "[Summary] samples={} faults={} misses={} frames={} clients={} actuations={}",
            m.samples, m.sample_faults, m.deadline_miss, m.frames_sent, m.clients_served, m.actuations
        );
        if let Some(j) = calculate_stats_u64(&m.jitter_us) {
            info!("[Summary] sampler jitter: max={:.0}us mean={:.1}us", j.max, j.mean);
        }
    }

    if let Some(path) = &ctx.config().telemetry.summary_csv {
        match export_summary_csv(ctx.metrics(), started_at, path) {
            Ok(()) => info!("[Summary] appended to {}", path.display()),
            Err(e) => error!("[Summary] export to {} failed: {}", path.display(), e),
        }
    }
}
