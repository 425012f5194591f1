//! # Session Logger
//! Records synchronized gripper telemetry, timecode audio and robot motion state into
//! one set of files per session under `recorder.output_dir`.
//!
//! Commands: `rec` starts a session or stops the running one, `status` shows per-source
//! liveness and errors, `quit` stops any session and exits. Ctrl-C behaves like `quit`.
//!
//! Usage: `session_logger [config.toml]`

use testcell_telemetry::{
    recorder::{
        audio::{AudioDriver, SimulatedTimecode},
        orchestrator::RecordingOrchestrator,
        recorders_from_config,
        session::{SessionReport, SessionStatus},
    },
    utils::{
        cancel::CancelToken,
        config::AppConfig,
        console::{next_line, parse_index, prompt, spawn_line_reader},
        error::SessionError,
    },
};

use crossbeam::channel::Receiver;
use std::{env, path::PathBuf, process};
use log::{error, info, warn};

fn main() {
    env_logger::init();
    info!("=== SESSION LOGGER START ===");

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration rejected: {}", e);
            process::exit(2);
        }
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            warn!("Ctrl-C handler not installed: {}", e);
        }
    }

    let lines = match spawn_line_reader() {
        Ok(rx) => rx,
        Err(e) => {
            error!("Console unavailable: {}", e);
            process::exit(1);
        }
    };

    let audio = if config.recorder.audio.enabled {
        let driver = SimulatedTimecode::new();
        let Some(index) = choose_audio_device(&driver, config.recorder.audio.device_index, &lines, &cancel)
        else {
            info!("No audio device chosen; exiting.");
            return;
        };
        Some((Box::new(driver) as Box<dyn AudioDriver>, index))
    } else {
        None
    };

    let recorders = match recorders_from_config(&config.recorder, audio) {
        Ok(r) => r,
        Err(e) => {
            error!("Recorder setup rejected: {}", e);
            process::exit(2);
        }
    };
    let orchestrator = match RecordingOrchestrator::launch(
        config.recorder.output_dir.clone(),
        recorders,
        config.recorder.flag_poll(),
        config.recorder.completion_poll(),
        cancel.clone(),
    ) {
        Ok(o) => o,
        Err(e) => {
            error!("Could not start capture threads: {}", e);
            process::exit(1);
        }
    };

    println!("Type 'rec' to start/stop recording, 'status' for source state, 'quit' to exit.");
    loop {
        prompt("> ");
        let Some(command) = next_line(&lines, &cancel) else {
            println!();
            break;
        };
        match command.as_str() {
            "rec" => toggle_recording(&orchestrator),
            "status" => print_status(&orchestrator.status()),
            "quit" | "exit" | "q" => break,
            "" => {}
            other => println!("Unknown command '{}'. Use rec, status or quit.", other),
        }
    }

    if let Some(report) = orchestrator.shutdown() {
        print_report(&report);
    }
    info!("=== SESSION LOGGER FINISHED ===");
}

fn choose_audio_device(
    driver: &dyn AudioDriver,
    configured: Option<usize>,
    lines: &Receiver<String>,
    cancel: &CancelToken,
) -> Option<usize> {
    let devices = driver.devices();
    if let Some(index) = configured.filter(|&i| i < devices.len()) {
        info!("Using audio device {}: {}", index, devices[index]);
        return Some(index);
    }

    println!("\nAudio input devices:");
    for (i, name) in devices.iter().enumerate() {
        println!("  {}) {}", i, name);
    }
    loop {
        prompt("Select audio device index: ");
        let input = next_line(lines, cancel)?;
        match parse_index(&input, devices.len()) {
            Some(index) => return Some(index),
            None => println!("'{}' is not a device index, please try again.", input),
        }
    }
}

fn toggle_recording(orchestrator: &RecordingOrchestrator) {
    if orchestrator.is_recording() {
        println!("Stopping, waiting for sources to finish...");
        match orchestrator.stop_session() {
            Ok(report) => print_report(&report),
            Err(SessionError::DrainAbandoned(sources)) => {
                println!("Stop interrupted; {} did not finish writing.", sources.join(", "))
            }
            Err(e) => println!("Stop refused: {}", e),
        }
        return;
    }

    match orchestrator.start_session() {
        Ok(id) => println!("Recording session {}", id),
        Err(SessionError::StillDraining(sources)) => {
            println!("Previous session still finishing ({}); try again shortly.", sources.join(", "))
        }
        Err(e) => println!("Start refused: {}", e),
    }
}

fn print_status(status: &SessionStatus) {
    match (&status.session_id, status.recording) {
        (Some(id), true) => println!("Recording session {}", id),
        (Some(id), false) => println!("Idle (last session {})", id),
        (None, _) => println!("Idle"),
    }
    for source in &status.sources {
        println!(
            "  {:<8} {:<5} {}",
            source.kind.name(),
            if source.live { "live" } else { "idle" },
            source.last_error.as_deref().unwrap_or("")
        );
    }
}

fn print_report(report: &SessionReport) {
    println!("Session {} finished after {:.1?}", report.session_id, report.elapsed);
    for source in &report.sources {
        let file = source
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        match &source.error {
            Some(err) => println!("  {:<8} {} (ended early: {})", source.kind.name(), file, err),
            None => println!("  {:<8} {}", source.kind.name(), file),
        }
    }
}
