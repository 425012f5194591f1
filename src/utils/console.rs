//! Interactive stdin handling shared by both binaries.
//!
//! Lines are read on a detached thread and handed over a channel so the menu loops can
//! wait for input and still notice Ctrl-C within `POLL`.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::{
    io::{self, BufRead, Write, stdin, stdout},
    thread,
    time::Duration,
};

use crate::utils::cancel::CancelToken;

const POLL: Duration = Duration::from_millis(100);

pub fn spawn_line_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = channel::unbounded();
    thread::Builder::new().name("console".into()).spawn(move || {
        for line in stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

/// Next trimmed line, or `None` once cancelled or stdin is closed.
pub fn next_line(lines: &Receiver<String>, cancel: &CancelToken) -> Option<String> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match lines.recv_timeout(POLL) {
            Ok(line) => return Some(line),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

pub fn prompt(text: &str) {
    print!("{}", text);
    let _ = stdout().flush();
}

/// Parses a menu index, accepting only `0..count`.
pub fn parse_index(input: &str, count: usize) -> Option<usize> {
    input.trim().parse::<usize>().ok().filter(|&i| i < count)
}
