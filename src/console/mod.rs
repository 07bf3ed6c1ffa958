// Console helpers: ANSI colors, human-readable durations, operator gate

use std::io::{self, BufRead, Write};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_RESET: &str = "\x1b[0m";

/// Wrap `text` in red ANSI color codes.
pub fn red(text: &str) -> String {
    format!("{}{}{}", ANSI_RED, text, ANSI_RESET)
}

/// Wrap `text` in green ANSI color codes.
pub fn green(text: &str) -> String {
    format!("{}{}{}", ANSI_GREEN, text, ANSI_RESET)
}

/// Render a millisecond interval as `X min Y s`, `X.YYY s`, or `X ms`,
/// picking the largest unit that is non-zero.
pub fn format_duration_ms(duration_ms: u64) -> String {
    let min = duration_ms / 60_000;
    let s = (duration_ms - min * 60_000) / 1000;
    let ms = duration_ms % 1000;

    if min > 0 {
        format!("{} min {} s", min, s)
    } else if s > 0 {
        format!("{}.{:03} s", s, ms)
    } else {
        format!("{} ms", ms)
    }
}

/// Blocking wait for the operator's go-ahead before connections are
/// released. Injectable so automated runs and tests skip the prompt.
pub trait ContinueGate: Send {
    fn wait(&self);
}

/// Reads one line from stdin, matching the interactive tool behavior.
pub struct StdinGate;

impl ContinueGate for StdinGate {
    fn wait(&self) {
        print!("Press return to continue...");
        let _ = io::stdout().flush();
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }
}

/// Passes immediately; used when the prompt is bypassed.
pub struct AutoGate;

impl ContinueGate for AutoGate {
    fn wait(&self) {}
}
