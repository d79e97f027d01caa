//! Terminal progress indicators

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";

/// Spinner with a message and an optional `{percent}` readout.
///
/// A quiet spinner is hidden but still accepts updates, so callers never
/// branch on quiet mode themselves.
pub fn create_spinner(message: &str, quiet: bool) -> ProgressBar {
    let spinner = ProgressBar::new(100);

    if quiet {
        spinner.set_draw_target(ProgressDrawTarget::hidden());
        return spinner;
    }

    let style = ProgressStyle::with_template("{spinner:.green} {msg} {percent:>3}% [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS);
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Set the spinner position from a `0.0..=1.0` fraction.
pub fn set_fraction(bar: &ProgressBar, fraction: f64) {
    let pos = (fraction.clamp(0.0, 1.0) * 100.0).round() as u64;
    bar.set_position(pos);
}
