use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::viewer::{DEFAULT_WINDOW_RADIUS, ViewerConfig, default_workers};

pub const HELP_KEYS: &str = "\
Key Bindings:
  Esc / q              : Quit
  Up / Down / Wheel    : Scroll
  PageUp / PageDown    : Scroll one screen
  Space                : Scroll one screen down
  Home / End           : First / last page
  ?                    : Toggle help overlay
  Drop a file          : Open it
";

#[derive(Parser, Debug)]
#[command(name = "cbzv", about = "A scrolling CBZ and image viewer", after_help = HELP_KEYS)]
pub struct Cli {
    /// Archive (.cbz / .zip) or image to open
    pub path: Option<PathBuf>,

    /// Pages kept loaded on each side of the current page
    #[arg(long, default_value_t = DEFAULT_WINDOW_RADIUS, value_parser = parse_radius)]
    pub radius: usize,

    /// Page fetch threads. Default: CPU count, clamped to 2..8
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seconds a page request may go unanswered before it is issued again
    #[arg(long, default_value = "10")]
    pub hold_secs: u64,

    /// Pixels scrolled per arrow key or wheel notch
    #[arg(long, default_value = "60")]
    pub scroll_step: u32,
}

fn parse_radius(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("radius must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl Cli {
    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            window_radius: self.radius,
            workers: self.workers.unwrap_or_else(default_workers).max(1),
            max_hold: Duration::from_secs(self.hold_secs.max(1)),
            scroll_step: self.scroll_step.max(1) as f32,
        }
    }
}
