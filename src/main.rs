mod archive;
mod cli;
mod error;
mod fetcher;
mod surface;
mod ui;
mod viewer;

#[cfg(test)]
mod test_support;

use clap::Parser;
use std::sync::Arc;
use winit::event_loop::EventLoop;

use crate::cli::Cli;
use crate::fetcher::{FetchQueue, UserEvent, spawn_fetch_workers};
use crate::surface::ScrollStrip;
use crate::ui::App;
use crate::ui::state::ViewerState;
use crate::viewer::{ViewerController, ViewerEvent};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.viewer_config();

    let event_loop = EventLoop::<UserEvent>::with_user_event().build()?;
    let proxy = event_loop.create_proxy();

    // Workers idle until the viewer queues its first page request
    let queue = FetchQueue::new();
    spawn_fetch_workers(Arc::clone(&queue), proxy, config.workers);
    log::info!(
        "Started {} fetch workers, window radius {}",
        config.workers,
        config.window_radius
    );

    let strip = ScrollStrip::new(800, 1000);
    let mut viewer = ViewerController::new(strip, Arc::clone(&queue), &config);
    if let Some(path) = cli.path {
        viewer.handle(ViewerEvent::Open(path));
    }

    let mut app = App::new(viewer, ViewerState::new(config.scroll_step));
    event_loop.run_app(&mut app)?;

    queue.shutdown();
    Ok(())
}
