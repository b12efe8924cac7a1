//! Waysurf demo
//!
//! Opens a toplevel and repaints it with a slowly shifting color, one
//! frame per compositor frame callback.

use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use log::{error, info};
use waysurf::client::{ClientState, EventLoop, WaylandClient};
use waysurf::state::{Rect, Region, WindowAttributes, WindowEvent, WindowId, WindowType};
use waysurf::surface::DisplayConfig;

/// How often we check whether a new frame can start
const TICK: Duration = Duration::from_millis(4);

/// Opaque color for a frame time in microseconds
fn color(frame_time: i64) -> u32 {
    let phase = (frame_time / 10_000).rem_euclid(512) as u32;
    let level = if phase < 256 { phase } else { 511 - phase };
    0xff00_0000 | (level << 16) | (0x40 << 8) | (255 - level)
}

fn paint(state: &mut ClientState, window: WindowId) -> anyhow::Result<()> {
    let controller = &mut state.controller;
    if !controller.is_configured(window) {
        return Ok(());
    }
    // Frozen until the last frame was presented
    let Some(frame_time) = controller.begin_frame(window) else {
        return Ok(());
    };
    controller.before_paint(window);

    let Some(area) = controller.geometry(window) else {
        return Ok(());
    };
    let area = Rect::new(0, 0, area.width, area.height);
    if let Some(buffer) = controller.begin_paint(window)? {
        buffer.fill_rect(area, color(frame_time));
    }
    controller.damage_and_commit(window, &Region::from_rect(area));
    controller.after_paint(window);
    Ok(())
}

fn tick(state: &mut ClientState, window: WindowId) -> anyhow::Result<()> {
    for event in state.controller.drain_events() {
        match event {
            WindowEvent::Delete { .. } => {
                info!("Window closed");
                state.stop();
                return Ok(());
            }
            WindowEvent::Configure {
                width,
                height,
                scale,
                ..
            } => info!("Window is now {}x{} at scale {}", width, height, scale),
            _ => {}
        }
    }

    paint(state, window)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let WaylandClient {
        connection,
        event_queue,
        mut state,
    } = WaylandClient::connect(DisplayConfig::default())?;

    let window = state.controller.create_window(
        WindowAttributes::new(WindowType::Toplevel, 640, 480).with_title("waysurf demo"),
    );
    state.controller.show(window)?;

    let mut event_loop = EventLoop::new()?;
    event_loop.insert_connection(connection, event_queue)?;
    event_loop
        .handle()
        .insert_source(Timer::from_duration(TICK), move |_, _, state| {
            if let Err(e) = tick(state, window) {
                error!("Paint failed: {}", e);
                state.stop();
                return TimeoutAction::Drop;
            }
            TimeoutAction::ToDuration(TICK)
        })
        .map_err(|e| anyhow::anyhow!("Failed to start the paint timer: {}", e.error))?;

    event_loop.run(&mut state, ClientState::is_running)?;

    state.controller.destroy(window);
    event_loop.flush()?;
    info!("Exiting");
    Ok(())
}
