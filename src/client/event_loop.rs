//! Event loop integration
//!
//! Drives the Wayland connection from calloop, next to timers and any
//! other sources the toolkit registers.

use std::io;
use std::time::Duration;

use calloop::generic::Generic;
use calloop::{EventLoop as CalLoop, Interest, LoopHandle, LoopSignal, Mode, PostAction};
use log::{debug, error, warn};
use wayland_client::backend::WaylandError;
use wayland_client::{Connection, EventQueue};

/// Calloop event loop with a Wayland connection
pub struct EventLoop<D: 'static> {
    /// Calloop event loop
    event_loop: CalLoop<'static, D>,
    /// Loop signal for waking
    signal: LoopSignal,
    /// Flushed after every iteration
    connection: Option<Connection>,
}

impl<D: 'static> EventLoop<D> {
    /// Create a new event loop
    pub fn new() -> anyhow::Result<Self> {
        let event_loop = CalLoop::try_new()?;
        let signal = event_loop.get_signal();

        Ok(Self {
            event_loop,
            signal,
            connection: None,
        })
    }

    /// Get a handle to register event sources
    pub fn handle(&self) -> LoopHandle<'static, D> {
        self.event_loop.handle()
    }

    /// Get the loop signal for waking
    pub fn signal(&self) -> LoopSignal {
        self.signal.clone()
    }

    /// Read and dispatch `queue` whenever the connection becomes readable
    pub fn insert_connection(
        &mut self,
        connection: Connection,
        mut queue: EventQueue<D>,
    ) -> anyhow::Result<()> {
        let fd = connection.backend().poll_fd().try_clone_to_owned()?;

        self.event_loop
            .handle()
            .insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                move |_, _, state| {
                    read_and_dispatch(&mut queue, state)?;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| anyhow::anyhow!("Failed to watch the Wayland socket: {}", e.error))?;

        self.connection = Some(connection);
        Ok(())
    }

    /// Send buffered requests to the compositor
    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(connection) = &self.connection else {
            return Ok(());
        };
        match connection.flush() {
            Ok(()) => Ok(()),
            Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!("Compositor is not reading; flush deferred");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run one iteration of the event loop
    pub fn dispatch(&mut self, timeout: Option<Duration>, state: &mut D) -> anyhow::Result<()> {
        self.event_loop.dispatch(timeout, state)?;
        self.flush()
    }

    /// Run the event loop until `running` returns false
    pub fn run(&mut self, state: &mut D, running: impl Fn(&D) -> bool) -> anyhow::Result<()> {
        debug!("Starting event loop");
        self.flush()?;

        while running(state) {
            if let Err(e) = self.dispatch(None, state) {
                error!("Event loop error: {}", e);
                return Err(e);
            }
        }

        debug!("Event loop stopped");
        Ok(())
    }

    /// Wake the event loop from another thread
    pub fn wake(&self) {
        self.signal.wakeup();
    }
}

/// Dispatch what is queued, read what the socket has, dispatch again
fn read_and_dispatch<D>(queue: &mut EventQueue<D>, state: &mut D) -> io::Result<()> {
    queue.dispatch_pending(state).map_err(io::Error::other)?;

    if let Some(guard) = queue.prepare_read() {
        match guard.read() {
            Ok(_) => {}
            Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(io::Error::other(e)),
        }
    }

    queue.dispatch_pending(state).map_err(io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calloop::timer::{TimeoutAction, Timer};

    #[test]
    fn test_event_loop_new() {
        let event_loop = EventLoop::<()>::new();
        assert!(event_loop.is_ok());
    }

    #[test]
    fn test_event_loop_dispatch() {
        let mut event_loop = EventLoop::<()>::new().unwrap();
        // Without a connection, dispatch only polls
        let result = event_loop.dispatch(Some(Duration::ZERO), &mut ());
        assert!(result.is_ok());
    }

    #[test]
    fn test_run_until_timer_stops() {
        let mut event_loop = EventLoop::<u32>::new().unwrap();
        event_loop
            .handle()
            .insert_source(Timer::from_duration(Duration::from_millis(1)), |_, _, ticks| {
                *ticks += 1;
                if *ticks < 3 {
                    TimeoutAction::ToDuration(Duration::from_millis(1))
                } else {
                    TimeoutAction::Drop
                }
            })
            .unwrap();

        let mut ticks = 0;
        event_loop.run(&mut ticks, |ticks| *ticks < 3).unwrap();
        assert_eq!(ticks, 3);
    }
}
