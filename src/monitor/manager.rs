// SPDX-License-Identifier: GPL-3.0-only
//! Shared display manager
//!
//! One [`DisplayManager`] handle is held by the monitor thread and clones of
//! it by the front-end. All clones share:
//!
//! - the current and previous snapshot, swapped together on every rebuild
//! - the event handler slot, read once per dispatch
//! - the configuration lock that serialises pipe configuration commands
//!
//! Turning a display on or off never touches the cached snapshot. The change
//! shows up on the next rebuild, which the server's own notification triggers.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{AppError, Result};
use crate::protocols::{DisplayServer, PipeConfig, ScreenSize, SetConfigStatus};

use super::allocator::allocate_pipe;
use super::backend::{Geometry, ModeId, PipeId, Placement, Snapshot, TopologyEvent};
use super::enumeration::{build_snapshot, fetch_inventory};

/// Callback invoked from the monitor thread for every topology event
pub type EventHandler = Arc<dyn Fn(TopologyEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct Topology {
    current: Snapshot,
    previous: Snapshot,
}

pub struct DisplayManager<S> {
    server: Arc<S>,
    topology: Arc<RwLock<Topology>>,
    handler: Arc<RwLock<Option<EventHandler>>>,
    reconfigure: Arc<Mutex<()>>,
}

impl<S> Clone for DisplayManager<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            topology: Arc::clone(&self.topology),
            handler: Arc::clone(&self.handler),
            reconfigure: Arc::clone(&self.reconfigure),
        }
    }
}

impl<S: DisplayServer> DisplayManager<S> {
    pub fn new(server: Arc<S>) -> Self {
        Self {
            server,
            topology: Arc::new(RwLock::new(Topology::default())),
            handler: Arc::new(RwLock::new(None)),
            reconfigure: Arc::new(Mutex::new(())),
        }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    /// Copy of the latest snapshot
    pub fn current_snapshot(&self) -> Snapshot {
        self.topology
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// The snapshot that was current before the latest rebuild
    pub fn previous_snapshot(&self) -> Snapshot {
        self.topology
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .previous
            .clone()
    }

    /// Query the server and replace the current snapshot
    ///
    /// The old current snapshot becomes the previous one.
    pub fn rebuild(&self) -> Result<()> {
        let inventory = fetch_inventory(self.server.as_ref()).map_err(AppError::protocol)?;
        let snapshot = build_snapshot(&inventory);

        let conflicts = snapshot.pipe_conflicts();
        if !conflicts.is_empty() {
            warn!(?conflicts, "Several active displays share a pipe");
        }

        let mut topology = self.topology.write().unwrap_or_else(PoisonError::into_inner);
        topology.previous = std::mem::replace(&mut topology.current, snapshot);

        debug!(
            displays = topology.current.len(),
            previous = topology.previous.len(),
            "Snapshot rebuilt"
        );
        Ok(())
    }

    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(TopologyEvent) + Send + Sync + 'static,
    {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn clear_event_handler(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Hand `event` to the registered handler, if any
    pub fn dispatch(&self, event: TopologyEvent) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => {
                info!(%event, "Dispatching topology event");
                handler(event);
            }
            None => debug!(%event, "No event handler registered, dropping event"),
        }
    }

    /// Drive display `name` with `mode`
    ///
    /// `pipe` is a hint, the allocator falls back to a free pipe when another
    /// display holds it. Returns the pipe that was configured.
    pub fn turn_on(
        &self,
        name: &str,
        mode: ModeId,
        pipe: Option<PipeId>,
        placement: Option<Placement>,
    ) -> Result<PipeId> {
        let _guard = self.reconfigure.lock().unwrap_or_else(PoisonError::into_inner);

        let inventory = fetch_inventory(self.server.as_ref()).map_err(AppError::protocol)?;
        let snapshot = build_snapshot(&inventory);

        let target = snapshot
            .get(name)
            .ok_or_else(|| AppError::DisplayNotFound(name.to_string()))?;
        let target_mode = target.mode(mode).ok_or_else(|| AppError::UnsupportedMode {
            display: name.to_string(),
            mode,
        })?;
        let (width, height) = (u32::from(target_mode.width), u32::from(target_mode.height));

        let pipe = allocate_pipe(&snapshot, name, pipe.or(target.pipe))?;

        let (x, y) = match placement {
            Some(placement) => placement_origin(&snapshot, name, placement, width, height),
            None => (0, 0),
        };

        let placed = Geometry { x, y, width, height };
        let resized_from = self.grow_screen(&snapshot, name, placed)?;

        let config = PipeConfig {
            pipe,
            x,
            y,
            mode: Some(mode),
            outputs: inventory.connected_named(name),
            config_timestamp: inventory.config_timestamp,
        };
        if let Err(e) = self.apply(name, &config) {
            if let Some(previous) = resized_from {
                self.restore_screen(previous);
            }
            return Err(e);
        }

        info!(display = name, pipe, mode, x, y, "Display turned on");
        Ok(pipe)
    }

    /// Stop driving display `name`
    ///
    /// Without a `pipe` hint the display's current pipe is used. A pipe that
    /// also feeds other outputs keeps running for them.
    pub fn turn_off(&self, name: &str, pipe: Option<PipeId>) -> Result<()> {
        let _guard = self.reconfigure.lock().unwrap_or_else(PoisonError::into_inner);

        let inventory = fetch_inventory(self.server.as_ref()).map_err(AppError::protocol)?;
        let matching = inventory.connected_named(name);
        if matching.is_empty() {
            return Err(AppError::DisplayNotFound(name.to_string()));
        }

        let current = inventory
            .outputs
            .iter()
            .find(|o| o.is_connected() && o.name == name)
            .and_then(|o| o.pipe);

        let pipe = match pipe {
            Some(hint) => {
                let info = inventory.pipe(hint).ok_or(AppError::UnknownPipe(hint))?;
                if info.outputs.iter().any(|o| matching.contains(o)) {
                    Some(hint)
                } else {
                    warn!(
                        display = name,
                        pipe = hint,
                        current = ?current,
                        "Pipe does not drive display, using its current pipe"
                    );
                    current
                }
            }
            None => current,
        };

        let Some(pipe) = pipe else {
            info!(display = name, "Display already off");
            return Ok(());
        };
        let pipe_info = inventory.pipe(pipe).ok_or(AppError::UnknownPipe(pipe))?;

        let remaining: Vec<_> = pipe_info
            .outputs
            .iter()
            .copied()
            .filter(|o| !matching.contains(o))
            .collect();

        let config = if remaining.is_empty() || pipe_info.mode.is_none() {
            PipeConfig {
                pipe,
                x: 0,
                y: 0,
                mode: None,
                outputs: Vec::new(),
                config_timestamp: inventory.config_timestamp,
            }
        } else {
            debug!(display = name, pipe, ?remaining, "Pipe stays on for other outputs");
            PipeConfig {
                pipe,
                x: pipe_info.x,
                y: pipe_info.y,
                mode: pipe_info.mode,
                outputs: remaining,
                config_timestamp: inventory.config_timestamp,
            }
        };
        self.apply(name, &config)?;

        info!(display = name, pipe, "Display turned off");
        Ok(())
    }

    fn apply(&self, name: &str, config: &PipeConfig) -> Result<()> {
        let status = self
            .server
            .set_pipe_config(config)
            .map_err(AppError::protocol)?;

        if status != SetConfigStatus::Success {
            return Err(AppError::ConfigurationRejected {
                display: name.to_string(),
                pipe: config.pipe,
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Enlarge the screen so `placed` fits next to the other lit displays
    ///
    /// Returns the size before growing, `None` when the screen was big enough.
    fn grow_screen(
        &self,
        snapshot: &Snapshot,
        name: &str,
        placed: Geometry,
    ) -> Result<Option<ScreenSize>> {
        let screen = self.server.screen_size().map_err(AppError::protocol)?;

        let (width, height) = snapshot
            .active()
            .filter(|d| d.name != name)
            .filter_map(|d| d.geometry)
            .chain(std::iter::once(placed))
            .fold((0u32, 0u32), |(w, h), g| {
                (w.max(g.right().max(0) as u32), h.max(g.bottom().max(0) as u32))
            });

        if width <= screen.width && height <= screen.height {
            return Ok(None);
        }

        let width = width.max(screen.width).min(screen.max_width);
        let height = height.max(screen.height).min(screen.max_height);
        info!(width, height, "Growing screen for new display");
        self.server
            .set_screen_size(width, height)
            .map_err(AppError::protocol)?;
        Ok(Some(screen))
    }

    /// Undo [`Self::grow_screen`] after a failed configuration
    fn restore_screen(&self, previous: ScreenSize) {
        debug!(width = previous.width, height = previous.height, "Restoring screen size");
        if let Err(e) = self.server.set_screen_size(previous.width, previous.height) {
            error!("can't restore screen size: {e:#}");
        }
    }
}

/// Origin for `name` placed relative to the primary display's current geometry
fn placement_origin(
    snapshot: &Snapshot,
    name: &str,
    placement: Placement,
    width: u32,
    height: u32,
) -> (i32, i32) {
    let Some(primary) = snapshot.primary() else {
        error!(display = name, "No primary display found, placing at origin");
        return (0, 0);
    };
    if primary.name == name {
        return (0, 0);
    }
    match primary.geometry {
        Some(geometry) => placement.origin(geometry, width, height),
        None => {
            warn!(display = name, primary = %primary.name, "Primary display is off, placing at origin");
            (0, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::fake::{FakeServer, mode, output};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> DisplayManager<FakeServer> {
        let server = FakeServer::new(
            &[1, 2],
            vec![
                output(100, "A", Some(1), &[10, 11]),
                output(101, "B", None, &[10, 11]),
            ],
            vec![mode(10, 1920, 1080), mode(11, 1280, 720)],
        );
        let manager = DisplayManager::new(Arc::new(server));
        manager.rebuild().unwrap();
        manager
    }

    #[test]
    fn test_turn_on_uses_free_pipe() {
        let manager = manager();
        let pipe = manager.turn_on("B", 11, None, None).unwrap();
        assert_eq!(pipe, 2);

        let cmd = manager.server().commands().pop().unwrap();
        assert_eq!(cmd.outputs, vec![101]);
        assert_eq!(cmd.mode, Some(11));
        assert_eq!((cmd.x, cmd.y), (0, 0));
    }

    #[test]
    fn test_turn_on_does_not_touch_cached_snapshot() {
        let manager = manager();
        manager.turn_on("B", 11, None, None).unwrap();
        assert!(!manager.current_snapshot().get("B").unwrap().is_active());

        manager.rebuild().unwrap();
        let b = manager.current_snapshot().get("B").cloned().unwrap();
        assert!(b.is_active());
        assert_eq!(b.pipe, Some(2));
    }

    #[test]
    fn test_turn_on_right_of_primary() {
        let manager = manager();
        manager
            .turn_on("B", 11, None, Some(Placement::Right))
            .unwrap();

        let cmd = manager.server().commands().pop().unwrap();
        assert_eq!((cmd.x, cmd.y), (1920, 0));
        let screen = manager.server().state().screen;
        assert_eq!((screen.width, screen.height), (1920 + 1280, 1080));
    }

    #[test]
    fn test_turn_on_below_primary() {
        let manager = manager();
        manager
            .turn_on("B", 10, None, Some(Placement::Below))
            .unwrap();

        let cmd = manager.server().commands().pop().unwrap();
        assert_eq!((cmd.x, cmd.y), (0, 1080));
    }

    #[test]
    fn test_mode_change_keeps_own_pipe() {
        let manager = manager();
        let pipe = manager.turn_on("A", 11, None, None).unwrap();
        assert_eq!(pipe, 1);
    }

    #[test]
    fn test_turn_on_unknown_display() {
        let manager = manager();
        assert!(matches!(
            manager.turn_on("DP-7", 10, None, None),
            Err(AppError::DisplayNotFound(_))
        ));
        assert!(manager.server().commands().is_empty());
    }

    #[test]
    fn test_turn_on_unsupported_mode() {
        let manager = manager();
        assert!(matches!(
            manager.turn_on("B", 99, None, None),
            Err(AppError::UnsupportedMode { mode: 99, .. })
        ));
    }

    #[test]
    fn test_turn_on_without_free_pipe() {
        let manager = manager();
        manager.turn_on("B", 11, None, None).unwrap();
        manager.server().upsert_output(output(102, "C", None, &[10]));

        assert!(matches!(
            manager.turn_on("C", 10, None, None),
            Err(AppError::NoFreePipe { .. })
        ));
    }

    #[test]
    fn test_rejected_configuration() {
        let manager = manager();
        manager.server().state().reject_with = Some(SetConfigStatus::Failed);

        let err = manager.turn_on("B", 11, None, None).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationRejected { pipe: 2, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rejected_configuration_keeps_screen_size() {
        let manager = manager();
        manager.server().state().reject_with = Some(SetConfigStatus::Failed);

        let err = manager
            .turn_on("B", 11, None, Some(Placement::Right))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigurationRejected { .. }));

        let screen = manager.server().state().screen;
        assert_eq!((screen.width, screen.height), (1920, 1080));
    }

    #[test]
    fn test_turn_off_ignores_pipe_not_driving_display() {
        let manager = manager();
        manager.turn_off("A", Some(2)).unwrap();

        let cmd = manager.server().commands().pop().unwrap();
        assert_eq!(cmd.pipe, 1);
        assert_eq!(cmd.mode, None);

        manager.rebuild().unwrap();
        assert!(!manager.current_snapshot().get("A").unwrap().is_active());
    }

    #[test]
    fn test_turn_off_unknown_pipe() {
        let manager = manager();
        assert!(matches!(
            manager.turn_off("A", Some(9)),
            Err(AppError::UnknownPipe(9))
        ));
        assert!(manager.server().commands().is_empty());
    }

    #[test]
    fn test_turn_off_releases_pipe() {
        let manager = manager();
        manager.turn_off("A", Some(1)).unwrap();

        let cmd = manager.server().commands().pop().unwrap();
        assert_eq!(cmd.mode, None);
        assert!(cmd.outputs.is_empty());

        manager.rebuild().unwrap();
        let snapshot = manager.current_snapshot();
        assert!(snapshot.all_inactive());
        assert_eq!(allocate_pipe(&snapshot, "B", None).unwrap(), 1);
    }

    #[test]
    fn test_turn_off_inactive_display_is_noop() {
        let manager = manager();
        manager.turn_off("B", None).unwrap();
        assert!(manager.server().commands().is_empty());
    }

    #[test]
    fn test_turn_off_shared_pipe_keeps_other_outputs() {
        let manager = manager();
        {
            let mut state = manager.server().state();
            state.pipes[0].outputs.push(101);
            state.outputs[1].pipe = Some(1);
        }

        manager.turn_off("A", None).unwrap();
        let cmd = manager.server().commands().pop().unwrap();
        assert_eq!(cmd.mode, Some(10));
        assert_eq!(cmd.outputs, vec![101]);
    }

    #[test]
    fn test_handler_slot_can_be_rebound() {
        let manager = manager();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        manager.dispatch(TopologyEvent::DisplayAdded);

        let counter = Arc::clone(&first);
        manager.set_event_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.dispatch(TopologyEvent::DisplayAdded);

        let counter = Arc::clone(&second);
        manager.set_event_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.dispatch(TopologyEvent::DisplayAdded);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebuild_keeps_previous_snapshot() {
        let manager = manager();
        manager.server().upsert_output(output(102, "C", None, &[10]));
        manager.rebuild().unwrap();

        assert_eq!(manager.previous_snapshot().len(), 2);
        assert_eq!(manager.current_snapshot().len(), 3);
    }

    /// (turn on?, display index, pipe hint)
    fn arb_request() -> impl Strategy<Value = (bool, usize, Option<PipeId>)> {
        (any::<bool>(), 0usize..3, proptest::option::of(1u32..4))
    }

    proptest! {
        #[test]
        fn prop_requests_never_share_a_pipe(
            requests in proptest::collection::vec(arb_request(), 1..12),
        ) {
            let manager = manager();
            manager.server().upsert_output(output(102, "C", None, &[10]));
            manager.rebuild().unwrap();

            for (on, index, hint) in requests {
                let name = ["A", "B", "C"][index];
                // NoFreePipe and UnknownPipe are expected along the way
                let _ = if on {
                    manager.turn_on(name, 10, hint, Some(Placement::Right)).map(|_| ())
                } else {
                    manager.turn_off(name, hint)
                };

                manager.rebuild().unwrap();
                let snapshot = manager.current_snapshot();
                prop_assert!(snapshot.pipe_conflicts().is_empty());
                prop_assert!(snapshot.active().count() <= snapshot.pipes.len());
            }
        }
    }
}
