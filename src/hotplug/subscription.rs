// SPDX-License-Identifier: GPL-3.0-only
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::config::{APPID, Config};
use crate::error::{AppError, Result};
use crate::monitor::{DisplayManager, TopologyEvent, TopologyMonitor};
use crate::protocols::DisplayServer;

/// Make sure only one monitor runs per user session
///
/// Two monitors would both try to restore the primary display and race for
/// the same pipes. The returned file holds the lock until dropped.
pub fn acquire_instance_lock() -> Result<File> {
    let lock_path = dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("{APPID}.lock"));

    let lock_file = File::create(&lock_path)?;

    // flock is per open file description, the lock goes away with the process
    let lock_result = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

    if lock_result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Err(AppError::fatal(format!(
                "another instance holds {}",
                lock_path.display()
            )));
        }
        return Err(AppError::Io(err));
    }

    debug!("Acquired instance lock {}", lock_path.display());
    Ok(lock_file)
}

/// Start the topology monitor on its own thread
///
/// Returns a manager handle for the front-end, the receiving end of the
/// event queue and the monitor thread. The queue closes when the monitor
/// thread ends; joining it yields the error that stopped it.
pub fn spawn_monitor<S>(
    server: S,
    config: &Config,
) -> Result<(DisplayManager<S>, UnboundedReceiver<TopologyEvent>, JoinHandle<AppError>)>
where
    S: DisplayServer + 'static,
{
    let (tx, rx) = unbounded_channel();

    let monitor = TopologyMonitor::new(server, config, move |event| {
        // Never blocks: the channel is unbounded
        if tx.send(event).is_err() {
            warn!(%event, "Event queue closed, dropping event");
        }
    })?;
    let manager = monitor.manager();

    let thread_manager = manager.clone();
    let handle = std::thread::Builder::new()
        .name("topology-monitor".to_string())
        .spawn(move || {
            let err = monitor.run();
            // Drops the queue sender so the consumer sees the end
            thread_manager.clear_event_handler();
            err
        })?;

    Ok((manager, rx, handle))
}
