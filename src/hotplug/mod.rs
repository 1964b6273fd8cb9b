/// Display hotplug delivery
///
/// The topology monitor blocks on the display server in a dedicated thread.
/// Its events reach the front-end through an unbounded FIFO channel, so the
/// monitor never waits for the front-end and events are never merged.

mod subscription;

pub use subscription::{acquire_instance_lock, spawn_monitor};
