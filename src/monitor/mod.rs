mod allocator;
mod backend;
mod enumeration;
mod manager;
mod subscription;

pub use backend::{
    DisplayRecord, Mode, ModeFlags, ModeId, OutputHandle, PipeId, Placement, Snapshot,
    TopologyEvent,
};
#[cfg(test)]
pub use backend::{Role, Status};
pub use manager::DisplayManager;
pub use subscription::TopologyMonitor;
