// SPDX-License-Identifier: GPL-3.0-only
//! Headless consumer of the topology event queue
mod messages;
mod state;
mod update;

pub use messages::AppMsg;
pub use state::AppState;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::monitor::TopologyEvent;
use crate::protocols::DisplayServer;

impl<S: DisplayServer + 'static> AppState<S> {
    /// Handle events until the monitor thread closes the queue
    pub async fn run(mut self, mut events: UnboundedReceiver<TopologyEvent>) {
        while let Some(event) = events.recv().await {
            self.update(AppMsg::Topology(event)).await;
        }
        debug!("Event queue closed");
    }
}
