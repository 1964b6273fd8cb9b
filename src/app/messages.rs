use crate::monitor::{ModeId, PipeId, Placement, TopologyEvent};

#[derive(Clone, Debug, PartialEq)]
pub enum AppMsg {
    /// Sent from the topology monitor
    Topology(TopologyEvent),
    TurnOn {
        name: String,
        mode: ModeId,
        pipe: Option<PipeId>,
        placement: Option<Placement>,
    },
    TurnOff {
        name: String,
        pipe: Option<PipeId>,
    },
}
