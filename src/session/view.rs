use crate::game::state::{Controller, EntityId, EntityKind, Side};
use crate::util::vec2::Vec2;

/// One entity as the presentation layer should draw it this frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub side: Side,
    /// Interpolated for remote entities, simulated for local ones
    pub position: Vec2,
    pub controller: Controller,
    pub active: bool,
    pub boosted: bool,
    pub launched: bool,
    pub reached_checkpoint: bool,
}
