pub mod ai;
pub mod collision;
pub mod movement;
pub mod spawn;
pub mod turns;
