pub mod authority;
pub mod constants;
pub mod input;
pub mod interpolation;
pub mod position_buffer;
pub mod state;
pub mod systems;
