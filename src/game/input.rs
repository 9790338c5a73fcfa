use crate::util::vec2::Vec2;

/// Per-frame input sampled by the presentation layer
///
/// `action` is the ability key in pursuit mode and the launch key in
/// turn-based mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub action: bool,
}

impl InputState {
    /// Unit direction from the held keys (zero if none or they cancel out)
    pub fn direction(&self) -> Vec2 {
        let x = (self.right as i8 - self.left as i8) as f32;
        let y = (self.down as i8 - self.up as i8) as f32;
        Vec2::new(x, y).normalize()
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}
