//! Types shared between the display core and its collaborators

/// Rectangle in root window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// `[x, y, width, height]` as CARDINALs
    pub fn to_cardinals(&self) -> [u32; 4] {
        [self.x as u32, self.y as u32, self.width, self.height]
    }
}
