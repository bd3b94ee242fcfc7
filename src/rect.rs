//! Integer rectangle for compositing targets.

/// A target rectangle inside a destination buffer.
///
/// The origin may be negative; compositing clips to both the rectangle and
/// the destination buffer bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Top-left offset that centers a `w`x`h` picture inside this rectangle.
    /// Negative when the picture is larger than the rectangle.
    #[must_use]
    pub(crate) fn centered_origin(&self, w: u32, h: u32) -> (i32, i32) {
        let dx = (self.width as i64 - w as i64) / 2;
        let dy = (self.height as i64 - h as i64) / 2;
        (self.x + dx as i32, self.y + dy as i32)
    }

    #[must_use]
    pub(crate) fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    #[must_use]
    pub(crate) fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centers_smaller_pictures() {
        let area = Rect::new(10, 10, 20, 20);
        assert_eq!(area.centered_origin(10, 10), (15, 15));
        assert_eq!(area.centered_origin(20, 20), (10, 10));
    }

    #[test]
    fn larger_picture_centers_with_negative_origin() {
        let area = Rect::new(0, 0, 10, 10);
        assert_eq!(area.centered_origin(20, 14), (-5, -2));
    }
}
