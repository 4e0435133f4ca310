use crate::model::PageSize;

/// Page margin on all four sides, in points.
pub const MARGIN: f32 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageDimensions {
    pub width: f32,  // points
    pub height: f32, // points
}

const A4: PageDimensions = PageDimensions {
    width: 595.28,
    height: 841.89,
};
const A5: PageDimensions = PageDimensions {
    width: 419.53,
    height: 595.28,
};
const LETTER: PageDimensions = PageDimensions {
    width: 612.0,
    height: 792.0,
};

impl PageDimensions {
    pub fn content_width(&self, margin: f32) -> f32 {
        self.width - 2.0 * margin
    }

    pub fn content_height(&self, margin: f32) -> f32 {
        self.height - 2.0 * margin
    }

    /// Width and height in twentieths of a point, as used by OOXML.
    pub fn twips(&self) -> (u32, u32) {
        (
            (self.width * 20.0).round() as u32,
            (self.height * 20.0).round() as u32,
        )
    }
}

impl PageSize {
    /// `Custom` has no plumbed-through dimensions and renders as Letter.
    pub fn dimensions(self) -> PageDimensions {
        match self {
            PageSize::A4 => A4,
            PageSize::A5 => A5,
            PageSize::Letter | PageSize::Custom => LETTER,
        }
    }
}

/// Resolve a page-size token. Unrecognized tokens resolve to Letter.
pub fn resolve(token: &str) -> PageDimensions {
    PageSize::from_token(token).dimensions()
}
