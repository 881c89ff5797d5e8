//! Parsing layout descriptions returned by document models.
//!
//! A layout pass returns text like:
//!
//! ```text
//! [12,30,988,80], title, [bold][14,90,990,400], para[20,420,500,700], fig
//! ```
//!
//! Each group is a box on a 1000×1000 reference grid, a lowercase label, and an
//! optional list of tags. We extract groups independently of whether the whole
//! string is well formed, because models are sloppy about separators.

use std::sync::LazyLock;

use regex::Regex;

use crate::prelude::*;

/// Label used when we can't make sense of the layout and OCR the whole page.
pub const DISTORTED_PAGE_LABEL: &str = "distorted_page";

/// Label for figures. We never ask the model to read these.
pub const FIGURE_LABEL: &str = "fig";

/// Side length of the reference grid used by layout boxes.
pub const REFERENCE_SIZE: u32 = 1000;

/// One group of layout output: `[x1,y1,x2,y2], label, [tags]`.
static LAYOUT_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+),\s*(\d+),\s*(\d+),\s*(\d+)\],\s*([a-z_]+)(?:,\s*\[(.*?)\])?")
        .expect("failed to compile layout regex")
});

/// A pixel-space bounding box.
pub type BBox = [u32; 4];

/// A region announced by the layout pass, before its contents are read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutRegion {
    /// Box on the reference grid, as emitted by the model.
    pub bbox: [u64; 4],

    /// The region's label, such as `para`, `tab` or `fig`.
    pub label: String,

    /// Any extra tags.
    pub tags: Vec<String>,
}

/// Parse a layout string. Returns nothing if the output doesn't even start
/// like a layout.
pub fn parse_layout(layout: &str) -> Vec<LayoutRegion> {
    if !layout.trim_start().starts_with('[') {
        return vec![];
    }
    LAYOUT_GROUP_RE
        .captures_iter(layout)
        .filter_map(|caps| {
            let coord = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();
            let bbox = [coord(1)?, coord(2)?, coord(3)?, coord(4)?];
            let label = caps.get(5)?.as_str().to_owned();
            let tags = caps
                .get(6)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.split(',').map(|t| t.trim().to_owned()).collect())
                .unwrap_or_default();
            Some(LayoutRegion { bbox, label, tags })
        })
        .collect()
}

/// Is this layout output delimited the way a real layout should be?
pub fn is_bracket_delimited(layout: &str) -> bool {
    let trimmed = layout.trim();
    trimmed.starts_with('[') && trimmed.ends_with(']')
}

/// Parse a layout string, falling back to a single whole-page region if the
/// output is unusable.
pub fn parse_layout_or_whole_page(layout: &str) -> Vec<LayoutRegion> {
    let regions = parse_layout(layout);
    if regions.is_empty() || !is_bracket_delimited(layout) {
        debug!(%layout, "Unusable layout, treating page as a single region");
        return vec![LayoutRegion {
            bbox: [0, 0, u64::from(REFERENCE_SIZE), u64::from(REFERENCE_SIZE)],
            label: DISTORTED_PAGE_LABEL.to_owned(),
            tags: vec![],
        }];
    }
    regions
}

/// Map a box from the reference grid onto an image of `width × height`
/// pixels. The result is clamped to the image and has `x1 <= x2`, `y1 <= y2`.
pub fn rescale_bbox(bbox: [u64; 4], width: u32, height: u32) -> BBox {
    let scale = |value: u64, side: u32| -> u32 {
        let scaled = value as f64 * f64::from(side) / f64::from(REFERENCE_SIZE);
        // Float-to-int casts saturate, so this can't overflow.
        (scaled as u32).min(side)
    };
    let (x1, x2) = ordered(scale(bbox[0], width), scale(bbox[2], width));
    let (y1, y2) = ordered(scale(bbox[1], height), scale(bbox[3], height));
    [x1, y1, x2, y2]
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b { (a, b) } else { (b, a) }
}
