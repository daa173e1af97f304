use image::{GenericImageView, ImageFormat};

use crate::error::{Result, ViewerError};
use crate::fetcher::PagePayload;
use crate::ui::render::blit_scaled;

/// The display side of the page window. The viewer hands it payloads to show
/// and asks it what is visible.
pub trait RenderSurface {
    /// Show `payload` at its ordinal position. The surface owns the payload from here on.
    fn insert(&mut self, ordinal: usize, payload: PagePayload) -> Result<()>;

    /// Detach the visual for `ordinal`. Returns false if it was not shown.
    fn remove(&mut self, ordinal: usize) -> bool;

    /// Fraction of the viewport height covered by each shown page, in display order.
    fn measure_visibility(&self) -> Vec<(usize, f32)>;

    /// Drop every visual and reset scrolling.
    fn clear(&mut self);

    /// Bring `ordinal` to the top of the viewport. False if it is not shown.
    fn scroll_to(&mut self, ordinal: usize) -> bool;
}

// ---------------------------------------------------------------------------
// Decoded page (CPU side)
// ---------------------------------------------------------------------------

pub struct PageVisual {
    pub ordinal: usize,
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub source_name: String,
}

impl PageVisual {
    /// Decode a fetched payload. The raw bytes are released when this returns,
    /// whether decoding succeeded or not.
    pub fn decode(payload: PagePayload) -> Result<PageVisual> {
        let decoded = match ImageFormat::from_extension(&payload.extension) {
            Some(format) => image::load_from_memory_with_format(&payload.bytes, format),
            None => image::load_from_memory(&payload.bytes),
        };
        let img = decoded.map_err(|e| ViewerError::decode_failed(&payload.source_name, e))?;

        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ViewerError::decode_failed(&payload.source_name, "empty image"));
        }
        Ok(PageVisual {
            ordinal: payload.ordinal,
            rgba: img.to_rgba8().into_raw(),
            width,
            height,
            source_name: payload.source_name,
        })
    }
}

// ---------------------------------------------------------------------------
// Vertical scroll strip
// ---------------------------------------------------------------------------

/// Pages stacked top to bottom, each scaled to the viewport width.
pub struct ScrollStrip {
    visuals: Vec<PageVisual>,
    scroll_y: f32,
    viewport_w: u32,
    viewport_h: u32,
    /// Set until the user scrolls a fresh document; while set, pages arriving
    /// above the viewport push content down instead of being anchored.
    at_start: bool,
}

impl ScrollStrip {
    pub fn new(viewport_w: u32, viewport_h: u32) -> Self {
        Self {
            visuals: Vec::new(),
            scroll_y: 0.0,
            viewport_w,
            viewport_h,
            at_start: true,
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.viewport_w, self.viewport_h)
    }

    #[cfg(test)]
    pub fn scroll_offset(&self) -> f32 {
        self.scroll_y
    }

    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    #[cfg(test)]
    pub fn ordinals(&self) -> Vec<usize> {
        self.visuals.iter().map(|v| v.ordinal).collect()
    }

    fn page_height(&self, v: &PageVisual) -> f32 {
        v.height as f32 * self.viewport_w as f32 / v.width as f32
    }

    pub fn content_height(&self) -> f32 {
        self.visuals.iter().map(|v| self.page_height(v)).sum()
    }

    /// Top edge (in strip coordinates) of the visual at `pos`.
    fn top_of(&self, pos: usize) -> f32 {
        self.visuals[..pos].iter().map(|v| self.page_height(v)).sum()
    }

    fn clamp_scroll(&mut self) {
        let max = (self.content_height() - self.viewport_h as f32).max(0.0);
        self.scroll_y = self.scroll_y.clamp(0.0, max);
    }

    pub fn scroll_by(&mut self, dy: f32) {
        self.scroll_y += dy;
        self.at_start = false;
        self.clamp_scroll();
    }

    /// Resize the viewport, keeping the page at the top edge in place.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        let anchor = self.anchor();
        self.viewport_w = width.max(1);
        self.viewport_h = height.max(1);
        if let Some((pos, frac)) = anchor {
            let h = self.page_height(&self.visuals[pos]);
            self.scroll_y = self.top_of(pos) + frac * h;
        }
        self.clamp_scroll();
    }

    /// Visual at the viewport's top edge and how far into it the edge sits.
    fn anchor(&self) -> Option<(usize, f32)> {
        let mut top = 0.0;
        for (pos, v) in self.visuals.iter().enumerate() {
            let h = self.page_height(v);
            if top + h > self.scroll_y {
                return Some((pos, (self.scroll_y - top) / h));
            }
            top += h;
        }
        None
    }

    pub fn draw(&self, frame: &mut [u32], fb_w: u32, fb_h: u32) {
        let scale_x = fb_w as f32 / self.viewport_w as f32;
        let mut top = 0.0;
        for v in &self.visuals {
            let h = self.page_height(v);
            let y0 = top - self.scroll_y;
            if y0 + h > 0.0 && y0 < self.viewport_h as f32 {
                let scale = self.viewport_w as f32 / v.width as f32 * scale_x;
                blit_scaled(frame, fb_w, fb_h, &v.rgba, v.width, v.height, 0.0, y0, scale);
            }
            top += h;
        }
    }

    fn insert_visual(&mut self, visual: PageVisual) {
        let pos = self
            .visuals
            .iter()
            .position(|v| v.ordinal > visual.ordinal)
            .unwrap_or(self.visuals.len());
        let top = self.top_of(pos);
        let h = self.page_height(&visual);
        self.visuals.insert(pos, visual);

        if !self.at_start && top <= self.scroll_y {
            self.scroll_y += h;
        }
        self.clamp_scroll();
    }
}

impl RenderSurface for ScrollStrip {
    fn insert(&mut self, ordinal: usize, payload: PagePayload) -> Result<()> {
        if self.visuals.iter().any(|v| v.ordinal == ordinal) {
            return Ok(());
        }
        let visual = PageVisual::decode(payload)?;
        log::debug!(
            "[strip] insert page {} ({}x{}, {})",
            ordinal,
            visual.width,
            visual.height,
            visual.source_name
        );
        self.insert_visual(visual);
        Ok(())
    }

    fn remove(&mut self, ordinal: usize) -> bool {
        let Some(pos) = self.visuals.iter().position(|v| v.ordinal == ordinal) else {
            return false;
        };
        let top = self.top_of(pos);
        let h = self.page_height(&self.visuals[pos]);
        self.visuals.remove(pos);

        if top + h <= self.scroll_y {
            self.scroll_y -= h;
        } else if top < self.scroll_y {
            self.scroll_y = top;
        }
        self.clamp_scroll();
        true
    }

    fn measure_visibility(&self) -> Vec<(usize, f32)> {
        let vh = self.viewport_h as f32;
        if vh <= 0.0 {
            return Vec::new();
        }
        let view_top = self.scroll_y;
        let view_bottom = self.scroll_y + vh;

        let mut top = 0.0;
        self.visuals
            .iter()
            .map(|v| {
                let bottom = top + self.page_height(v);
                let visible = bottom.min(view_bottom) - top.max(view_top);
                top = bottom;
                (v.ordinal, (visible / vh).clamp(0.0, 1.0))
            })
            .collect()
    }

    fn clear(&mut self) {
        self.visuals.clear();
        self.scroll_y = 0.0;
        self.at_start = true;
    }

    fn scroll_to(&mut self, ordinal: usize) -> bool {
        let Some(pos) = self.visuals.iter().position(|v| v.ordinal == ordinal) else {
            return false;
        };
        self.scroll_y = self.top_of(pos);
        self.at_start = false;
        self.clamp_scroll();
        true
    }
}
