use std::collections::HashSet;
use winit::keyboard::NamedKey;

use crate::cli::HELP_KEYS;
use crate::ui::Viewer;
use crate::ui::render::{BG_COLOR, draw_text, fill_rect, rgb, text_width};
use crate::viewer::{Phase, ViewerEvent};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const NAV_BAR_H: u32 = 30;
const PROGRESS_H: u32 = 3;
const TEXT_SCALE: u32 = 2;
const PAGE_SCROLL: f32 = 0.9;
const WHITE: (u8, u8, u8, u8) = (255, 255, 255, 255);
const HINT: &str = "Drop a cbz, jpg, png, gif, webp or avif file here";

// ---------------------------------------------------------------------------
// Per-frame input and overlay state
// ---------------------------------------------------------------------------

pub struct ViewerState {
    pub scroll_step: f32,
    pub show_help: bool,

    // Keys pressed (or auto-repeated) since the last frame
    pub keys_pressed: HashSet<NamedKey>,
    pub chars_pressed: HashSet<char>,

    // Mouse wheel accumulator for this frame
    pub wheel_y: f32,

    /// Scroll or resize happened since the viewer last measured the strip.
    pub viewport_dirty: bool,
}

impl ViewerState {
    pub fn new(scroll_step: f32) -> Self {
        Self {
            scroll_step,
            show_help: false,
            keys_pressed: HashSet::new(),
            chars_pressed: HashSet::new(),
            wheel_y: 0.0,
            viewport_dirty: false,
        }
    }

    fn key(&self, k: NamedKey) -> bool {
        self.keys_pressed.contains(&k)
    }

    fn char(&self, c: char) -> bool {
        self.chars_pressed.contains(&c)
    }

    /// Apply this frame's input to the viewer. Returns true if the app should quit.
    pub fn update(&mut self, viewer: &mut Viewer) -> bool {
        if self.key(NamedKey::Escape) || self.char('q') {
            return true;
        }

        if self.char('?') {
            self.show_help = !self.show_help;
        }

        if self.key(NamedKey::Home) {
            viewer.handle(ViewerEvent::JumpTo(0));
        } else if self.key(NamedKey::End) {
            viewer.handle(ViewerEvent::JumpTo(usize::MAX));
        }

        let (_, vh) = viewer.surface().viewport();
        let screen = vh as f32 * PAGE_SCROLL;
        let mut dy = -self.wheel_y * self.scroll_step;
        if self.key(NamedKey::ArrowDown) {
            dy += self.scroll_step;
        }
        if self.key(NamedKey::ArrowUp) {
            dy -= self.scroll_step;
        }
        if self.key(NamedKey::PageDown) || self.key(NamedKey::Space) {
            dy += screen;
        }
        if self.key(NamedKey::PageUp) {
            dy -= screen;
        }
        if dy != 0.0 {
            viewer.surface_mut().scroll_by(dy);
            self.viewport_dirty = true;
        }

        // Any number of scroll/resize events collapse into one pass per frame.
        if self.viewport_dirty {
            self.viewport_dirty = false;
            viewer.handle(ViewerEvent::ViewportChanged);
        }

        self.keys_pressed.clear();
        self.chars_pressed.clear();
        self.wheel_y = 0.0;

        false
    }

    /// Render into the softbuffer framebuffer (u32 per pixel, 0x00RRGGBB).
    pub fn render(&self, viewer: &Viewer, frame: &mut [u32], fb_w: u32, fb_h: u32) {
        frame.fill(rgb(BG_COLOR[0], BG_COLOR[1], BG_COLOR[2]));

        viewer.surface().draw(frame, fb_w, fb_h);

        let mid_y = fb_h as i32 / 2;
        match viewer.phase() {
            Phase::Empty => {
                let msg = viewer.notice().unwrap_or(HINT);
                let color = if viewer.notice().is_some() { (255, 120, 120, 255) } else { WHITE };
                let x = (fb_w as i32 - text_width(msg, TEXT_SCALE)) / 2;
                draw_text(frame, fb_w, fb_h, msg, x.max(10), mid_y, TEXT_SCALE, color);
            }
            Phase::Loading if viewer.surface().len() == 0 => {
                let x = (fb_w as i32 - text_width("Loading...", TEXT_SCALE)) / 2;
                draw_text(frame, fb_w, fb_h, "Loading...", x, mid_y, TEXT_SCALE, WHITE);
            }
            _ => {}
        }

        self.render_nav_bar(viewer, frame, fb_w, fb_h);

        if self.show_help {
            fill_rect(frame, fb_w, fb_h, 0, 0, fb_w, fb_h, (0, 0, 0, 200));
            let mut y = 20;
            for line in HELP_KEYS.lines() {
                draw_text(frame, fb_w, fb_h, line, 20, y, TEXT_SCALE, WHITE);
                y += 24;
            }
        }
    }

    fn render_nav_bar(&self, viewer: &Viewer, frame: &mut [u32], fb_w: u32, fb_h: u32) {
        let Some(doc) = viewer.document() else { return };
        let progress = viewer.progress();
        let bar_y = fb_h.saturating_sub(NAV_BAR_H) as i32;

        fill_rect(frame, fb_w, fb_h, 0, bar_y, fb_w, NAV_BAR_H, (0, 0, 0, 178));
        let fill_w = (fb_w as f32 * progress.fraction) as u32;
        fill_rect(frame, fb_w, fb_h, 0, bar_y, fill_w, PROGRESS_H, (80, 160, 255, 255));

        let text_y = bar_y + ((NAV_BAR_H - 7 * TEXT_SCALE) / 2) as i32 + 1;
        draw_text(frame, fb_w, fb_h, &doc.title(), 10, text_y, TEXT_SCALE, WHITE);

        let label = progress.label();
        let x = fb_w as i32 - text_width(&label, TEXT_SCALE) - 10;
        draw_text(frame, fb_w, fb_h, &label, x, text_y, TEXT_SCALE, WHITE);
    }
}
