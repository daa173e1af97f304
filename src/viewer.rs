use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::archive::{Document, title_of};
use crate::error::{Result, ViewerError};
use crate::fetcher::{FetchRequest, PagePayload, PageRequester};
use crate::surface::RenderSurface;

pub const DEFAULT_WINDOW_RADIUS: usize = 5;
pub const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(10);

/// A page counts as current once it covers more than this share of the viewport.
const VISIBLE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Pages kept on each side of the current page.
    pub window_radius: usize,
    pub workers: usize,
    /// How long a page request may stay unanswered before it is re-issued.
    pub max_hold: Duration,
    pub scroll_step: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window_radius: DEFAULT_WINDOW_RADIUS,
            workers: default_workers(),
            max_hold: DEFAULT_MAX_HOLD,
            scroll_step: 60.0,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 8)
}

// ---------------------------------------------------------------------------
// Controller state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    /// Document open, initial window still being fetched.
    Loading,
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// 1-based page number, 0 when nothing is open.
    pub page: usize,
    pub total: usize,
    pub fraction: f32,
}

impl Progress {
    const NONE: Progress = Progress { page: 0, total: 0, fraction: 0.0 };

    pub fn label(&self) -> String {
        format!("{}/{}", self.page, self.total)
    }
}

/// Everything that can change the viewer. All mutation goes through
/// [`ViewerController::handle`].
#[derive(Debug)]
pub enum ViewerEvent {
    Open(PathBuf),
    PageFetched {
        generation: u64,
        ordinal: usize,
        result: Result<PagePayload>,
    },
    /// Scroll or resize happened; re-measure the surface.
    ViewportChanged,
    JumpTo(usize),
    Close,
}

/// Book-keeping for a page that has been handed to the surface.
#[derive(Debug)]
struct LoadedPage {
    source_name: String,
    bytes: u64,
}

pub struct ViewerController<S, R> {
    surface: S,
    requester: R,
    radius: usize,
    max_hold: Duration,

    document: Option<Arc<Document>>,
    generation: u64,
    phase: Phase,
    current_page: usize,

    loaded: BTreeMap<usize, LoadedPage>,
    in_flight: HashMap<usize, Instant>,
    failed: HashSet<usize>,
    /// Target of a Home/End jump that has not been rendered yet.
    pending_jump: Option<usize>,

    progress: Progress,
    /// User-facing message for the empty/error state.
    notice: Option<String>,
}

impl<S: RenderSurface, R: PageRequester> ViewerController<S, R> {
    pub fn new(surface: S, requester: R, config: &ViewerConfig) -> Self {
        Self {
            surface,
            requester,
            radius: config.window_radius.max(1),
            max_hold: config.max_hold,
            document: None,
            generation: 0,
            phase: Phase::Empty,
            current_page: 0,
            loaded: BTreeMap::new(),
            in_flight: HashMap::new(),
            failed: HashSet::new(),
            pending_jump: None,
            progress: Progress::NONE,
            notice: None,
        }
    }

    pub fn handle(&mut self, event: ViewerEvent) {
        match event {
            ViewerEvent::Open(path) => {
                // Failures are logged and kept in `notice`.
                let _ = self.open_document(&path);
            }
            ViewerEvent::PageFetched { generation, ordinal, result } => {
                self.on_payload_arrived(generation, ordinal, result);
            }
            ViewerEvent::ViewportChanged => {
                let visibility = self.surface.measure_visibility();
                self.on_visibility_changed(&visibility);
            }
            ViewerEvent::JumpTo(ordinal) => self.jump_to(ordinal),
            ViewerEvent::Close => self.close(),
        }
    }

    // -- accessors -----------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_deref()
    }

    pub fn total_pages(&self) -> usize {
        self.document.as_ref().map_or(0, |d| d.total_pages())
    }

    #[cfg(test)]
    pub fn loaded_ordinals(&self) -> Vec<usize> {
        self.loaded.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, ordinal: usize) -> bool {
        self.in_flight.contains_key(&ordinal)
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.loaded.values().map(|p| p.bytes).sum()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[cfg(test)]
    pub fn requester(&self) -> &R {
        &self.requester
    }

    /// Ordinals that must be loaded around the current page.
    pub fn window(&self) -> Option<RangeInclusive<usize>> {
        let total = self.total_pages();
        if total == 0 {
            return None;
        }
        let lo = self.current_page.saturating_sub(self.radius);
        let hi = (self.current_page + self.radius).min(total - 1);
        Some(lo..=hi)
    }

    // -- document lifecycle --------------------------------------------------

    pub fn open_document(&mut self, path: &Path) -> Result<()> {
        self.teardown();

        let doc = match Document::open(path) {
            Ok(doc) => Arc::new(doc),
            Err(e) => {
                if e.is_empty_document() {
                    log::info!("{}", e);
                    self.notice = Some(format!("{}: no pages to show", title_of(path)));
                } else {
                    log::error!("Could not open {:?}: {}", path, e);
                    self.notice = Some(format!("Could not open: {}", e));
                }
                return Err(e);
            }
        };

        log::info!(
            "Opened {:?}: {} {} (generation {})",
            doc.path,
            doc.total_pages(),
            if doc.is_single_image { "image" } else { "pages" },
            self.generation
        );
        let total = doc.total_pages();
        self.document = Some(Arc::clone(&doc));
        self.phase = Phase::Loading;
        self.update_progress();

        // Initial window: the first two radii of pages.
        let last = (self.radius * 2).saturating_sub(1).min(total - 1);
        for ordinal in 0..=last {
            self.request(&doc, ordinal);
        }
        self.reconcile();
        Ok(())
    }

    /// Release every page and return to `Empty`.
    pub fn close(&mut self) {
        if self.document.is_some() {
            log::info!("Closing document (generation {})", self.generation);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.generation += 1;
        self.requester.retire(self.generation);

        self.surface.clear();
        self.loaded.clear();
        self.in_flight.clear();
        self.failed.clear();
        self.pending_jump = None;
        self.document = None;
        self.current_page = 0;
        self.phase = Phase::Empty;
        self.progress = Progress::NONE;
        self.notice = None;
    }

    // -- protocol ------------------------------------------------------------

    pub fn on_payload_arrived(
        &mut self,
        generation: u64,
        ordinal: usize,
        result: Result<PagePayload>,
    ) {
        if generation != self.generation {
            let stale = ViewerError::StaleGeneration { got: generation, active: self.generation };
            log::debug!("[viewer] discard page {}: {}", ordinal, stale);
            return;
        }
        if self.document.is_none() {
            return;
        }
        self.in_flight.remove(&ordinal);

        match result {
            Err(e) => {
                log::warn!("Page {} failed: {}", ordinal + 1, e);
                self.mark_failed(ordinal);
            }
            Ok(_) if self.loaded.contains_key(&ordinal) => {
                log::debug!("[viewer] page {} already loaded", ordinal);
            }
            Ok(_) if !self.in_window(ordinal) => {
                log::debug!("[viewer] page {} arrived outside the window", ordinal);
            }
            Ok(payload) => {
                let record = LoadedPage {
                    source_name: payload.source_name.clone(),
                    bytes: payload.mem_size(),
                };
                match self.surface.insert(ordinal, payload) {
                    Ok(()) => {
                        log::debug!("[viewer] loaded page {} ({})", ordinal, record.source_name);
                        self.loaded.insert(ordinal, record);
                        self.update_progress();
                    }
                    Err(e) => {
                        log::warn!("Page {} failed: {}", ordinal + 1, e);
                        self.mark_failed(ordinal);
                    }
                }
            }
        }

        if self.pending_jump == Some(ordinal) && self.surface.scroll_to(ordinal) {
            self.pending_jump = None;
        }
        let visibility = self.surface.measure_visibility();
        self.on_visibility_changed(&visibility);
    }

    /// Pick the current page from per-page visibility, then reconcile.
    pub fn on_visibility_changed(&mut self, visibility: &[(usize, f32)]) {
        if self.document.is_none() {
            return;
        }
        if self.pending_jump.is_none() {
            let visible = visibility
                .iter()
                .filter(|&&(ordinal, fraction)| {
                    fraction > VISIBLE_THRESHOLD && self.loaded.contains_key(&ordinal)
                })
                .map(|&(ordinal, _)| ordinal)
                .min();

            if let Some(page) = visible {
                if page != self.current_page {
                    log::debug!("[viewer] current page {} -> {}", self.current_page, page);
                    self.current_page = page;
                    self.update_progress();
                }
            }
        }
        self.reconcile();
    }

    /// Move to `ordinal` (clamped), scrolling there if it is already shown.
    pub fn jump_to(&mut self, ordinal: usize) {
        let total = self.total_pages();
        if total == 0 {
            return;
        }
        let ordinal = ordinal.min(total - 1);
        self.current_page = ordinal;
        self.update_progress();

        if self.surface.scroll_to(ordinal) {
            self.pending_jump = None;
        } else {
            self.pending_jump = Some(ordinal);
        }
        self.reconcile();
    }

    /// Request what the window lacks and evict what lies outside it.
    fn reconcile(&mut self) {
        let Some(doc) = self.document.clone() else { return };
        let Some(window) = self.window() else { return };

        // Leaving the window clears a failure, so coming back retries it.
        self.failed.retain(|o| window.contains(o));

        for ordinal in window.clone() {
            if !self.loaded.contains_key(&ordinal)
                && !self.in_flight.contains_key(&ordinal)
                && !self.failed.contains(&ordinal)
            {
                self.request(&doc, ordinal);
            }
        }

        let outside: Vec<usize> = self
            .loaded
            .keys()
            .copied()
            .filter(|o| !window.contains(o))
            .collect();
        for ordinal in outside {
            self.evict(ordinal);
        }

        if self.phase == Phase::Loading && self.in_flight.is_empty() {
            log::debug!(
                "[viewer] window settled at page {} ({} pages, {} bytes)",
                self.current_page,
                self.loaded.len(),
                self.loaded_bytes()
            );
            self.phase = Phase::Steady;
        }
    }

    /// A jump whose target failed is abandoned so scrolling moves the page again.
    fn mark_failed(&mut self, ordinal: usize) {
        self.failed.insert(ordinal);
        self.abandon_jump(ordinal);
    }

    fn abandon_jump(&mut self, ordinal: usize) {
        if self.pending_jump == Some(ordinal) {
            log::debug!("[viewer] jump target {} not shown, releasing", ordinal);
            self.pending_jump = None;
        }
    }

    fn request(&mut self, doc: &Arc<Document>, ordinal: usize) {
        self.in_flight.insert(ordinal, Instant::now());
        self.requester.request(FetchRequest {
            generation: self.generation,
            ordinal,
            document: Arc::clone(doc),
        });
    }

    fn evict(&mut self, ordinal: usize) {
        if let Some(page) = self.loaded.remove(&ordinal) {
            self.surface.remove(ordinal);
            log::debug!("[viewer] evicted page {} ({} bytes)", ordinal, page.bytes);
            self.update_progress();
        }
    }

    fn in_window(&self, ordinal: usize) -> bool {
        self.window().is_some_and(|w| w.contains(&ordinal))
    }

    fn update_progress(&mut self) {
        let total = self.total_pages();
        self.progress = if total == 0 {
            Progress::NONE
        } else {
            let page = self.current_page + 1;
            Progress { page, total, fraction: page as f32 / total as f32 }
        };
    }

    // -- stalled requests ----------------------------------------------------

    /// Forget requests unanswered for longer than the hold limit so the
    /// next reconciliation issues them again.
    pub fn reap_stalled(&mut self, now: Instant) -> usize {
        let max_hold = self.max_hold;
        let mut reaped = Vec::new();
        self.in_flight.retain(|&ordinal, issued| {
            let keep = now.saturating_duration_since(*issued) < max_hold;
            if !keep {
                log::warn!("Page {} unanswered after {:?}, re-requesting", ordinal + 1, max_hold);
                reaped.push(ordinal);
            }
            keep
        });
        for &ordinal in &reaped {
            self.abandon_jump(ordinal);
        }
        if !reaped.is_empty() {
            self.reconcile();
        }
        reaped.len()
    }

    /// When the oldest outstanding request hits the hold limit.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().min().map(|issued| *issued + self.max_hold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tiny_png, write_cbz};

    // -- test doubles --------------------------------------------------------

    #[derive(Default)]
    struct RecordingSurface {
        order: Vec<usize>,
        inserts: usize,
        removes: Vec<usize>,
        clears: usize,
        visibility: Vec<(usize, f32)>,
        reject: HashSet<usize>,
    }

    impl RenderSurface for RecordingSurface {
        fn insert(&mut self, ordinal: usize, payload: PagePayload) -> Result<()> {
            if self.reject.contains(&ordinal) {
                return Err(ViewerError::decode_failed(payload.source_name, "rejected"));
            }
            let pos = self.order.iter().position(|&o| o > ordinal).unwrap_or(self.order.len());
            self.order.insert(pos, ordinal);
            self.inserts += 1;
            Ok(())
        }

        fn remove(&mut self, ordinal: usize) -> bool {
            self.removes.push(ordinal);
            let before = self.order.len();
            self.order.retain(|&o| o != ordinal);
            before != self.order.len()
        }

        fn measure_visibility(&self) -> Vec<(usize, f32)> {
            self.visibility.clone()
        }

        fn clear(&mut self) {
            self.order.clear();
            self.clears += 1;
        }

        fn scroll_to(&mut self, ordinal: usize) -> bool {
            if self.order.contains(&ordinal) {
                self.visibility = vec![(ordinal, 1.0)];
                true
            } else {
                false
            }
        }
    }

    #[derive(Default)]
    struct RecordingRequester {
        sent: Vec<FetchRequest>,
        retired: Vec<u64>,
    }

    impl RecordingRequester {
        fn ordinals_for(&self, generation: u64) -> Vec<usize> {
            self.sent
                .iter()
                .filter(|r| r.generation == generation)
                .map(|r| r.ordinal)
                .collect()
        }
    }

    impl PageRequester for RecordingRequester {
        fn request(&mut self, request: FetchRequest) {
            self.sent.push(request);
        }

        fn retire(&mut self, generation: u64) {
            self.retired.push(generation);
        }
    }

    type Controller = ViewerController<RecordingSurface, RecordingRequester>;

    fn controller(radius: usize) -> Controller {
        let config = ViewerConfig { window_radius: radius, ..ViewerConfig::default() };
        ViewerController::new(RecordingSurface::default(), RecordingRequester::default(), &config)
    }

    fn book(dir: &Path, name: &str, pages: usize) -> PathBuf {
        let png = tiny_png();
        let names: Vec<String> = (1..=pages).map(|i| format!("page{i}.png")).collect();
        let entries: Vec<(&str, &[u8])> =
            names.iter().map(|n| (n.as_str(), png.as_slice())).collect();
        write_cbz(dir, name, &entries)
    }

    fn payload(ordinal: usize) -> PagePayload {
        PagePayload {
            ordinal,
            bytes: vec![ordinal as u8; 8],
            extension: "png".into(),
            source_name: format!("page{}.png", ordinal + 1),
        }
    }

    fn deliver(c: &mut Controller, ordinal: usize) {
        let generation = c.generation();
        c.handle(ViewerEvent::PageFetched { generation, ordinal, result: Ok(payload(ordinal)) });
    }

    fn show(c: &mut Controller, ordinal: usize) {
        c.surface_mut().visibility = vec![(ordinal, 0.9)];
        c.handle(ViewerEvent::ViewportChanged);
    }

    /// Loaded pages lie inside the window and every window page is loaded,
    /// in flight or failed.
    fn assert_settled(c: &Controller) {
        let window = c.window().unwrap();
        for o in c.loaded_ordinals() {
            assert!(window.contains(&o), "page {o} loaded outside {window:?}");
        }
        for o in window.clone() {
            assert!(
                c.loaded.contains_key(&o) || c.is_in_flight(o) || c.failed.contains(&o),
                "page {o} neither loaded nor requested"
            );
        }
        assert_eq!(c.surface().order, c.loaded_ordinals());
    }

    // -- tests ---------------------------------------------------------------

    #[test]
    fn open_requests_initial_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 30)).unwrap();

        assert_eq!(c.phase(), Phase::Loading);
        assert_eq!(c.total_pages(), 30);
        assert_eq!(c.requester().ordinals_for(c.generation()), (0..=9).collect::<Vec<_>>());
        assert_eq!(c.progress().label(), "1/30");
        assert_settled(&c);
    }

    #[test]
    fn small_document_fetches_everything_and_evicts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 3)).unwrap();
        assert_eq!(c.window(), Some(0..=2));
        assert_eq!(c.requester().ordinals_for(c.generation()), [0, 1, 2]);

        for o in 0..3 {
            deliver(&mut c, o);
        }
        assert_eq!(c.loaded_ordinals(), [0, 1, 2]);
        assert!(c.surface().removes.is_empty());
        assert_eq!(c.phase(), Phase::Steady);
        assert_settled(&c);
    }

    #[test]
    fn duplicate_delivery_inserts_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 3)).unwrap();

        deliver(&mut c, 1);
        deliver(&mut c, 1);
        assert_eq!(c.surface().inserts, 1);
        assert_eq!(c.surface().order, [1]);
    }

    #[test]
    fn arrival_order_does_not_change_display_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = book(dir.path(), "a.cbz", 6);

        let mut shuffled = controller(5);
        shuffled.open_document(&path).unwrap();
        for o in [3, 1, 2] {
            deliver(&mut shuffled, o);
        }

        let mut sorted = controller(5);
        sorted.open_document(&path).unwrap();
        for o in [1, 2, 3] {
            deliver(&mut sorted, o);
        }

        assert_eq!(shuffled.surface().order, [1, 2, 3]);
        assert_eq!(shuffled.surface().order, sorted.surface().order);
    }

    #[test]
    fn stale_generation_is_never_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 3)).unwrap();
        let old = c.generation();
        c.open_document(&book(dir.path(), "b.cbz", 3)).unwrap();

        c.handle(ViewerEvent::PageFetched { generation: old, ordinal: 0, result: Ok(payload(0)) });
        assert_eq!(c.surface().inserts, 0);
        assert!(c.loaded_ordinals().is_empty());
    }

    #[test]
    fn replacing_a_document_discards_late_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 4)).unwrap();
        let gen_a = c.generation();
        assert_eq!(c.requester().ordinals_for(gen_a).len(), 4);
        deliver(&mut c, 0);
        let clears_before = c.surface().clears;

        c.open_document(&book(dir.path(), "b.cbz", 8)).unwrap();
        let gen_b = c.generation();
        assert!(gen_b > gen_a);
        assert!(c.requester().retired.contains(&gen_b));
        assert_eq!(c.surface().clears, clears_before + 1);
        assert!(c.loaded_ordinals().is_empty());

        for ordinal in 0..4 {
            c.handle(ViewerEvent::PageFetched {
                generation: gen_a,
                ordinal,
                result: Ok(payload(ordinal)),
            });
        }
        assert!(c.loaded_ordinals().is_empty());
        assert!(c.surface().order.is_empty());
        assert_eq!(c.current_page(), 0);
        assert_eq!(c.progress().label(), "1/8");
    }

    #[test]
    fn visibility_picks_first_page_over_half() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 10)).unwrap();
        for o in 0..4 {
            deliver(&mut c, o);
        }

        c.on_visibility_changed(&[(1, 0.3), (2, 0.6), (3, 0.7)]);
        assert_eq!(c.current_page(), 2);
        assert_eq!(c.progress().label(), "3/10");
        assert!((c.progress().fraction - 0.3).abs() < 1e-6);

        // Nothing over half: the current page sticks.
        c.on_visibility_changed(&[(2, 0.5), (3, 0.5)]);
        assert_eq!(c.current_page(), 2);
    }

    #[test]
    fn scrolling_slides_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 40)).unwrap();
        for o in 0..=5 {
            deliver(&mut c, o);
        }

        show(&mut c, 5);
        assert_eq!(c.window(), Some(0..=10));
        for o in 6..=10 {
            deliver(&mut c, o);
        }
        assert_settled(&c);

        show(&mut c, 10);
        assert_eq!(c.current_page(), 10);
        assert_eq!(c.window(), Some(5..=15));
        assert_eq!(c.surface().removes, [0, 1, 2, 3, 4]);
        assert_eq!(c.loaded_ordinals(), (5..=10).collect::<Vec<_>>());
        assert!((11..=15).all(|o| c.is_in_flight(o)));
        assert_settled(&c);
    }

    #[test]
    fn page_arriving_outside_the_window_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 30)).unwrap();

        // Requested by the initial window but past the radius of page 0.
        deliver(&mut c, 8);
        assert!(c.loaded_ordinals().is_empty());
        assert!(!c.is_in_flight(8));
        assert_settled(&c);
    }

    #[test]
    fn failed_page_is_isolated_and_retried_on_reentry() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(2);
        c.open_document(&book(dir.path(), "a.cbz", 20)).unwrap();
        let generation = c.generation();

        c.handle(ViewerEvent::PageFetched {
            generation,
            ordinal: 1,
            result: Err(ViewerError::decode_failed("page2.png", "boom")),
        });
        deliver(&mut c, 0);
        deliver(&mut c, 2);
        assert_eq!(c.loaded_ordinals(), [0, 2]);
        let requests_for_1 = |c: &Controller| {
            c.requester().ordinals_for(generation).iter().filter(|&&o| o == 1).count()
        };
        assert_eq!(requests_for_1(&c), 1);

        // Moving on still works with page 1 missing.
        show(&mut c, 2);
        assert_eq!(c.current_page(), 2);
        assert_eq!(requests_for_1(&c), 1);

        // Leave the window, come back: page 1 is asked for again.
        for o in 3..=4 {
            deliver(&mut c, o);
        }
        show(&mut c, 4);
        assert_eq!(c.window(), Some(2..=6));
        show(&mut c, 2);
        assert_eq!(requests_for_1(&c), 2);
        assert_settled(&c);
    }

    #[test]
    fn surface_rejection_marks_page_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 3)).unwrap();
        c.surface_mut().reject.insert(1);

        for o in 0..3 {
            deliver(&mut c, o);
        }
        assert_eq!(c.loaded_ordinals(), [0, 2]);
        assert_eq!(c.phase(), Phase::Steady);
        assert_settled(&c);
    }

    #[test]
    fn stalled_requests_are_reissued() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 3)).unwrap();
        deliver(&mut c, 0);
        let deadline = c.next_deadline().unwrap();

        assert_eq!(c.reap_stalled(Instant::now()), 0);
        let reaped = c.reap_stalled(deadline + Duration::from_secs(1));
        assert_eq!(reaped, 2);
        // Reconciliation asked again for both.
        assert_eq!(c.requester().ordinals_for(c.generation()), [0, 1, 2, 1, 2]);
        assert!(c.is_in_flight(1) && c.is_in_flight(2));
    }

    #[test]
    fn failed_open_stays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);

        let err = c.open_document(&dir.path().join("missing.cbz")).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidSource { .. }));
        assert_eq!(c.phase(), Phase::Empty);
        assert!(c.notice().unwrap().starts_with("Could not open"));
        assert_eq!(c.progress().label(), "0/0");
    }

    #[test]
    fn empty_archive_shows_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cbz(dir.path(), "blank.cbz", &[("info.txt", b"no pages")]);
        let mut c = controller(5);

        c.handle(ViewerEvent::Open(path));
        assert_eq!(c.phase(), Phase::Empty);
        assert_eq!(c.notice(), Some("blank: no pages to show"));
        assert!(c.requester().sent.is_empty());
    }

    #[test]
    fn single_image_is_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.png");
        std::fs::write(&path, tiny_png()).unwrap();
        let mut c = controller(5);

        c.open_document(&path).unwrap();
        assert_eq!(c.window(), Some(0..=0));
        deliver(&mut c, 0);
        assert_eq!(c.phase(), Phase::Steady);
        assert_eq!(c.progress().label(), "1/1");
        assert_eq!(c.progress().fraction, 1.0);
    }

    #[test]
    fn jump_to_end_waits_for_target_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(2);
        c.open_document(&book(dir.path(), "a.cbz", 20)).unwrap();
        for o in 0..=2 {
            deliver(&mut c, o);
        }

        c.handle(ViewerEvent::JumpTo(usize::MAX));
        assert_eq!(c.current_page(), 19);
        assert_eq!(c.window(), Some(17..=19));
        assert!(c.loaded_ordinals().is_empty());

        // A neighbour arriving first does not pull the current page back.
        c.surface_mut().visibility = vec![(17, 1.0)];
        deliver(&mut c, 17);
        assert_eq!(c.current_page(), 19);

        deliver(&mut c, 19);
        assert_eq!(c.current_page(), 19);
        assert_eq!(c.surface().visibility, [(19, 1.0)]);
        assert_settled(&c);
    }

    #[test]
    fn failed_jump_target_releases_the_current_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(2);
        c.open_document(&book(dir.path(), "a.cbz", 20)).unwrap();
        for o in 0..=2 {
            deliver(&mut c, o);
        }

        c.handle(ViewerEvent::JumpTo(usize::MAX));
        let generation = c.generation();
        c.handle(ViewerEvent::PageFetched {
            generation,
            ordinal: 19,
            result: Err(ViewerError::decode_failed("page20.png", "truncated")),
        });
        deliver(&mut c, 17);
        deliver(&mut c, 18);

        c.surface_mut().visibility = vec![(17, 1.0)];
        c.handle(ViewerEvent::ViewportChanged);
        assert_eq!(c.current_page(), 17);
        assert_eq!(c.window(), Some(15..=19));
        assert!(c.is_in_flight(15) && c.is_in_flight(16));
        assert_settled(&c);
    }

    #[test]
    fn rejected_jump_target_releases_the_current_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(2);
        c.open_document(&book(dir.path(), "a.cbz", 20)).unwrap();
        c.surface_mut().reject.insert(0);

        c.handle(ViewerEvent::JumpTo(0));
        deliver(&mut c, 0);
        deliver(&mut c, 1);
        deliver(&mut c, 2);
        show(&mut c, 2);
        assert_eq!(c.current_page(), 2);
        assert_eq!(c.window(), Some(0..=4));
        assert_settled(&c);
    }

    #[test]
    fn stalled_jump_target_releases_the_current_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(2);
        c.open_document(&book(dir.path(), "a.cbz", 20)).unwrap();
        for o in 0..=2 {
            deliver(&mut c, o);
        }
        c.handle(ViewerEvent::JumpTo(usize::MAX));
        let generation = c.generation();
        let deadline = c.next_deadline().unwrap();

        // Page 3 from the first batch and the three jump requests.
        assert_eq!(c.reap_stalled(deadline + Duration::from_secs(1)), 4);
        assert_eq!(c.current_page(), 19);
        let requests_for_19 =
            c.requester().ordinals_for(generation).iter().filter(|&&o| o == 19).count();
        assert_eq!(requests_for_19, 2);

        c.surface_mut().visibility = vec![(17, 1.0)];
        deliver(&mut c, 17);
        assert_eq!(c.current_page(), 17);
        assert!(c.is_in_flight(19));
        assert_settled(&c);
    }

    #[test]
    fn close_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(5);
        c.open_document(&book(dir.path(), "a.cbz", 3)).unwrap();
        deliver(&mut c, 0);
        let generation = c.generation();

        c.handle(ViewerEvent::Close);
        assert_eq!(c.phase(), Phase::Empty);
        assert!(c.document().is_none());
        assert!(c.surface().order.is_empty());
        assert_eq!(c.loaded_bytes(), 0);
        assert!(c.next_deadline().is_none());
        assert!(c.generation() > generation);
        assert!(c.window().is_none());
    }
}
