//! Layout - computes and applies window placement across one or more screens

use tracing::warn;

use super::error::FleetError;
use super::profile::WindowHandle;
use super::settings::ArrangementSettings;

/// Integer rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }
}

/// One attached display, as reported by the platform layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenDescriptor {
    /// Device identifier (e.g. `\\.\DISPLAY1`)
    pub id: String,
    /// Full monitor rectangle
    pub rect: Rect,
    /// Usable rectangle excluding taskbars and docked UI
    pub work: Rect,
    pub is_primary: bool,
}

impl ScreenDescriptor {
    /// Aspect ratio beyond 2.0 counts as ultrawide and gets a wider grid.
    pub fn is_ultrawide(&self) -> bool {
        self.rect.height > 0 && f64::from(self.rect.width) / f64::from(self.rect.height) > 2.0
    }
}

/// A computed placement for one window. Nothing moves until a whole plan
/// computed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub handle: WindowHandle,
    pub rect: Rect,
}

/// Column/row counts for `count` windows: `ceil(sqrt(n))` columns, bumped
/// once when the square still falls short, rows to cover the remainder.
pub fn grid_dimensions(count: u32) -> (u32, u32) {
    if count == 0 {
        return (0, 0);
    }
    let mut cols = (f64::from(count)).sqrt().ceil() as u32;
    if cols * cols < count {
        cols += 1;
    }
    let rows = (count + cols - 1) / cols;
    (cols, rows)
}

/// Column count for an ultrawide screen: half the window count, kept
/// between 2 and 8.
pub fn ultrawide_columns(count: u32) -> u32 {
    let computed = (f64::from(count) * 0.5).round() as u32;
    computed.clamp(2, 8)
}

/// Row-major cell rectangles for `count` windows in `work`, with the column
/// count chosen by `grid_dimensions`.
pub fn grid_cells(work: &Rect, count: u32) -> Result<Vec<Rect>, FleetError> {
    let (cols, _) = grid_dimensions(count);
    grid_cells_with_columns(work, count, cols)
}

/// Row-major cells with an explicit column count. Rejects work areas whose
/// cells would collapse to zero; nothing is placed on rejection.
pub fn grid_cells_with_columns(
    work: &Rect,
    count: u32,
    cols: u32,
) -> Result<Vec<Rect>, FleetError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let cols = cols.max(1);
    let rows = (count + cols - 1) / cols;
    let cell_w = work.width / cols as i32;
    let cell_h = work.height / rows as i32;
    if cell_w <= 0 || cell_h <= 0 {
        return Err(FleetError::LayoutUnusable {
            width: work.width,
            height: work.height,
            count,
        });
    }

    let cells = (0..count)
        .map(|i| Rect {
            x: work.x + (i % cols) as i32 * cell_w,
            y: work.y + (i / cols) as i32 * cell_h,
            width: cell_w,
            height: cell_h,
        })
        .collect();
    Ok(cells)
}

/// Split `count` windows across screens proportionally to screen width:
/// `floor(count * weight)` for all but the last screen, remainder to the
/// last, so the total is preserved exactly.
pub fn split_by_width(widths: &[i32], count: u32) -> Vec<u32> {
    if widths.is_empty() {
        return Vec::new();
    }
    let total: i64 = widths.iter().map(|w| i64::from(*w)).sum();
    let mut counts = Vec::with_capacity(widths.len());
    let mut assigned = 0u32;
    for width in &widths[..widths.len() - 1] {
        let share = if total > 0 {
            (f64::from(count) * f64::from(*width) / total as f64).floor() as u32
        } else {
            0
        };
        counts.push(share);
        assigned += share;
    }
    counts.push(count - assigned);
    counts
}

/// Cells for the operator's explicit arrangement, offset by a screen origin.
pub fn custom_cells(
    origin_x: i32,
    origin_y: i32,
    params: &ArrangementSettings,
    count: u32,
) -> Vec<Rect> {
    let per_row = params.windows_per_row.max(1);
    (0..count)
        .map(|i| {
            let col = (i % per_row) as i32;
            let row = (i / per_row) as i32;
            Rect {
                x: origin_x + params.start_x + col * (params.width + params.h_spacing),
                y: origin_y + params.start_y + row * (params.height + params.v_spacing),
                width: params.width,
                height: params.height,
            }
        })
        .collect()
}

/// Resolve the operator's screen selection: "auto"/"all"/empty selects every
/// screen, a device name selects that screen, an unknown name falls back to
/// the primary (or first) screen.
pub fn select_screens<'a>(
    screens: &'a [ScreenDescriptor],
    selection: &str,
) -> Result<Vec<&'a ScreenDescriptor>, FleetError> {
    if screens.is_empty() {
        return Err(FleetError::NoScreens);
    }
    let wanted = selection.trim();
    if wanted.is_empty() || wanted.eq_ignore_ascii_case("auto") || wanted.eq_ignore_ascii_case("all")
    {
        return Ok(screens.iter().collect());
    }
    if let Some(screen) = screens.iter().find(|s| s.id.eq_ignore_ascii_case(wanted)) {
        return Ok(vec![screen]);
    }
    warn!("Screen '{}' not attached, using the primary screen", wanted);
    let fallback = screens.iter().find(|s| s.is_primary).unwrap_or(&screens[0]);
    Ok(vec![fallback])
}

/// Grid placements for `windows` (already sorted by profile number) across
/// the selected screens. Multi-screen allocation is width-weighted; ultrawide
/// screens take the wider column count.
pub fn plan_grid(
    windows: &[WindowHandle],
    screens: &[&ScreenDescriptor],
) -> Result<Vec<Placement>, FleetError> {
    if windows.is_empty() {
        return Err(FleetError::NothingToArrange);
    }
    if screens.is_empty() {
        return Err(FleetError::NoScreens);
    }

    let widths: Vec<i32> = screens.iter().map(|s| s.work.width).collect();
    let counts = split_by_width(&widths, windows.len() as u32);

    let mut placements = Vec::with_capacity(windows.len());
    let mut taken = 0usize;
    for (screen, count) in screens.iter().zip(counts) {
        if count == 0 {
            continue;
        }
        let subset = &windows[taken..taken + count as usize];
        let cols = if screen.is_ultrawide() {
            ultrawide_columns(count)
        } else {
            grid_dimensions(count).0
        };
        let cells = grid_cells_with_columns(&screen.work, count, cols)?;
        placements.extend(
            subset
                .iter()
                .zip(cells)
                .map(|(handle, rect)| Placement {
                    handle: *handle,
                    rect,
                }),
        );
        taken += count as usize;
    }
    Ok(placements)
}

/// Custom-parameter placements, split across screens by the same weighting
/// as the grid planner.
pub fn plan_custom(
    windows: &[WindowHandle],
    screens: &[&ScreenDescriptor],
    params: &ArrangementSettings,
) -> Result<Vec<Placement>, FleetError> {
    if windows.is_empty() {
        return Err(FleetError::NothingToArrange);
    }
    if screens.is_empty() {
        return Err(FleetError::NoScreens);
    }

    let widths: Vec<i32> = screens.iter().map(|s| s.work.width).collect();
    let counts = split_by_width(&widths, windows.len() as u32);

    let mut placements = Vec::with_capacity(windows.len());
    let mut taken = 0usize;
    for (screen, count) in screens.iter().zip(counts) {
        if count == 0 {
            continue;
        }
        let subset = &windows[taken..taken + count as usize];
        let cells = custom_cells(screen.work.x, screen.work.y, params, count);
        placements.extend(
            subset
                .iter()
                .zip(cells)
                .map(|(handle, rect)| Placement {
                    handle: *handle,
                    rect,
                }),
        );
        taken += count as usize;
    }
    Ok(placements)
}

/// Carry a plan out. A window that went away between planning and moving is
/// logged and skipped; the rest of the plan still applies.
pub fn apply_placements(placements: &[Placement]) -> (usize, usize) {
    let mut moved = 0;
    let mut skipped = 0;
    for placement in placements {
        match crate::platform::move_window(placement.handle, &placement.rect) {
            Ok(()) => moved += 1,
            Err(e) => {
                warn!("Could not move window {:#x}: {}", placement.handle, e);
                skipped += 1;
            }
        }
    }
    (moved, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(id: &str, x: i32, width: i32, height: i32, primary: bool) -> ScreenDescriptor {
        ScreenDescriptor {
            id: id.to_string(),
            rect: Rect::new(x, 0, width, height),
            work: Rect::new(x, 0, width, height),
            is_primary: primary,
        }
    }

    // ==================== grid dimensions ====================

    #[test]
    fn grid_dimensions_follow_the_sqrt_rule() {
        assert_eq!(grid_dimensions(1), (1, 1));
        assert_eq!(grid_dimensions(2), (2, 1));
        assert_eq!(grid_dimensions(4), (2, 2));
        assert_eq!(grid_dimensions(5), (3, 2));
        assert_eq!(grid_dimensions(10), (4, 3));
        assert_eq!(grid_dimensions(16), (4, 4));
        assert_eq!(grid_dimensions(17), (5, 4));
    }

    #[test]
    fn grid_always_covers_every_window() {
        for count in 1..=60 {
            let (cols, rows) = grid_dimensions(count);
            assert!(cols * rows >= count, "{}x{} < {}", cols, rows, count);
            assert!(cols >= rows, "grid wider than tall for {}", count);
        }
    }

    #[test]
    fn ten_windows_on_full_hd_form_the_expected_grid() {
        let work = Rect::new(0, 0, 1920, 1080);
        let cells = grid_cells(&work, 10).unwrap();

        assert_eq!(cells.len(), 10);
        assert_eq!(cells[0], Rect::new(0, 0, 480, 360));
        // row-major: index 5 sits at column 1 of row 1, index 6 at column 2
        assert_eq!(cells[5], Rect::new(480, 360, 480, 360));
        assert_eq!(cells[6], Rect::new(960, 360, 480, 360));
        assert_eq!(cells[9], Rect::new(480, 720, 480, 360));
    }

    #[test]
    fn cells_honor_the_work_area_origin() {
        let work = Rect::new(100, 50, 1920, 1080);
        let cells = grid_cells(&work, 4).unwrap();
        assert_eq!(cells[0], Rect::new(100, 50, 960, 540));
        assert_eq!(cells[3], Rect::new(1060, 590, 960, 540));
    }

    #[test]
    fn degenerate_work_area_is_rejected_before_any_move() {
        let work = Rect::new(0, 0, 3, 3);
        let err = grid_cells(&work, 10).unwrap_err();
        assert!(matches!(err, FleetError::LayoutUnusable { count: 10, .. }));
    }

    #[test]
    fn every_cell_stays_positive_for_many_sizes() {
        let work = Rect::new(0, 0, 2560, 1440);
        for count in 1..=48 {
            let cells = grid_cells(&work, count).unwrap();
            assert_eq!(cells.len(), count as usize);
            for cell in &cells {
                assert!(cell.width > 0 && cell.height > 0);
                assert!(cell.right() <= work.right());
                assert!(cell.bottom() <= work.bottom());
            }
        }
    }

    // ==================== multi-screen split ====================

    #[test]
    fn width_split_matches_the_1200_800_scenario() {
        assert_eq!(split_by_width(&[1200, 800], 10), vec![6, 4]);
    }

    #[test]
    fn width_split_preserves_the_total() {
        for count in 0..=30 {
            for widths in [
                vec![1920],
                vec![1200, 800],
                vec![1000, 1000, 500],
                vec![3440, 1920, 1080],
            ] {
                let counts = split_by_width(&widths, count);
                assert_eq!(counts.iter().sum::<u32>(), count);
                assert_eq!(counts.len(), widths.len());
            }
        }
    }

    #[test]
    fn single_screen_takes_everything() {
        assert_eq!(split_by_width(&[1920], 10), vec![10]);
    }

    // ==================== ultrawide ====================

    #[test]
    fn ultrawide_detection_uses_the_two_to_one_threshold() {
        assert!(screen("w", 0, 3440, 1440, true).is_ultrawide());
        assert!(!screen("n", 0, 1920, 1080, true).is_ultrawide());
        // exactly 2.0 is not beyond the threshold
        assert!(!screen("e", 0, 2160, 1080, true).is_ultrawide());
    }

    #[test]
    fn ultrawide_columns_are_clamped_between_two_and_eight() {
        assert_eq!(ultrawide_columns(1), 2);
        assert_eq!(ultrawide_columns(4), 2);
        assert_eq!(ultrawide_columns(5), 3);
        assert_eq!(ultrawide_columns(10), 5);
        assert_eq!(ultrawide_columns(16), 8);
        assert_eq!(ultrawide_columns(40), 8);
    }

    #[test]
    fn ultrawide_screen_widens_the_grid() {
        let ultrawide = screen("w", 0, 3440, 1440, true);
        let windows: Vec<WindowHandle> = (1..=10).collect();
        let placements = plan_grid(&windows, &[&ultrawide]).unwrap();

        // 5 columns of 688, 2 rows of 720
        assert_eq!(placements[0].rect, Rect::new(0, 0, 688, 720));
        assert_eq!(placements[4].rect, Rect::new(2752, 0, 688, 720));
        assert_eq!(placements[5].rect, Rect::new(0, 720, 688, 720));
    }

    // ==================== custom arrangement ====================

    fn params() -> ArrangementSettings {
        ArrangementSettings {
            start_x: 20,
            start_y: 30,
            width: 400,
            height: 300,
            h_spacing: 10,
            v_spacing: 5,
            windows_per_row: 2,
        }
    }

    #[test]
    fn custom_cells_wrap_at_the_configured_row_width() {
        let cells = custom_cells(0, 0, &params(), 5);
        assert_eq!(cells[0], Rect::new(20, 30, 400, 300));
        assert_eq!(cells[1], Rect::new(430, 30, 400, 300));
        assert_eq!(cells[2], Rect::new(20, 335, 400, 300));
        assert_eq!(cells[4], Rect::new(20, 640, 400, 300));
    }

    #[test]
    fn custom_cells_offset_by_screen_origin() {
        let cells = custom_cells(1920, 100, &params(), 1);
        assert_eq!(cells[0], Rect::new(1940, 130, 400, 300));
    }

    #[test]
    fn custom_plan_splits_across_screens_like_the_grid() {
        let a = screen("a", 0, 1200, 1080, true);
        let b = screen("b", 1200, 800, 1080, false);
        let windows: Vec<WindowHandle> = (1..=10).collect();
        let placements = plan_custom(&windows, &[&a, &b], &params()).unwrap();

        assert_eq!(placements.len(), 10);
        // first six relative to screen a, the remaining four to screen b
        assert_eq!(placements[0].rect.x, 20);
        assert_eq!(placements[6].rect.x, 1220);
    }

    // ==================== screen selection ====================

    fn two_screens() -> Vec<ScreenDescriptor> {
        vec![
            screen("\\\\.\\DISPLAY1", 0, 1920, 1080, true),
            screen("\\\\.\\DISPLAY2", 1920, 1200, 1080, false),
        ]
    }

    #[test]
    fn auto_and_all_select_every_screen() {
        let screens = two_screens();
        assert_eq!(select_screens(&screens, "auto").unwrap().len(), 2);
        assert_eq!(select_screens(&screens, "ALL").unwrap().len(), 2);
        assert_eq!(select_screens(&screens, "").unwrap().len(), 2);
    }

    #[test]
    fn a_device_name_selects_that_screen() {
        let screens = two_screens();
        let picked = select_screens(&screens, "\\\\.\\DISPLAY2").unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "\\\\.\\DISPLAY2");
    }

    #[test]
    fn unknown_names_fall_back_to_primary() {
        let screens = two_screens();
        let picked = select_screens(&screens, "\\\\.\\DISPLAY9").unwrap();
        assert_eq!(picked.len(), 1);
        assert!(picked[0].is_primary);
    }

    #[test]
    fn no_screens_is_a_rejection() {
        assert!(matches!(select_screens(&[], "auto"), Err(FleetError::NoScreens)));
    }

    // ==================== planning ====================

    #[test]
    fn plan_distributes_windows_in_order_across_screens() {
        let a = screen("a", 0, 1200, 1080, true);
        let b = screen("b", 1200, 800, 1080, false);
        let windows: Vec<WindowHandle> = (1..=10).collect();

        let placements = plan_grid(&windows, &[&a, &b]).unwrap();
        assert_eq!(placements.len(), 10);

        let on_a = placements.iter().filter(|p| p.rect.x < 1200).count();
        let on_b = placements.iter().filter(|p| p.rect.x >= 1200).count();
        assert_eq!(on_a, 6);
        assert_eq!(on_b, 4);
        // order follows the input (profile-number) order
        assert_eq!(placements[0].handle, 1);
        assert_eq!(placements[6].handle, 7);
    }

    #[test]
    fn empty_window_set_is_a_rejection() {
        let screens = two_screens();
        let refs: Vec<&ScreenDescriptor> = screens.iter().collect();
        assert!(matches!(
            plan_grid(&[], &refs),
            Err(FleetError::NothingToArrange)
        ));
    }
}
