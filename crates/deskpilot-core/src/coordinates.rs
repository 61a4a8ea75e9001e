//! Maps model-issued pointer coordinates onto logical screen points.
//!
//! Providers declare how their models express coordinates through
//! [`CoordinateConvention`]; this is the only place that convention is read.

use deskpilot_computer_control::{
    fit_for_vision, Point, ScreenGeometry, Screenshot, VisionLimits,
};
use deskpilot_providers::CoordinateConvention;

/// Screen area covered by a screenshot, in logical points, and the size the
/// image was sent at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenshotFrame {
    pub origin_x: f64,
    pub origin_y: f64,
    pub logical_width: f64,
    pub logical_height: f64,
    pub sent_width: u32,
    pub sent_height: u32,
}

impl ScreenshotFrame {
    /// Frame of `screenshot`; a capture without a region covers the screen.
    pub fn of(screenshot: &Screenshot, geometry: ScreenGeometry) -> Self {
        let (origin_x, origin_y, logical_width, logical_height) = match screenshot.region {
            Some(r) => (r.x as f64, r.y as f64, r.width as f64, r.height as f64),
            None => (0.0, 0.0, geometry.width as f64, geometry.height as f64),
        };
        Self {
            origin_x,
            origin_y,
            logical_width,
            logical_height,
            sent_width: screenshot.width,
            sent_height: screenshot.height,
        }
    }

    fn to_screen(&self, raw_x: f64, raw_y: f64) -> Option<Point> {
        if self.sent_width == 0 || self.sent_height == 0 {
            return None;
        }
        Some(Point::new(
            (self.origin_x + raw_x * self.logical_width / self.sent_width as f64).round() as i32,
            (self.origin_y + raw_y * self.logical_height / self.sent_height as f64).round() as i32,
        ))
    }
}

/// Converts raw coordinates for one screen geometry. Pure and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    geometry: ScreenGeometry,
    limits: VisionLimits,
    /// The last screenshot shown to the model
    frame: Option<ScreenshotFrame>,
}

impl CoordinateMapper {
    /// `limits` must be the ones used when capturing screenshots, so the
    /// screenshot size the model saw can be reproduced.
    pub fn new(geometry: ScreenGeometry, limits: VisionLimits) -> Self {
        Self {
            geometry,
            limits,
            frame: None,
        }
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    pub fn frame(&self) -> Option<ScreenshotFrame> {
        self.frame
    }

    /// Screenshot-relative coordinates are read against the most recently
    /// observed screenshot.
    pub fn observe(&mut self, screenshot: &Screenshot) {
        self.frame = Some(ScreenshotFrame::of(screenshot, self.geometry));
    }

    pub fn resolve_point(&self, raw_x: f64, raw_y: f64, convention: CoordinateConvention) -> Point {
        let width = self.geometry.width as f64;
        let height = self.geometry.height as f64;

        match convention {
            CoordinateConvention::Pixel => Point::new(raw_x.round() as i32, raw_y.round() as i32),
            CoordinateConvention::NormalizedGrid => Point::new(
                grid_axis(raw_x, width).round() as i32,
                grid_axis(raw_y, height).round() as i32,
            ),
            CoordinateConvention::ScreenshotRelative => {
                let frame = self.frame.unwrap_or_else(|| {
                    let (sent_width, sent_height) = self.screenshot_size();
                    ScreenshotFrame {
                        origin_x: 0.0,
                        origin_y: 0.0,
                        logical_width: width,
                        logical_height: height,
                        sent_width,
                        sent_height,
                    }
                });
                frame
                    .to_screen(raw_x, raw_y)
                    .unwrap_or_else(|| Point::new(raw_x.round() as i32, raw_y.round() as i32))
            }
        }
    }

    pub fn resolve_drag(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        convention: CoordinateConvention,
    ) -> (Point, Point) {
        (
            self.resolve_point(from.0, from.1, convention),
            self.resolve_point(to.0, to.1, convention),
        )
    }

    /// Size of a full-screen screenshot as sent to the model.
    pub fn screenshot_size(&self) -> (u32, u32) {
        fit_for_vision(
            self.geometry.native_width(),
            self.geometry.native_height(),
            self.limits,
        )
    }
}

/// A 0..1 fraction, a 0..999 grid cell, or (past the grid) a pixel.
fn grid_axis(raw: f64, dimension: f64) -> f64 {
    if raw <= 1.0 {
        raw * dimension
    } else if raw <= 999.0 {
        raw / 999.0 * dimension
    } else {
        raw
    }
}

/// A mapper bound to the active provider's convention.
#[derive(Debug, Clone, Copy)]
pub struct PointerSpace {
    pub mapper: CoordinateMapper,
    pub convention: CoordinateConvention,
}

impl PointerSpace {
    pub fn new(mapper: CoordinateMapper, convention: CoordinateConvention) -> Self {
        Self { mapper, convention }
    }

    pub fn point(&self, x: f64, y: f64) -> Point {
        self.mapper.resolve_point(x, y, self.convention)
    }

    pub fn observe(&mut self, screenshot: &Screenshot) {
        self.mapper.observe(screenshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_computer_control::Rect;

    fn mapper(width: u32, height: u32, scale: f64) -> CoordinateMapper {
        CoordinateMapper::new(ScreenGeometry::new(width, height, scale), VisionLimits::default())
    }

    #[test]
    fn test_normalized_grid_on_1080p() {
        let m = mapper(1920, 1080, 1.0);
        assert_eq!(
            m.resolve_point(500.0, 500.0, CoordinateConvention::NormalizedGrid),
            Point::new(961, 541)
        );
        assert_eq!(
            m.resolve_point(0.5, 0.5, CoordinateConvention::NormalizedGrid),
            Point::new(960, 540)
        );
    }

    #[test]
    fn test_grid_passes_large_values_through() {
        let m = mapper(1920, 1080, 1.0);
        assert_eq!(
            m.resolve_point(1500.0, 1000.0, CoordinateConvention::NormalizedGrid),
            Point::new(1500, 1000)
        );
        // Axes are judged independently
        assert_eq!(
            m.resolve_point(0.25, 999.0, CoordinateConvention::NormalizedGrid),
            Point::new(480, 1080)
        );
    }

    #[test]
    fn test_screenshot_relative_on_retina() {
        // 1440x900 @2x is captured at 2880x1800, then downscaled for the model
        let m = mapper(1440, 900, 2.0);
        let (shot_w, shot_h) = m.screenshot_size();
        assert!(shot_w <= 1568 && shot_h <= 1568);

        let center = m.resolve_point(
            shot_w as f64 / 2.0,
            shot_h as f64 / 2.0,
            CoordinateConvention::ScreenshotRelative,
        );
        assert_eq!(center, Point::new(720, 450));

        let corner = m.resolve_point(
            shot_w as f64,
            shot_h as f64,
            CoordinateConvention::ScreenshotRelative,
        );
        assert_eq!(corner, Point::new(1440, 900));
    }

    #[test]
    fn test_screenshot_relative_without_downscale() {
        let m = mapper(800, 600, 1.0);
        assert_eq!(m.screenshot_size(), (800, 600));
        assert_eq!(
            m.resolve_point(123.0, 456.0, CoordinateConvention::ScreenshotRelative),
            Point::new(123, 456)
        );
    }

    fn window_capture(region: Rect, width: u32, height: u32) -> Screenshot {
        Screenshot {
            data: String::new(),
            media_type: "image/jpeg".to_string(),
            width,
            height,
            original_width: region.width as u32 * 2,
            original_height: region.height as u32 * 2,
            region: Some(region),
        }
    }

    #[test]
    fn test_screenshot_relative_after_window_capture() {
        // 800x600 window at (100, 100) on a 1440x900 @2x screen
        let mut m = mapper(1440, 900, 2.0);
        let region = Rect {
            x: 100,
            y: 100,
            width: 800,
            height: 600,
        };
        let (sent_w, sent_h) = fit_for_vision(1600, 1200, VisionLimits::default());
        assert!(sent_w < 1600);
        m.observe(&window_capture(region, sent_w, sent_h));

        let center = m.resolve_point(
            sent_w as f64 / 2.0,
            sent_h as f64 / 2.0,
            CoordinateConvention::ScreenshotRelative,
        );
        assert_eq!(center, Point::new(500, 400));
        assert_eq!(
            m.resolve_point(0.0, 0.0, CoordinateConvention::ScreenshotRelative),
            Point::new(100, 100)
        );
        assert_eq!(
            m.resolve_point(sent_w as f64, sent_h as f64, CoordinateConvention::ScreenshotRelative),
            Point::new(900, 700)
        );
    }

    #[test]
    fn test_full_screen_capture_replaces_window_frame() {
        let mut m = mapper(1440, 900, 2.0);
        let region = Rect {
            x: 100,
            y: 100,
            width: 800,
            height: 600,
        };
        m.observe(&window_capture(region, 800, 600));

        let (shot_w, shot_h) = m.screenshot_size();
        let mut full = window_capture(region, shot_w, shot_h);
        full.region = None;
        m.observe(&full);

        assert_eq!(
            m.resolve_point(
                shot_w as f64 / 2.0,
                shot_h as f64 / 2.0,
                CoordinateConvention::ScreenshotRelative
            ),
            Point::new(720, 450)
        );
    }

    #[test]
    fn test_frame_does_not_affect_other_conventions() {
        let mut m = mapper(1920, 1080, 1.0);
        let region = Rect {
            x: 300,
            y: 200,
            width: 400,
            height: 300,
        };
        m.observe(&window_capture(region, 400, 300));
        assert_eq!(
            m.resolve_point(0.5, 0.5, CoordinateConvention::NormalizedGrid),
            Point::new(960, 540)
        );
        assert_eq!(
            m.resolve_point(10.0, 20.0, CoordinateConvention::Pixel),
            Point::new(10, 20)
        );
    }

    #[test]
    fn test_pixel_passthrough_and_drag() {
        let m = mapper(1920, 1080, 1.0);
        let (from, to) = m.resolve_drag((10.4, 20.6), (300.0, 400.0), CoordinateConvention::Pixel);
        assert_eq!(from, Point::new(10, 21));
        assert_eq!(to, Point::new(300, 400));
    }
}
