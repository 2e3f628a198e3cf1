//! Two-panel figure: the 2-cluster map on the left, the 4-cluster map on the right.
//!
//! Each call owns its pixel buffer and drawing backend. The figure is drawn into
//! that buffer, cropped to its non-white content and encoded as PNG.

pub mod colors;
pub mod fonts;
pub mod text;

use std::io::Cursor;
use std::ops::Range;

use image::{ImageFormat, Rgb, RgbImage, imageops};
use ndarray::prelude::*;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, TextStyle};
use tracing::{debug, warn};

use crate::analysis::ClusterResult;
use crate::config::RenderConfig;
use crate::layout::{LabelBox, Obstacle, Rect, place_labels};
use crate::render::colors::cluster_color;
use crate::render::fonts::FONT_FAMILY;
use crate::render::text::{estimate_text_size, fold_title, truncate_label};
use crate::{AppError, AppResult};

/// Default scatter marker area, in points squared.
static POINT_AREA_PT2: f64 = 36.0;
/// Representative marker area, in points squared.
static REPRESENTATIVE_AREA_PT2: f64 = 100.0;
static TICK_FONT_PT: f64 = 10.0;
static POINT_ALPHA: f64 = 0.7;
/// Whitespace kept around the content by the tight crop, in inches.
static CROP_PAD_IN: f64 = 0.1;

/// Draws text when a font is registered and counts what had to be skipped otherwise.
struct TextPen {
    font: bool,
    skipped: usize,
}

impl TextPen {
    fn new(font: bool) -> Self {
        Self { font, skipped: 0 }
    }

    fn style(px: f64) -> TextStyle<'static> {
        (FONT_FAMILY, px).into_font().color(&BLACK)
    }

    fn draw<DB: DrawingBackend>(
        &mut self,
        area: &DrawingArea<DB, Shift>,
        text: &str,
        pos: (i32, i32),
        style: &TextStyle,
    ) {
        if !self.font {
            self.skipped += 1;
            return;
        }
        if let Err(e) = area.draw(&Text::new(text.to_string(), pos, style.clone())) {
            debug!("Skipped text {:?}: {}", text, e);
            self.skipped += 1;
        }
    }

    /// Rendered size of `text` in pixels, estimated when no metrics are available.
    fn size(&self, text: &str, px: f64) -> (f64, f64) {
        if self.font {
            let font: FontDesc = (FONT_FAMILY, px).into_font();
            if let Ok((w, h)) = font.box_size(text) {
                return (f64::from(w), f64::from(h));
            }
        }
        estimate_text_size(text, px)
    }
}

/// Padded data range of one projection column.
fn axis_range(values: ArrayView1<f64>) -> Range<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return -1.0..1.0;
    }
    let span = hi - lo;
    if span <= f64::EPSILON {
        return (lo - 1.0)..(hi + 1.0);
    }
    (lo - span * 0.05)..(hi + span * 0.05)
}

/// Outline of a filled "X" marker centered at `c` with half-extent `s`.
fn x_marker(c: (i32, i32), s: f64) -> Vec<(i32, i32)> {
    let t = s * 0.35;
    [
        (-s + t, -s),
        (0.0, -t),
        (s - t, -s),
        (s, -s + t),
        (t, 0.0),
        (s, s - t),
        (s - t, s),
        (0.0, t),
        (-s + t, s),
        (-s, s - t),
        (-t, 0.0),
        (-s, -s + t),
    ]
    .iter()
    .map(|(dx, dy)| (c.0 + dx.round() as i32, c.1 + dy.round() as i32))
    .collect()
}

fn to_pixel(p: (f64, f64)) -> (i32, i32) {
    (p.0.round() as i32, p.1.round() as i32)
}

/// Crop to the bounding box of non-white pixels plus `pad` pixels on each side.
pub fn tight_crop(image: &RgbImage, pad: u32) -> RgbImage {
    let background = Rgb([255u8, 255, 255]);
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if *pixel == background {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    let Some((x0, y0, x1, y1)) = bounds else {
        return image.clone();
    };
    let x0 = x0.saturating_sub(pad);
    let y0 = y0.saturating_sub(pad);
    let x1 = (x1 + pad).min(image.width() - 1);
    let y1 = (y1 + pad).min(image.height() - 1);
    imageops::crop_imm(image, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
}

/// Renders figures with a fixed [`RenderConfig`].
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Panel titles: the folded statement on the left, a plain heading on the right.
    pub fn titles(&self, statement: &str) -> (String, String) {
        (
            format!(
                "2-cluster: {}",
                fold_title(statement, self.config.title_width)
            ),
            "4-cluster".to_string(),
        )
    }

    /// Full two-panel cluster map. `projection` rows are index-aligned with `codes`.
    #[tracing::instrument(name = "Rendering cluster map", level = "debug", skip_all)]
    pub fn render(
        &self,
        codes: &[String],
        projection: &Array2<f64>,
        coarse: &ClusterResult,
        fine: &ClusterResult,
        statement: &str,
    ) -> AppResult<Vec<u8>> {
        if projection.nrows() != codes.len() || projection.ncols() != 2 {
            return Err(AppError::Render(format!(
                "projection of shape {:?} does not match {} snippets",
                projection.dim(),
                codes.len()
            )));
        }
        for cluster in [coarse, fine] {
            if cluster.labels.len() != codes.len() {
                return Err(AppError::Render(format!(
                    "{} cluster labels for {} snippets",
                    cluster.labels.len(),
                    codes.len()
                )));
            }
        }
        let (left, right) = self.titles(statement);
        self.draw_figure(|root, pen| {
            let panels = root.split_evenly((1, 2));
            self.draw_scatter_panel(root, &panels[0], &left, codes, projection, coarse, pen)?;
            self.draw_scatter_panel(root, &panels[1], &right, codes, projection, fine, pen)?;
            Ok(())
        })
    }

    /// Placeholder figure for fewer snippets than clustering needs.
    #[tracing::instrument(name = "Rendering placeholder", level = "debug", skip(self, statement))]
    pub fn render_placeholder(&self, n_points: usize, statement: &str) -> AppResult<Vec<u8>> {
        let message = format!(
            "Need at least 4 formalizations\nfor clustering analysis\n(Currently: {n_points})"
        );
        let (left, right) = self.titles(statement);
        self.draw_figure(|root, pen| {
            let panels = root.split_evenly((1, 2));
            self.draw_message_panel(&panels[0], &left, &message, pen)?;
            self.draw_message_panel(&panels[1], &right, &message, pen)?;
            Ok(())
        })
    }

    fn draw_figure<F>(&self, draw: F) -> AppResult<Vec<u8>>
    where
        F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>, &mut TextPen) -> AppResult<()>,
    {
        let (width, height) = self.config.pixel_size();
        let mut buffer = vec![255u8; width as usize * height as usize * 3];
        let font = fonts::ensure_registered(self.config.font_path.as_deref()).is_some();
        let mut pen = TextPen::new(font);
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
            root.fill(&WHITE)?;
            draw(&root, &mut pen)?;
            root.present()?;
        }
        if pen.skipped > 0 {
            warn!(
                "No usable font, {} text elements were left out of the figure",
                pen.skipped
            );
        }

        let image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            AppError::Render("pixel buffer does not match the figure size".to_string())
        })?;
        let pad = (f64::from(self.config.dpi) * CROP_PAD_IN).round() as u32;
        let cropped = tight_crop(&image, pad);
        let mut bytes = Vec::new();
        cropped.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        debug!(
            "Encoded {}x{} figure ({} bytes)",
            cropped.width(),
            cropped.height(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Draw the (possibly multi-line) title and return the area left below it.
    fn draw_title<DB: DrawingBackend>(
        &self,
        panel: &DrawingArea<DB, Shift>,
        title: &str,
        pen: &mut TextPen,
    ) -> DrawingArea<DB, Shift> {
        let title_px = self.config.pt_to_px(self.config.title_font_pt);
        let line_height = (title_px * 1.25).ceil() as i32;
        let top = (title_px * 0.5).round() as i32;
        let lines: Vec<&str> = title.lines().collect();
        let (width, _) = panel.dim_in_pixel();
        let style = TextPen::style(title_px).pos(Pos::new(HPos::Center, VPos::Top));
        for (i, line) in lines.iter().enumerate() {
            pen.draw(panel, line, (width as i32 / 2, top + i as i32 * line_height), &style);
        }
        let title_height = top * 2 + line_height * lines.len().max(1) as i32;
        let (_, body) = panel.split_vertically(title_height);
        body
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_scatter_panel<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
        panel: &DrawingArea<DB, Shift>,
        title: &str,
        codes: &[String],
        projection: &Array2<f64>,
        cluster: &ClusterResult,
        pen: &mut TextPen,
    ) -> AppResult<()> {
        let body = self.draw_title(panel, title, pen);
        let tick_px = self.config.pt_to_px(TICK_FONT_PT);

        let mut builder = ChartBuilder::on(&body);
        builder.margin(self.config.pt_to_px(6.0).round() as i32);
        if pen.font {
            builder
                .x_label_area_size((tick_px * 2.0).round() as i32)
                .y_label_area_size((tick_px * 4.0).round() as i32);
        }
        let mut chart = builder.build_cartesian_2d(
            axis_range(projection.column(0)),
            axis_range(projection.column(1)),
        )?;
        if pen.font {
            if let Err(e) = chart
                .configure_mesh()
                .disable_mesh()
                .label_style((FONT_FAMILY, tick_px))
                .draw()
            {
                debug!("Skipped axis labels: {}", e);
                pen.skipped += 1;
            }
        }

        let (x_pixels, y_pixels) = chart.plotting_area().get_pixel_range();
        root.draw(&Rectangle::new(
            [(x_pixels.start, y_pixels.start), (x_pixels.end - 1, y_pixels.end - 1)],
            BLACK.stroke_width(1),
        ))?;

        let labels = &cluster.labels;
        let min_label = labels.iter().min().copied().unwrap_or(0);
        let max_label = labels.iter().max().copied().unwrap_or(0);
        let point_radius = self.config.pt_to_px(POINT_AREA_PT2.sqrt() / 2.0);
        chart.draw_series(projection.axis_iter(Axis(0)).zip(labels.iter()).map(
            |(row, &label)| {
                Circle::new(
                    (row[0], row[1]),
                    point_radius.round() as i32,
                    cluster_color(label, min_label, max_label)
                        .mix(POINT_ALPHA)
                        .filled(),
                )
            },
        ))?;

        let marker_half = self.config.pt_to_px(REPRESENTATIVE_AREA_PT2.sqrt() / 2.0);
        let anchors: Vec<(i32, i32)> = cluster
            .representatives
            .iter()
            .map(|&i| chart.backend_coord(&(projection[(i, 0)], projection[(i, 1)])))
            .collect();
        for &anchor in &anchors {
            let outline = x_marker(anchor, marker_half);
            root.draw(&Polygon::new(outline.clone(), RED.filled()))?;
            let mut closed = outline;
            if let Some(&first) = closed.first() {
                closed.push(first);
            }
            root.draw(&PathElement::new(closed, BLACK.stroke_width(1)))?;
        }

        let font_px = self.config.pt_to_px(self.config.label_font_pt);
        let texts: Vec<String> = cluster
            .representatives
            .iter()
            .map(|&i| {
                let code = codes.get(i).map(String::as_str).unwrap_or_default();
                truncate_label(code, self.config.label_max_chars)
            })
            .collect();
        let boxes: Vec<LabelBox> = anchors
            .iter()
            .zip(&texts)
            .map(|(&(x, y), text)| {
                let (w, h) = pen.size(text, font_px);
                LabelBox::new((f64::from(x), f64::from(y)), w, h)
            })
            .collect();
        let mut obstacles: Vec<Obstacle> = projection
            .axis_iter(Axis(0))
            .map(|row| {
                let (x, y) = chart.backend_coord(&(row[0], row[1]));
                Obstacle {
                    center: (f64::from(x), f64::from(y)),
                    radius: point_radius,
                }
            })
            .collect();
        obstacles.extend(boxes.iter().map(|b| Obstacle {
            center: b.anchor,
            radius: marker_half,
        }));
        let canvas = Rect::new(
            f64::from(x_pixels.start),
            f64::from(y_pixels.start),
            f64::from(x_pixels.end),
            f64::from(y_pixels.end),
        );
        let layout = place_labels(&boxes, &obstacles, canvas, self.config.layout_iterations);

        let style = TextPen::style(font_px);
        for (i, (label, rect)) in boxes.iter().zip(&layout.boxes).enumerate() {
            if layout.moved(&boxes, i) {
                let near = rect.nearest_point(label.anchor);
                root.draw(&PathElement::new(
                    vec![to_pixel(label.anchor), to_pixel(near)],
                    BLACK.mix(0.6).stroke_width(1),
                ))?;
            }
            pen.draw(root, &texts[i], to_pixel((rect.x0, rect.y0)), &style);
        }
        Ok(())
    }

    fn draw_message_panel<DB: DrawingBackend>(
        &self,
        panel: &DrawingArea<DB, Shift>,
        title: &str,
        message: &str,
        pen: &mut TextPen,
    ) -> AppResult<()> {
        let body = self.draw_title(panel, title, pen);
        let margin = self.config.pt_to_px(6.0).round() as i32;
        let (width, height) = body.dim_in_pixel();
        let (width, height) = (width as i32, height as i32);
        body.draw(&Rectangle::new(
            [(margin, margin), (width - margin, height - margin)],
            BLACK.stroke_width(1),
        ))?;

        let px = self.config.pt_to_px(self.config.title_font_pt);
        let line_height = (px * 1.25).ceil() as i32;
        let lines: Vec<&str> = message.lines().collect();
        let top = height / 2 - line_height * lines.len() as i32 / 2;
        let style = TextPen::style(px).pos(Pos::new(HPos::Center, VPos::Top));
        for (i, line) in lines.iter().enumerate() {
            pen.draw(&body, line, (width / 2, top + i as i32 * line_height), &style);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn small_config() -> RenderConfig {
        RenderConfig {
            dpi: 40,
            ..RenderConfig::default()
        }
    }

    fn clusters(labels: Vec<usize>, representatives: Vec<usize>, k: usize) -> ClusterResult {
        ClusterResult {
            requested_k: k,
            effective_k: k,
            labels,
            representatives,
        }
    }

    #[test]
    fn placeholder_is_a_png() {
        let renderer = Renderer::new(small_config());
        let bytes = renderer.render_placeholder(3, "Some statement").unwrap();
        assert_eq!(&bytes[..8], &PNG_SIGNATURE);
        let decoded = image::load_from_memory(&bytes).unwrap();
        let (w, h) = renderer.config().pixel_size();
        assert!(decoded.width() <= w && decoded.height() <= h);
    }

    #[test]
    fn full_figure_is_a_png() {
        let renderer = Renderer::new(small_config());
        let codes: Vec<String> = (0..6).map(|i| format!("theorem t{i} : True := trivial")).collect();
        let projection = array![
            [0.0, 0.0],
            [0.5, 0.2],
            [0.1, 0.6],
            [8.0, 8.0],
            [8.4, 7.9],
            [7.7, 8.3]
        ];
        let coarse = clusters(vec![0, 0, 0, 1, 1, 1], vec![0, 3], 2);
        let fine = clusters(vec![0, 0, 1, 2, 2, 3], vec![0, 2, 3, 5], 4);
        let bytes = renderer
            .render(&codes, &projection, &coarse, &fine, "The sum of two even numbers is even")
            .unwrap();
        assert_eq!(&bytes[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn right_panel_labels_leave_left_panel_untouched() {
        let renderer = Renderer::new(small_config());
        let codes: Vec<String> = (0..6)
            .map(|i| format!("theorem t{i} : ∀ n : ℕ, n + {i} = {i} + n := by omega"))
            .collect();
        let projection = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.0],
            [8.0, 8.0],
            [8.1, 8.1],
            [8.2, 8.0]
        ];
        let coarse = clusters(vec![0, 0, 0, 1, 1, 1], vec![1, 4], 2);
        let sparse = clusters(vec![0, 0, 0, 1, 1, 1], vec![0, 3], 4);
        let crowded = clusters(vec![0, 1, 2, 3, 3, 3], vec![0, 1, 2, 4], 4);

        let render = |fine: &ClusterResult| {
            let bytes = renderer
                .render(&codes, &projection, &coarse, fine, "Addition commutes")
                .unwrap();
            image::load_from_memory(&bytes).unwrap().to_rgb8()
        };
        let a = render(&sparse);
        let b = render(&crowded);
        assert_ne!(a, b);
        assert_eq!(a.dimensions(), b.dimensions());
        let left_width = a.width() * 2 / 5;
        for y in 0..a.height() {
            for x in 0..left_width {
                assert_eq!(a.get_pixel(x, y), b.get_pixel(x, y), "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn mismatched_inputs_are_render_errors() {
        let renderer = Renderer::new(small_config());
        let codes = vec!["a".to_string(), "b".to_string()];
        let projection = array![[0.0, 0.0]];
        let c = clusters(vec![0, 0], vec![0], 1);
        let err = renderer.render(&codes, &projection, &c, &c, "s").unwrap_err();
        assert!(matches!(err, AppError::Render(_)));
    }

    #[test]
    fn titles_fold_the_statement() {
        let renderer = Renderer::default();
        let (left, right) = renderer.titles(&"a".repeat(45));
        assert_eq!(left.lines().count(), 2);
        assert!(left.starts_with("2-cluster: "));
        assert_eq!(right, "4-cluster");
    }

    #[test]
    fn tight_crop_keeps_content_and_padding() {
        let mut image = RgbImage::from_pixel(100, 80, Rgb([255, 255, 255]));
        image.put_pixel(40, 30, Rgb([0, 0, 0]));
        image.put_pixel(60, 50, Rgb([0, 0, 0]));
        let cropped = tight_crop(&image, 5);
        assert_eq!((cropped.width(), cropped.height()), (31, 31));
        assert_eq!(*cropped.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn blank_image_is_not_cropped() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        assert_eq!(tight_crop(&image, 2).dimensions(), (10, 10));
    }

    #[test]
    fn axis_range_pads_and_handles_constant_columns() {
        let values = array![1.0, 3.0];
        let range = axis_range(values.view());
        assert!(range.start < 1.0 && range.end > 3.0);
        let flat = array![2.0, 2.0];
        assert_eq!(axis_range(flat.view()), 1.0..3.0);
    }

    #[test]
    fn x_marker_is_centered() {
        let outline = x_marker((100, 100), 10.0);
        assert_eq!(outline.len(), 12);
        let (sx, sy) = outline
            .iter()
            .fold((0, 0), |(sx, sy), (x, y)| (sx + x, sy + y));
        assert_eq!((sx / 12, sy / 12), (100, 100));
    }
}
