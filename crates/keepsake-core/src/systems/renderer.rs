//! # Renderer System
//!
//! Draws laid-out scrapbook pages into a PDF via Skia.
//!
//! ## Responsibilities
//! - **Background**: Template image stretched to the page, over a fallback colour.
//! - **Cards**: Rounded white frame, translucent outline and a contain-fit,
//!   corner-clipped photo, each rotated around its own center.
//! - **Serialization**: One PDF document for all pages; the document is closed on
//!   every path and write failures are reported after closing.
//!
//! ## Key Functions
//! - `render_document`: Serializes a list of `PageLayout`s.
//! - `render_page`: Paints one page onto a canvas.

use crate::catalog::ScrapbookTemplate;
use crate::config::PageConfig;
use crate::errors::ExportError;
use crate::systems::assets::PhotoLibrary;
use crate::systems::layout::{PageLayout, PagePlacement};
use crate::types::contain_rect;
use skia_safe::{
    Canvas, ClipOp, Color, FilterMode, Image, MipmapMode, Paint, PaintStyle, RRect, Rect,
    SamplingOptions,
};
use std::io::{self, Write};
use tracing::{debug, instrument, warn};

/// Paints and geometry for photo cards.
///
/// Built fresh for every export from the page configuration.
#[derive(Debug, Clone)]
pub struct CardStyle {
    pub frame_paint: Paint,
    pub stroke_paint: Paint,
    pub bitmap_paint: Paint,
    pub sampling: SamplingOptions,
    pub frame_radius: f32,
    pub frame_inset: f32,
    pub photo_border: f32,
    pub photo_corner_radius: f32,
    pub max_bitmap_dimension: u32,
}

impl CardStyle {
    pub fn from_config(page: &PageConfig) -> Self {
        let mut frame_paint = Paint::default();
        frame_paint.set_anti_alias(true);
        frame_paint.set_style(PaintStyle::Fill);
        frame_paint.set_color(Color::new(page.frame_color));

        let mut stroke_paint = Paint::default();
        stroke_paint.set_anti_alias(true);
        stroke_paint.set_style(PaintStyle::Stroke);
        stroke_paint.set_stroke_width(page.frame_stroke);
        stroke_paint.set_color(Color::new(page.frame_stroke_color));

        let mut bitmap_paint = Paint::default();
        bitmap_paint.set_anti_alias(true);

        Self {
            frame_paint,
            stroke_paint,
            bitmap_paint,
            sampling: SamplingOptions::new(FilterMode::Linear, MipmapMode::Linear),
            frame_radius: page.frame_radius,
            frame_inset: page.frame_inset,
            photo_border: page.photo_border,
            photo_corner_radius: page.photo_corner_radius,
            max_bitmap_dimension: page.max_bitmap_dimension.max(1),
        }
    }
}

/// Counts of what ended up in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub pages: usize,
    pub cards_drawn: usize,
    pub cards_skipped: usize,
    pub bytes_written: u64,
}

/// Paints the page background: fallback colour, then the template image if loaded.
pub fn draw_background(
    canvas: &Canvas,
    template: &ScrapbookTemplate,
    background: Option<&Image>,
    page: &PageConfig,
) {
    canvas.clear(Color::new(template.background_color));
    if let Some(image) = background {
        let mut paint = Paint::default();
        paint.set_anti_alias(true);
        canvas.draw_image_rect(image, None, Rect::from_wh(page.width, page.height), &paint);
    }
}

/// Draws one photo card. Returns `false` when the photo could not be decoded,
/// in which case nothing is drawn for it.
pub fn draw_placement(
    canvas: &Canvas,
    library: &PhotoLibrary,
    placement: &PagePlacement,
    style: &CardStyle,
) -> bool {
    let frame_rect = placement
        .rect
        .with_inset((style.frame_inset, style.frame_inset));
    let photo_area = frame_rect.with_inset((style.photo_border, style.photo_border));

    let target_width = (photo_area.width().max(1.0) as u32).clamp(1, style.max_bitmap_dimension);
    let target_height =
        (photo_area.height().max(1.0) as u32).clamp(1, style.max_bitmap_dimension);

    let Some(bitmap) = library.decode(&placement.photo, target_width, target_height) else {
        return false;
    };
    let Some(image) = bitmap.to_image() else {
        warn!(photo = %placement.photo, "Could not wrap decoded pixels in an image");
        return false;
    };

    let bitmap_rect = contain_rect(bitmap.width as f32, bitmap.height as f32, photo_area);

    canvas.save();
    canvas.rotate(placement.rotation, Some(frame_rect.center()));

    let frame = RRect::new_rect_xy(&frame_rect, style.frame_radius, style.frame_radius);
    canvas.draw_rrect(&frame, &style.frame_paint);
    canvas.draw_rrect(&frame, &style.stroke_paint);

    canvas.save();
    let clip = RRect::new_rect_xy(
        &bitmap_rect,
        style.photo_corner_radius,
        style.photo_corner_radius,
    );
    canvas.clip_rrect(clip, ClipOp::Intersect, true);
    canvas.draw_image_rect_with_sampling_options(
        &image,
        None,
        bitmap_rect,
        style.sampling,
        &style.bitmap_paint,
    );
    canvas.restore();
    canvas.restore();

    drop(image);
    drop(bitmap);
    true
}

/// Paints a full page. Returns `(drawn, skipped)` card counts.
pub fn render_page(
    canvas: &Canvas,
    library: &PhotoLibrary,
    template: &ScrapbookTemplate,
    background: Option<&Image>,
    layout: &PageLayout,
    page: &PageConfig,
    style: &CardStyle,
) -> (usize, usize) {
    draw_background(canvas, template, background, page);

    let mut drawn = 0;
    let mut skipped = 0;
    for placement in &layout.placements {
        if draw_placement(canvas, library, placement, style) {
            drawn += 1;
        } else {
            skipped += 1;
        }
    }
    (drawn, skipped)
}

/// Serializes `pages` as one PDF document into `out`.
///
/// The Skia document is closed before any write failure is reported, so no
/// native state outlives the call.
#[instrument(level = "info", skip(out, library, template, pages, page), fields(template = %template.id, pages = pages.len()))]
pub fn render_document<W: Write>(
    out: W,
    library: &PhotoLibrary,
    template: &ScrapbookTemplate,
    pages: &[PageLayout],
    page: &PageConfig,
) -> Result<RenderReport, ExportError> {
    let style = CardStyle::from_config(page);
    let background = match library.decode_reference(
        &template.background,
        page.width as u32,
        page.height as u32,
    ) {
        Ok(bitmap) => bitmap.to_image(),
        Err(e) => {
            debug!(background = %template.background, "Using background colour only: {}", e);
            None
        }
    };

    let mut sink = CheckedWriter::new(out);
    let mut report = RenderReport::default();
    {
        let mut document = skia_safe::pdf::new_document(&mut sink, None);
        for layout in pages {
            let mut on_page = document.begin_page((page.width, page.height), None);
            let (drawn, skipped) = render_page(
                on_page.canvas(),
                library,
                template,
                background.as_ref(),
                layout,
                page,
                &style,
            );
            document = on_page.end_page();

            report.pages += 1;
            report.cards_drawn += drawn;
            report.cards_skipped += skipped;
            debug!(page = layout.number, drawn, skipped, "Rendered page");
        }
        document.close();
    }

    report.bytes_written = sink.finish()?;
    Ok(report)
}

/// Remembers the first write failure, since Skia's stream callbacks cannot
/// propagate one.
struct CheckedWriter<W: Write> {
    inner: W,
    error: Option<io::Error>,
    written: u64,
}

impl<W: Write> CheckedWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            error: None,
            written: 0,
        }
    }

    fn finish(mut self) -> Result<u64, ExportError> {
        if let Some(e) = self.error.take() {
            return Err(ExportError::Pdf(e.to_string()));
        }
        self.inner.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> Write for CheckedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(e) = &self.error {
            return Err(io::Error::new(e.kind(), e.to_string()));
        }
        match self.inner.write_all(buf) {
            Ok(()) => {
                self.written += buf.len() as u64;
                Ok(buf.len())
            }
            Err(e) => {
                let reported = io::Error::new(e.kind(), e.to_string());
                self.error = Some(e);
                Err(reported)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
