//! # Layout System
//!
//! Packs photos into fixed-size scrapbook pages.
//!
//! ## Responsibilities
//! - **Shortest-Column Placement**: Each photo goes into the column with the least
//!   accumulated height, sized by its aspect ratio to the column width.
//! - **Pagination**: A photo that would push content past the usable height opens
//!   a new page, unless it is the first photo on the page.
//! - **Compression**: A page whose content still exceeds the usable height is
//!   scaled down uniformly around the horizontal center. Pages are never stretched.
//!
//! ## Key Types
//! - `LayoutEngine`: Runs pagination for one page geometry.
//! - `PageLayout` / `PagePlacement`: The computed pages.

use crate::catalog::ScrapbookTemplate;
use crate::config::PageConfig;
use crate::types::PhotoRef;
use skia_safe::Rect;
use tracing::{debug, instrument};

/// One photo on a page: where it goes and how it is tilted.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlacement {
    pub photo: PhotoRef,
    /// Position of the photo in the input list.
    pub index: usize,
    /// Axis-aligned card rectangle. Rotation is applied around its center at render time.
    pub rect: Rect,
    /// Degrees, clockwise.
    pub rotation: f32,
}

/// A laid-out page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// 1-based page number.
    pub number: usize,
    pub placements: Vec<PagePlacement>,
    /// Content height after compression.
    pub content_height: f32,
    /// Compression factor applied to the page, always in `(0, 1]`.
    pub scale: f32,
}

/// Running height of every column on the current page.
struct ColumnHeights {
    heights: Vec<f32>,
    top: f32,
}

impl ColumnHeights {
    fn new(columns: usize, top: f32) -> Self {
        Self {
            heights: vec![top; columns],
            top,
        }
    }

    fn reset(&mut self) {
        for h in self.heights.iter_mut() {
            *h = self.top;
        }
    }

    /// Index of the shortest column; ties go to the leftmost.
    fn shortest(&self) -> usize {
        let mut best = 0;
        for (i, h) in self.heights.iter().enumerate() {
            if *h < self.heights[best] {
                best = i;
            }
        }
        best
    }

    /// Tallest column if `column` were set to `height`.
    fn max_with(&self, column: usize, height: f32) -> f32 {
        self.heights
            .iter()
            .enumerate()
            .map(|(i, h)| if i == column { height } else { *h })
            .fold(self.top, f32::max)
    }

    fn max(&self) -> f32 {
        self.heights.iter().copied().fold(self.top, f32::max)
    }
}

/// Computes page placements for a page geometry.
#[derive(Debug, Clone)]
pub struct LayoutEngine {
    pub page: PageConfig,
}

impl LayoutEngine {
    pub fn new(page: PageConfig) -> Self {
        Self { page }
    }

    /// Width of one column for `columns` evenly split columns.
    pub fn column_width(&self, columns: usize) -> f32 {
        let columns = columns.max(1);
        (self.page.usable_width() - self.page.spacing * (columns - 1) as f32) / columns as f32
    }

    /// Content height for a tallest column bottom of `column_bottom`.
    fn content_height(&self, column_bottom: f32) -> f32 {
        let padding = self.page.padding;
        let content_bottom = (column_bottom - self.page.spacing).max(padding);
        (content_bottom - padding).max(1.0)
    }

    /// Lays out `photos` in input order.
    ///
    /// `aspect_of` returns width / height for a photo; non-finite or
    /// non-positive values are treated as 1.0.
    ///
    /// Every photo lands in exactly one placement; an empty input yields no pages.
    #[instrument(level = "debug", skip(self, photos, template, aspect_of), fields(photos = photos.len(), template = %template.id))]
    pub fn paginate<F>(
        &self,
        photos: &[PhotoRef],
        template: &ScrapbookTemplate,
        mut aspect_of: F,
    ) -> Vec<PageLayout>
    where
        F: FnMut(&PhotoRef) -> f32,
    {
        if photos.is_empty() {
            return Vec::new();
        }

        let columns = template.column_count();
        let padding = self.page.padding;
        let spacing = self.page.spacing;
        let photo_spacing = self.page.photo_spacing;
        let column_width = self.column_width(columns);
        let usable_height = self.page.usable_height();
        let inset = photo_spacing / 2.0;

        let mut heights = ColumnHeights::new(columns, padding);
        let mut pages = Vec::new();
        let mut current: Vec<PagePlacement> = Vec::new();

        for (index, photo) in photos.iter().enumerate() {
            let aspect = aspect_of(photo);
            let aspect = if aspect.is_finite() && aspect > 0.0 {
                aspect
            } else {
                1.0
            };
            let cell_height = column_width / aspect;

            loop {
                let column = heights.shortest();
                let top = heights.heights[column];
                let bottom = top + cell_height;
                let updated = bottom + photo_spacing + spacing;

                let content_height = self.content_height(heights.max_with(column, updated));
                if content_height > usable_height && !current.is_empty() {
                    pages.push(self.finish_page(pages.len() + 1, &mut current, &heights));
                    heights.reset();
                    continue;
                }

                let left = padding + column as f32 * (column_width + spacing);
                let rect =
                    Rect::new(left, top, left + column_width, bottom).with_inset((inset, inset));

                current.push(PagePlacement {
                    photo: photo.clone(),
                    index,
                    rect,
                    rotation: template.rotation_for(index),
                });
                heights.heights[column] = updated;
                break;
            }
        }

        if !current.is_empty() {
            pages.push(self.finish_page(pages.len() + 1, &mut current, &heights));
        }
        pages
    }

    /// Closes the current page, compressing it if its content overflows.
    fn finish_page(
        &self,
        number: usize,
        placements: &mut Vec<PagePlacement>,
        heights: &ColumnHeights,
    ) -> PageLayout {
        let usable_height = self.page.usable_height();
        let content_height = self.content_height(heights.max());
        let scale = if content_height > usable_height {
            usable_height / content_height
        } else {
            1.0
        };

        let mut placements = std::mem::take(placements);
        if scale < 1.0 {
            for placement in placements.iter_mut() {
                placement.rect = self.scale_rect(placement.rect, scale);
            }
        }

        debug!(
            page = number,
            photos = placements.len(),
            content_height,
            scale,
            "Closed page"
        );

        PageLayout {
            number,
            placements,
            content_height: content_height * scale,
            scale,
        }
    }

    /// Scales `rect` by `scale` toward the top padding, keeping the content
    /// block centered horizontally.
    fn scale_rect(&self, rect: Rect, scale: f32) -> Rect {
        let padding = self.page.padding;
        let available_width = self.page.usable_width();
        let horizontal_offset = (available_width - available_width * scale) / 2.0;
        let left = padding + horizontal_offset + (rect.left - padding) * scale;
        let top = padding + (rect.top - padding) * scale;
        Rect::from_xywh(left, top, rect.width() * scale, rect.height() * scale)
    }
}
