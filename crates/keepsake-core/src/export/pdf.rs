//! Scrapbook export: layout followed by PDF rendering.

use crate::catalog::ScrapbookTemplate;
use crate::config::PageConfig;
use crate::errors::ExportError;
use crate::systems::assets::PhotoLibrary;
use crate::systems::layout::LayoutEngine;
use crate::systems::renderer::{render_document, RenderReport};
use crate::types::PhotoRef;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Lays out `photos` with `template` and writes the PDF to `out`.
///
/// An empty photo list is rejected before anything is written.
#[instrument(level = "info", skip(library, photos, template, page, out), fields(photos = photos.len(), template = %template.id))]
pub fn export_scrapbook<W: Write>(
    library: &PhotoLibrary,
    photos: &[PhotoRef],
    template: &ScrapbookTemplate,
    page: &PageConfig,
    out: W,
) -> Result<RenderReport, ExportError> {
    if photos.is_empty() {
        return Err(ExportError::EmptyPhotoList);
    }

    // A photo picked twice is read once; the map lives only for this export.
    let mut aspects: HashMap<PhotoRef, f32> = HashMap::new();
    let engine = LayoutEngine::new(page.clone());
    let pages = engine.paginate(photos, template, |photo| {
        if let Some(aspect) = aspects.get(photo) {
            return *aspect;
        }
        let aspect = library.aspect_ratio(photo);
        aspects.insert(photo.clone(), aspect);
        aspect
    });
    let report = render_document(out, library, template, &pages, page)?;

    info!(
        pages = report.pages,
        drawn = report.cards_drawn,
        skipped = report.cards_skipped,
        "Scrapbook exported"
    );
    Ok(report)
}

/// File variant of `export_scrapbook`. A failed export leaves no file behind.
pub fn export_scrapbook_to_file(
    library: &PhotoLibrary,
    photos: &[PhotoRef],
    template: &ScrapbookTemplate,
    page: &PageConfig,
    path: &Path,
) -> Result<RenderReport, ExportError> {
    if photos.is_empty() {
        return Err(ExportError::EmptyPhotoList);
    }

    let file = File::create(path)?;
    let result = export_scrapbook(library, photos, template, page, BufWriter::new(file));
    if let Err(e) = &result {
        warn!(path = %path.display(), "Removing failed scrapbook: {}", e);
        let _ = std::fs::remove_file(path);
    }
    result
}
