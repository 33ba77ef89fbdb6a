//! Scrapbook PDF Tests

mod common;

use keepsake_core::catalog::TemplateCatalog;
use keepsake_core::config::PageConfig;
use keepsake_core::export::pdf::{export_scrapbook, export_scrapbook_to_file};
use keepsake_core::systems::layout::LayoutEngine;
use keepsake_core::{ExportError, PhotoRef};

fn photos(n: usize) -> Vec<PhotoRef> {
    (0..n)
        .map(|i| match i % 3 {
            0 => common::photo(&format!("p{}", i), 120, 90),
            1 => common::photo(&format!("p{}", i), 90, 160),
            _ => common::photo(&format!("p{}", i), 100, 100),
        })
        .collect()
}

#[test]
fn writes_one_pdf_page_per_layout_page() {
    let dir = tempfile::tempdir().unwrap();
    let library = common::library(dir.path());
    let catalog = TemplateCatalog::default();
    let template = catalog.find_by_id("floral");
    let page = PageConfig::default();
    let photos = photos(12);

    let mut pdf = Vec::new();
    let report = export_scrapbook(&library, &photos, template, &page, &mut pdf).unwrap();

    let expected = LayoutEngine::new(page.clone())
        .paginate(&photos, template, |p| library.aspect_ratio(p))
        .len();
    assert!(pdf.starts_with(b"%PDF"));
    assert_eq!(report.pages, expected);
    assert_eq!(report.cards_drawn, 12);
    assert_eq!(report.cards_skipped, 0);
    assert_eq!(report.bytes_written, pdf.len() as u64);
}

/// A photo whose bytes cannot be read is left out; the rest still render.
#[test]
fn unreadable_photo_is_omitted() {
    let dir = tempfile::tempdir().unwrap();
    let library = common::library(dir.path());
    let catalog = TemplateCatalog::default();
    let mut photos = photos(3);
    photos.insert(1, PhotoRef::new("broken.jpg"));

    let mut pdf = Vec::new();
    let report = export_scrapbook(
        &library,
        &photos,
        catalog.find_by_id("tech"),
        &PageConfig::default(),
        &mut pdf,
    )
    .unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert_eq!(report.cards_drawn, 3);
    assert_eq!(report.cards_skipped, 1);
}

#[test]
fn unknown_template_uses_default() {
    let catalog = TemplateCatalog::default();
    assert_eq!(catalog.find_by_id("nope").id, catalog.default_template().id);
}

#[test]
fn empty_photo_list_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("book.pdf");
    let catalog = TemplateCatalog::default();

    let err = export_scrapbook_to_file(
        &common::library(dir.path()),
        &[],
        catalog.find_by_id("music"),
        &PageConfig::default(),
        &out,
    )
    .unwrap_err();
    assert!(matches!(err, ExportError::EmptyPhotoList));
    assert!(!out.exists());
}

#[test]
fn file_export_writes_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("book.pdf");
    let catalog = TemplateCatalog::default();

    let report = export_scrapbook_to_file(
        &common::library(dir.path()),
        &photos(5),
        catalog.find_by_id("travel"),
        &PageConfig::default(),
        &out,
    )
    .unwrap();
    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(report.bytes_written, bytes.len() as u64);
}

/// Aspect ratios are read per call, so an edited photo is never stale.
#[test]
fn edited_photo_gets_fresh_aspect_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let library = common::library(dir.path());
    let path = dir.path().join("edited.png");
    let photo = PhotoRef::new(path.display().to_string());

    image::RgbaImage::new(40, 20).save(&path).unwrap();
    assert_eq!(library.aspect_ratio(&photo), 2.0);

    image::RgbaImage::new(20, 40).save(&path).unwrap();
    assert_eq!(library.aspect_ratio(&photo), 0.5);
}

/// The same photo picked twice gets two cards.
#[test]
fn repeated_photo_is_laid_out_twice() {
    let dir = tempfile::tempdir().unwrap();
    let library = common::library(dir.path());
    let photo = common::photo("dup", 120, 90);

    let mut pdf = Vec::new();
    let report = export_scrapbook(
        &library,
        &[photo.clone(), photo],
        TemplateCatalog::default().find_by_id("floral"),
        &PageConfig::default(),
        &mut pdf,
    )
    .unwrap();
    assert_eq!(report.cards_drawn, 2);
}
