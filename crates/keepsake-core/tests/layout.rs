//! Scrapbook Layout Tests
//!
//! Pagination properties over mixed aspect ratios and all built-in templates.

use keepsake_core::catalog::{ScrapbookTemplate, TemplateCatalog};
use keepsake_core::config::PageConfig;
use keepsake_core::systems::layout::LayoutEngine;
use keepsake_core::PhotoRef;

fn refs(n: usize) -> Vec<PhotoRef> {
    (0..n).map(|i| PhotoRef::new(format!("photo{}.jpg", i))).collect()
}

/// Cycles through portrait, square, landscape and panorama shapes.
fn aspect_for(photo: &PhotoRef) -> f32 {
    let index: usize = photo
        .as_str()
        .trim_start_matches("photo")
        .trim_end_matches(".jpg")
        .parse()
        .unwrap();
    [0.5625, 1.0, 1.7778, 3.0, 0.75][index % 5]
}

/// Every photo lands on exactly one page, in order, no page is empty,
/// content never exceeds the usable height and pages are never stretched.
#[test]
fn layout_properties_hold_for_builtin_templates() {
    let engine = LayoutEngine::new(PageConfig::default());
    let usable = engine.page.usable_height();

    for template in TemplateCatalog::default().templates() {
        for count in [1usize, 2, 7, 25, 60] {
            let photos = refs(count);
            let pages = engine.paginate(&photos, template, aspect_for);

            assert!(!pages.is_empty(), "{} / {}", template.id, count);
            let indices: Vec<usize> = pages
                .iter()
                .flat_map(|p| p.placements.iter().map(|pl| pl.index))
                .collect();
            assert_eq!(indices, (0..count).collect::<Vec<_>>());

            for page in &pages {
                assert!(!page.placements.is_empty());
                assert!(page.scale > 0.0 && page.scale <= 1.0);
                assert!(page.content_height <= usable + 1e-2);
                for placement in &page.placements {
                    assert!(placement.rect.top >= engine.page.padding - 1e-3);
                    let floor = engine.page.height - engine.page.padding;
                    assert!(placement.rect.bottom <= floor + 1e-2);
                }
            }
        }
    }
}

/// Rotation depends only on the absolute index, not on page boundaries.
#[test]
fn rotation_follows_absolute_index() {
    let engine = LayoutEngine::new(PageConfig::default());
    let template = TemplateCatalog::default().find_by_id("travel").clone();
    let photos = refs(40);
    let pages = engine.paginate(&photos, &template, aspect_for);
    assert!(pages.len() > 1);

    for placement in pages.iter().flat_map(|p| &p.placements) {
        let expected = template.rotation_pattern[placement.index % template.rotation_pattern.len()];
        assert_eq!(placement.rotation, expected);
    }
}

/// Three photos (1:1, 16:9, 9:16) on a two-column template with pattern [-4, 5].
#[test]
fn three_photo_scenario() {
    let template = ScrapbookTemplate {
        id: "duo".into(),
        label: "Duo".into(),
        background: "backgrounds/duo.png".into(),
        background_color: 0xFFFFFFFF,
        photos_per_page: 3,
        columns: 2,
        rotation_pattern: vec![-4.0, 5.0],
    };
    let photos = refs(3);
    let aspects = [1.0f32, 16.0 / 9.0, 9.0 / 16.0];
    let engine = LayoutEngine::new(PageConfig::default());
    let pages = engine.paginate(&photos, &template, |p| {
        aspects[photos.iter().position(|x| x == p).unwrap()]
    });

    assert!(!pages.is_empty() && pages.len() <= 2);
    let rotations: Vec<f32> = pages
        .iter()
        .flat_map(|p| p.placements.iter().map(|pl| pl.rotation))
        .collect();
    assert_eq!(rotations, vec![-4.0, 5.0, -4.0]);

    // The 9:16 photo goes under the shorter, landscape column.
    let all: Vec<_> = pages.iter().flat_map(|p| &p.placements).collect();
    assert_eq!(all[2].rect.left, all[1].rect.left);
}

/// Underfull pages keep their natural size.
#[test]
fn underfull_page_is_not_stretched() {
    let engine = LayoutEngine::new(PageConfig::default());
    let template = TemplateCatalog::default().find_by_id("music").clone();
    let pages = engine.paginate(&refs(2), &template, |_| 1.0);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].scale, 1.0);
    let width = engine.column_width(3) - engine.page.photo_spacing;
    assert!((pages[0].placements[0].rect.width() - width).abs() < 1e-3);
}
