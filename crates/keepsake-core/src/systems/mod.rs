pub mod assets;
pub mod layout;
pub mod renderer;

pub use layout::{LayoutEngine, PageLayout, PagePlacement};
