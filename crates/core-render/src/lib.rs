//! Terminal-side output: image-protocol writer, coordinate mapping, toolbar
//! composition, and the render pass.

pub mod coord;
pub mod cursor;
pub mod kitty;
pub mod renderer;
pub mod toolbar;

pub use coord::{Layout, TermExtent};
pub use renderer::{
    CONTENT_IMAGE_ID, CURSOR_IMAGE_ID, ContentTransmission, CursorPos, Renderer,
};
pub use toolbar::{PromptView, ToolbarContext};
