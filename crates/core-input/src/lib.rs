//! Terminal input: normalization, app shortcut resolution, and the async
//! input service feeding the runtime channel.

mod normalize;
mod service;
mod shortcuts;

pub use normalize::{map_key_event, map_mod_mask, map_mouse_event, named_key_wire};
pub use service::{InputShutdown, spawn_async_input};
pub use shortcuts::{Action, ShortcutTable};
