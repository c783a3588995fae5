mod render_context;

pub mod vulkan_api;

pub use self::render_context::{ContextConfig, Listener, RenderContext};
