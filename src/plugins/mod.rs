// Built-in plugins for kiln

pub mod copy_plugin;
pub mod html_plugin;

pub use copy_plugin::CopyPlugin;
pub use html_plugin::HtmlPlugin;
