//! Terminal output helpers
//!
//! Progress bars are drawn on stderr only, and only when stderr is an
//! interactive terminal outside CI. Stdout always belongs to the child.

mod context;
mod progress;

pub use context::UiContext;
pub use progress::DownloadProgress;
