//! Encore plugin sandbox
//!
//! Runs a single plugin's JavaScript source inside its own QuickJS runtime
//! with a minimal, explicit capability set.
//!
//! # Example
//!
//! ```javascript
//! module.exports = {
//!     onEnable() {
//!         console.log("enabled");
//!         this.timer = setInterval(() => console.debug("tick"), 1000);
//!     },
//!     onDisable() {
//!         clearInterval(this.timer);
//!     },
//!     onTrackChange(track) {
//!         console.info("now playing", track.title);
//!     },
//!     onThemeChange(isDark) {},
//!     contentScript() {
//!         return "document.body.dataset.encore = 'on';";
//!     },
//! };
//! ```
//!
//! # Global Objects
//!
//! - `module.exports` / `exports` - the hook table placeholder
//! - `console.log/info/warn/error/debug(...)` - logged through `tracing`,
//!   tagged with the plugin id
//! - `setTimeout`, `setInterval`, `clearTimeout`, `clearInterval`
//!
//! Timers never fire on their own. The host calls
//! [`Sandbox::run_due_timers`] from its event loop, so every callback runs on
//! the host thread and stops with [`Sandbox::shutdown`].

mod convert;
mod error;
mod globals;
mod hooks;
mod sandbox;
mod timers;

pub use error::{SandboxError, SandboxResult};
pub use hooks::Hook;
pub use sandbox::{Sandbox, SandboxOptions};
