//! Content Script Bridge
//!
//! Projects a plugin's page-facing code into the hosted page. The page is a
//! separate, more privileged context: the bridge never calls into it
//! directly, it only hands it self-contained snippets to run.
//!
//! Two snippets form the whole contract between a plugin and the page:
//!
//! - the loader removes any earlier element for the plugin, then appends a
//!   fresh `<script>` (or `<style>` for themes) with id `encore-plugin-<id>`
//! - the cleanup calls `window.__encore_cleanup_<id>` once if the page-side
//!   code registered it, deletes it, then removes the element
//!
//! Guarding against duplicate side effects on re-injection is up to the
//! page-side code (a flag on `window` is enough). The bridge only
//! guarantees the loader element itself is never duplicated.

mod channel;
mod headless;

pub use channel::ChannelPage;
pub use headless::HeadlessPage;

use tracing::{debug, warn};

/// Id prefix of every injected element
pub const ELEMENT_PREFIX: &str = "encore-plugin-";

/// Name prefix of the page-side cleanup function
pub const CLEANUP_PREFIX: &str = "__encore_cleanup_";

/// Error type for page collaborators
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("Page is not connected")]
    Disconnected,

    #[error("Page script failed: {0}")]
    Script(String),

    #[error("Failed to set up page: {0}")]
    Setup(String),
}

/// The hosted page, as seen from the host thread.
///
/// Delivery is fire-and-forget: `Ok` means the page accepted the snippet,
/// not that it finished running it.
pub trait PageHost {
    fn execute(&self, script: &str) -> Result<(), PageError>;

    /// Short description for logs
    fn describe(&self) -> String {
        "page".to_string()
    }
}

/// Builds a page collaborator on the host thread.
///
/// Collaborators may hold thread-bound state, so only the factory crosses
/// threads.
pub type PageFactory = Box<dyn FnOnce() -> Result<Box<dyn PageHost>, PageError> + Send>;

/// What gets injected for a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePayload {
    /// Content script text, run with page privileges
    Script(String),
    /// Theme stylesheet text
    Style(String),
}

impl PagePayload {
    fn tag(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::Style(_) => "style",
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Script(text) | Self::Style(text) => text,
        }
    }
}

/// Holds at most one page collaborator at a time
#[derive(Default)]
pub struct ContentBridge {
    page: Option<Box<dyn PageHost>>,
    generation: u64,
}

impl ContentBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current collaborator. Returns the new generation, which
    /// the caller hands back to [`ContentBridge::detach`].
    pub fn attach(&mut self, page: Box<dyn PageHost>) -> u64 {
        self.generation += 1;
        debug!("Attached {} (generation {})", page.describe(), self.generation);
        self.page = Some(page);
        self.generation
    }

    /// Drop the collaborator if it is still the one from `generation`
    pub fn detach(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.page.is_none() {
            return false;
        }
        if let Some(page) = self.page.take() {
            debug!("Detached {} (generation {})", page.describe(), generation);
        }
        true
    }

    pub fn is_attached(&self) -> bool {
        self.page.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Inject `payload` for `plugin_id`. Skipped (not queued) without a page.
    /// Returns whether the page accepted the loader.
    pub fn inject(&self, plugin_id: &str, payload: &PagePayload) -> bool {
        let Some(page) = &self.page else {
            debug!(plugin = %plugin_id, "No page attached, skipping injection");
            return false;
        };

        match page.execute(&loader_snippet(plugin_id, payload)) {
            Ok(()) => {
                debug!(plugin = %plugin_id, "Injected {}", payload.tag());
                true
            }
            Err(e) => {
                warn!(plugin = %plugin_id, "Injection failed: {}", e);
                false
            }
        }
    }

    /// Run the cleanup convention for `plugin_id` and remove its element
    pub fn remove(&self, plugin_id: &str) -> bool {
        let Some(page) = &self.page else {
            return false;
        };

        match page.execute(&cleanup_snippet(plugin_id)) {
            Ok(()) => {
                debug!(plugin = %plugin_id, "Removed page element");
                true
            }
            Err(e) => {
                warn!(plugin = %plugin_id, "Page cleanup failed: {}", e);
                false
            }
        }
    }
}

/// Deterministic id of the element injected for `plugin_id`
pub fn element_id(plugin_id: &str) -> String {
    format!("{ELEMENT_PREFIX}{plugin_id}")
}

/// Page-global name of the cleanup function for `plugin_id`
pub fn cleanup_global(plugin_id: &str) -> String {
    let sanitized: String = plugin_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{CLEANUP_PREFIX}{sanitized}")
}

/// Escape text for embedding in a JS template literal
pub fn escape_template_literal(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '`' => escaped.push_str("\\`"),
            '$' => escaped.push_str("\\$"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// JS string literal for an arbitrary value
fn js_string(value: &str) -> String {
    // A JSON string is a valid JS string literal
    serde_json::Value::String(value.to_string()).to_string()
}

/// Snippet that (re)creates the plugin's element in the page
pub fn loader_snippet(plugin_id: &str, payload: &PagePayload) -> String {
    format!(
        r#"(function () {{
  var id = {id};
  var prior = document.getElementById(id);
  if (prior) prior.remove();
  var el = document.createElement("{tag}");
  el.id = id;
  el.textContent = `{text}`;
  (document.head || document.documentElement).appendChild(el);
}})();"#,
        id = js_string(&element_id(plugin_id)),
        tag = payload.tag(),
        text = escape_template_literal(payload.text()),
    )
}

/// Snippet that runs the page-side cleanup once, then removes the element
pub fn cleanup_snippet(plugin_id: &str) -> String {
    format!(
        r#"(function () {{
  var name = {name};
  var cleanup = window[name];
  if (typeof cleanup === "function") {{
    try {{
      cleanup();
    }} catch (e) {{
      console.error("Cleanup for " + name + " failed:", e);
    }}
  }}
  if (!delete window[name]) window[name] = undefined;
  var el = document.getElementById({id});
  if (el) el.remove();
}})();"#,
        name = js_string(&cleanup_global(plugin_id)),
        id = js_string(&element_id(plugin_id)),
    )
}
