//! Headless page
//!
//! A stand-in for the hosted page: a QuickJS context with just enough DOM to
//! honor the loader and cleanup snippets. Appended `<script>` elements run at
//! page-global scope, like a page-injected userscript would.

use rquickjs::context::EvalOptions;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{CatchResultExt, Context, Function, Object, Runtime};

use super::{PageError, PageHost};

const DOM_SHIM: &str = r#"
(function (global) {
  global.window = global;

  function Element(tagName) {
    this.tagName = String(tagName).toUpperCase();
    this.id = "";
    this.textContent = "";
    this.children = [];
    this.parentNode = null;
  }

  Element.prototype.appendChild = function (child) {
    if (child.parentNode) child.remove();
    child.parentNode = this;
    this.children.push(child);
    if (child.tagName === "SCRIPT") (0, eval)(child.textContent);
    return child;
  };

  Element.prototype.removeChild = function (child) {
    var index = this.children.indexOf(child);
    if (index >= 0) {
      this.children.splice(index, 1);
      child.parentNode = null;
    }
    return child;
  };

  Element.prototype.remove = function () {
    if (this.parentNode) this.parentNode.removeChild(this);
  };

  function find(element, id) {
    for (var i = 0; i < element.children.length; i++) {
      var child = element.children[i];
      if (child.id === id) return child;
      var found = find(child, id);
      if (found) return found;
    }
    return null;
  }

  var documentElement = new Element("html");
  var head = new Element("head");
  var body = new Element("body");
  documentElement.appendChild(head);
  documentElement.appendChild(body);

  global.document = {
    documentElement: documentElement,
    head: head,
    body: body,
    createElement: function (tagName) {
      return new Element(tagName);
    },
    getElementById: function (id) {
      return find(documentElement, String(id));
    },
  };
})(globalThis);
"#;

/// In-process page collaborator backed by QuickJS.
///
/// Clones share the same page.
#[derive(Clone)]
pub struct HeadlessPage {
    context: Context,
    _runtime: Runtime,
}

impl HeadlessPage {
    pub fn new() -> Result<Self, PageError> {
        let runtime = Runtime::new().map_err(|e| PageError::Setup(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| PageError::Setup(e.to_string()))?;

        context.with(|ctx| -> Result<(), PageError> {
            register_console(&ctx).map_err(|e| PageError::Setup(e.to_string()))?;
            ctx.eval::<(), _>(DOM_SHIM)
                .catch(&ctx)
                .map_err(|e| PageError::Setup(e.to_string()))
        })?;

        Ok(Self {
            context,
            _runtime: runtime,
        })
    }

    /// Evaluate `expr` in the page and return its JSON value
    pub fn eval_json(&self, expr: &str) -> Option<serde_json::Value> {
        self.context.with(|ctx| {
            let text: Option<String> = ctx.eval(format!("JSON.stringify({expr})")).ok()?;
            serde_json::from_str(&text?).ok()
        })
    }
}

impl PageHost for HeadlessPage {
    fn execute(&self, script: &str) -> Result<(), PageError> {
        self.context.with(|ctx| {
            let mut options = EvalOptions::default();
            options.global = true;
            options.strict = false;

            ctx.eval_with_options::<(), _>(script, options)
                .catch(&ctx)
                .map_err(|e| PageError::Script(e.to_string()))
        })
    }

    fn describe(&self) -> String {
        "headless page".to_string()
    }
}

fn register_console(ctx: &rquickjs::Ctx<'_>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;

    for (name, level) in [
        ("log", tracing::Level::INFO),
        ("info", tracing::Level::INFO),
        ("warn", tracing::Level::WARN),
        ("error", tracing::Level::ERROR),
        ("debug", tracing::Level::DEBUG),
    ] {
        console.set(
            name,
            Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
                let line = args.0.into_iter().map(|arg| arg.0).collect::<Vec<_>>().join(" ");
                if level == tracing::Level::ERROR {
                    tracing::error!(target: "encore::page", "{}", line);
                } else if level == tracing::Level::WARN {
                    tracing::warn!(target: "encore::page", "{}", line);
                } else if level == tracing::Level::DEBUG {
                    tracing::debug!(target: "encore::page", "{}", line);
                } else {
                    tracing::info!(target: "encore::page", "{}", line);
                }
            })?,
        )?;
    }

    ctx.globals().set("console", console)?;
    Ok(())
}
