//! Plugin Sandbox
//!
//! Each plugin gets its own QuickJS runtime and context. The context only
//! carries the capabilities registered in [`crate::globals`]; there is no
//! filesystem, network or process access to begin with, and nothing from the
//! host is reachable beyond that explicit surface.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use rquickjs::context::EvalOptions;
use rquickjs::function::This;
use rquickjs::{CatchResultExt, Context, Runtime, Value};

use crate::convert::json_to_js;
use crate::error::{SandboxError, SandboxResult};
use crate::globals::register_capabilities;
use crate::hooks::{Hook, HookTable};
use crate::timers::TimerQueue;

/// Resource limits applied to every plugin runtime
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    /// QuickJS heap limit in bytes
    pub memory_limit: Option<usize>,
    /// QuickJS stack limit in bytes
    pub max_stack_size: Option<usize>,
}

enum HookArg {
    None,
    Bool(bool),
    Json(serde_json::Value),
}

/// An isolated execution context running one plugin's source.
///
/// Not `Send`: a sandbox lives and dies on the host thread that created it.
pub struct Sandbox {
    plugin_id: String,
    alive: Cell<bool>,
    hooks: HookTable,
    timers: Rc<RefCell<TimerQueue>>,
    context: Context,
    runtime: Runtime,
}

impl Sandbox {
    /// Build a sandbox and run `source` in it once.
    ///
    /// Whatever the plugin assigns to `module.exports` becomes its hook table.
    /// Compile and top-level runtime errors fail the whole construction.
    pub fn new(
        plugin_id: impl Into<String>,
        source: &str,
        options: &SandboxOptions,
    ) -> SandboxResult<Self> {
        let plugin_id = plugin_id.into();

        let runtime = Runtime::new().map_err(|e| SandboxError::RuntimeCreation(e.to_string()))?;
        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = options.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        let context =
            Context::full(&runtime).map_err(|e| SandboxError::RuntimeCreation(e.to_string()))?;

        let mut sandbox = Self {
            plugin_id,
            alive: Cell::new(true),
            hooks: HookTable::empty(),
            timers: Rc::new(RefCell::new(TimerQueue::default())),
            context,
            runtime,
        };

        sandbox.context.with(|ctx| {
            register_capabilities(&ctx, &sandbox.plugin_id, &sandbox.timers)
                .map_err(|e| SandboxError::Capabilities(e.to_string()))
        })?;

        let hooks = sandbox.context.with(|ctx| {
            let mut options = EvalOptions::default();
            options.global = true;
            options.strict = false;
            options.backtrace_barrier = true;

            ctx.eval_with_options::<(), _>(source, options)
                .catch(&ctx)
                .map_err(|e| SandboxError::Compile {
                    plugin: sandbox.plugin_id.clone(),
                    message: e.to_string(),
                })?;

            let exports = ctx
                .eval::<Value, _>("module.exports")
                .catch(&ctx)
                .map_err(|e| SandboxError::Compile {
                    plugin: sandbox.plugin_id.clone(),
                    message: e.to_string(),
                })?;

            HookTable::resolve(&ctx, exports)
                .map_err(|e| SandboxError::Conversion(e.to_string()))
        })?;

        sandbox.hooks = hooks;
        sandbox.drain_jobs();

        tracing::debug!(
            plugin = %sandbox.plugin_id,
            hooks = ?sandbox.hooks.hooks(),
            "Plugin source evaluated"
        );
        Ok(sandbox)
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Hooks the plugin exported
    pub fn hooks(&self) -> Vec<Hook> {
        self.hooks.hooks()
    }

    pub fn has_hook(&self, hook: Hook) -> bool {
        self.hooks.get(hook).is_some()
    }

    pub fn on_enable(&self) -> SandboxResult<()> {
        self.invoke(Hook::Enable, HookArg::None).map(drop)
    }

    pub fn on_disable(&self) -> SandboxResult<()> {
        self.invoke(Hook::Disable, HookArg::None).map(drop)
    }

    pub fn on_track_change(&self, track: &serde_json::Value) -> SandboxResult<()> {
        self.invoke(Hook::TrackChange, HookArg::Json(track.clone()))
            .map(drop)
    }

    pub fn on_theme_change(&self, is_dark: bool) -> SandboxResult<()> {
        self.invoke(Hook::ThemeChange, HookArg::Bool(is_dark))
            .map(drop)
    }

    /// Call `contentScript()` inside this sandbox.
    ///
    /// `Ok(None)` when the hook is absent or returned `undefined`/`null`.
    pub fn content_script(&self) -> SandboxResult<Option<String>> {
        self.invoke(Hook::ContentScript, HookArg::None)
    }

    /// Invoke a hook. Absent hooks are not an error.
    ///
    /// Only a string return value is reported back; everything else the hook
    /// returns is dropped, except for `contentScript` which must return text.
    fn invoke(&self, hook: Hook, arg: HookArg) -> SandboxResult<Option<String>> {
        if !self.is_alive() {
            return Err(SandboxError::Terminated(self.plugin_id.clone()));
        }
        let Some(function) = self.hooks.get(hook) else {
            return Ok(None);
        };

        let result = self.context.with(|ctx| {
            let function = function
                .clone()
                .restore(&ctx)
                .map_err(|e| self.hook_error(hook, e.to_string()))?;
            let this = match self.hooks.this() {
                Some(this) => this
                    .clone()
                    .restore(&ctx)
                    .map_err(|e| self.hook_error(hook, e.to_string()))?
                    .into_value(),
                None => Value::new_undefined(ctx.clone()),
            };

            let returned = match arg {
                HookArg::None => function.call::<_, Value>((This(this),)),
                HookArg::Bool(b) => function.call::<_, Value>((This(this), b)),
                HookArg::Json(json) => json_to_js(&ctx, &json)
                    .and_then(|js| function.call::<_, Value>((This(this), js))),
            }
            .catch(&ctx)
            .map_err(|e| self.hook_error(hook, e.to_string()))?;

            self.returned_text(hook, returned)
        });

        self.drain_jobs();
        result
    }

    fn returned_text(&self, hook: Hook, returned: Value<'_>) -> SandboxResult<Option<String>> {
        if returned.is_undefined() || returned.is_null() {
            return Ok(None);
        }
        match returned.as_string() {
            Some(text) => text
                .to_string()
                .map(Some)
                .map_err(|e| self.hook_error(hook, e.to_string())),
            None if hook == Hook::ContentScript => Err(self.hook_error(
                hook,
                format!("expected a string, got {:?}", returned.type_of()),
            )),
            None => Ok(None),
        }
    }

    fn hook_error(&self, hook: Hook, message: String) -> SandboxError {
        SandboxError::Hook {
            plugin: self.plugin_id.clone(),
            hook,
            message,
        }
    }

    /// Earliest pending timer deadline, if any
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        if !self.is_alive() {
            return None;
        }
        self.timers.borrow().next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Run every timer due at `now`. Callback errors are logged and
    /// contained. Returns how many callbacks ran.
    pub fn run_due_timers(&self, now: Instant) -> usize {
        if !self.is_alive() {
            return 0;
        }

        let due = self.timers.borrow().due(now);
        let mut fired = 0;
        for id in due {
            // A previous callback may have shut us down or cancelled this one
            if !self.is_alive() {
                break;
            }
            let Some(callback) = self.timers.borrow_mut().take_for_run(id, now) else {
                continue;
            };
            fired += 1;

            self.context.with(|ctx| {
                let result = callback
                    .restore(&ctx)
                    .and_then(|function| function.call::<_, ()>(()))
                    .catch(&ctx);
                if let Err(e) = result {
                    tracing::warn!(plugin = %self.plugin_id, "Timer callback failed: {}", e);
                }
            });
        }

        if fired > 0 {
            self.drain_jobs();
        }
        fired
    }

    /// Run queued promise jobs until the queue is empty
    fn drain_jobs(&self) {
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    tracing::warn!(plugin = %self.plugin_id, "Promise job threw");
                }
            }
        }
    }

    /// Stop the sandbox: no hook or timer will run after this.
    pub fn shutdown(&self) {
        if self.alive.replace(false) {
            self.timers.borrow_mut().clear();
            self.runtime.run_gc();
        }
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }

    #[cfg(test)]
    pub(crate) fn eval_json(&self, expr: &str) -> Option<serde_json::Value> {
        self.context.with(|ctx| {
            let text: Option<String> = ctx.eval(format!("JSON.stringify({expr})")).ok()?;
            serde_json::from_str(&text?).ok()
        })
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        // Persistent handles must be released while the runtime is still alive
        self.timers.borrow_mut().clear();
        self.hooks = HookTable::empty();
    }
}
