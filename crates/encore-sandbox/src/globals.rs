//! Sandbox capability globals
//!
//! Registers the only host surface a plugin can reach: the `module`/`exports`
//! placeholder, an id-tagged `console`, and the timer primitives.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use rquickjs::convert::Coerced;
use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, Function, Object, Persistent, Result as JsResult, Value};

use crate::timers::{TimerId, TimerQueue, delay_from_js};

/// Register every capability for `plugin_id` in the context's global scope
pub(crate) fn register_capabilities(
    ctx: &Ctx<'_>,
    plugin_id: &str,
    timers: &Rc<RefCell<TimerQueue>>,
) -> JsResult<()> {
    register_module(ctx)?;
    register_console(ctx, plugin_id)?;
    register_timers(ctx, timers)?;
    Ok(())
}

/// `module.exports` starts as an empty object, `exports` aliases it
fn register_module(ctx: &Ctx<'_>) -> JsResult<()> {
    let globals = ctx.globals();

    let exports = Object::new(ctx.clone())?;
    let module = Object::new(ctx.clone())?;
    module.set("exports", exports.clone())?;

    globals.set("module", module)?;
    globals.set("exports", exports)?;
    Ok(())
}

fn join_args(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Register the console object, every line tagged with the plugin id
fn register_console(ctx: &Ctx<'_>, plugin_id: &str) -> JsResult<()> {
    let console = Object::new(ctx.clone())?;

    let id = plugin_id.to_string();
    console.set(
        "log",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            tracing::info!(target: "encore::plugin", plugin = %id, "{}", join_args(args));
        })?,
    )?;

    let id = plugin_id.to_string();
    console.set(
        "info",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            tracing::info!(target: "encore::plugin", plugin = %id, "{}", join_args(args));
        })?,
    )?;

    let id = plugin_id.to_string();
    console.set(
        "warn",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            tracing::warn!(target: "encore::plugin", plugin = %id, "{}", join_args(args));
        })?,
    )?;

    let id = plugin_id.to_string();
    console.set(
        "error",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            tracing::error!(target: "encore::plugin", plugin = %id, "{}", join_args(args));
        })?,
    )?;

    let id = plugin_id.to_string();
    console.set(
        "debug",
        Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            tracing::debug!(target: "encore::plugin", plugin = %id, "{}", join_args(args));
        })?,
    )?;

    ctx.globals().set("console", console)?;
    Ok(())
}

fn handle_from_js(handle: Opt<Value<'_>>) -> Option<TimerId> {
    let n = handle.0?.as_number()?;
    (n.is_finite() && n >= 1.0 && n <= f64::from(TimerId::MAX)).then(|| n as TimerId)
}

/// Register setTimeout/setInterval and their cancel functions
fn register_timers<'js>(ctx: &Ctx<'js>, timers: &Rc<RefCell<TimerQueue>>) -> JsResult<()> {
    let globals = ctx.globals();

    for (name, repeat) in [("setTimeout", false), ("setInterval", true)] {
        let queue = timers.clone();
        globals.set(
            name,
            Function::new(
                ctx.clone(),
                move |callback: Function<'js>, delay: Opt<Value<'js>>| -> TimerId {
                    let ctx = callback.ctx().clone();
                    let callback = Persistent::save(&ctx, callback);
                    // Anything but a number means no delay
                    let delay = delay.0.and_then(|value| value.as_number());
                    queue.borrow_mut().schedule(
                        callback,
                        delay_from_js(delay),
                        repeat,
                        Instant::now(),
                    )
                },
            )?,
        )?;
    }

    for name in ["clearTimeout", "clearInterval"] {
        let queue = timers.clone();
        globals.set(
            name,
            Function::new(ctx.clone(), move |handle: Opt<Value<'js>>| {
                if let Some(id) = handle_from_js(handle) {
                    queue.borrow_mut().cancel(id);
                }
            })?,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    #[test]
    fn test_register_capabilities() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let timers = Rc::new(RefCell::new(TimerQueue::default()));

        ctx.with(|ctx| {
            register_capabilities(&ctx, "demo", &timers).unwrap();

            let globals = ctx.globals();
            let console: Object = globals.get("console").unwrap();
            let _log: Function = console.get("log").unwrap();
            let _timeout: Function = globals.get("setTimeout").unwrap();

            let aliased: bool = ctx.eval("module.exports === exports").unwrap();
            assert!(aliased);
        });

        timers.borrow_mut().clear();
    }

    #[test]
    fn test_timer_handles_are_cancellable() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let timers = Rc::new(RefCell::new(TimerQueue::default()));

        ctx.with(|ctx| {
            register_capabilities(&ctx, "demo", &timers).unwrap();
            let _: () = ctx
                .eval(
                    r#"
                    const a = setTimeout(() => {}, 10);
                    const b = setInterval(() => {}, 10);
                    clearTimeout(a);
                    clearTimeout(undefined);
                    console.log("scheduled", b, { ok: true });
                "#,
                )
                .unwrap();
        });

        assert_eq!(timers.borrow().len(), 1);
        timers.borrow_mut().clear();
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_console_lines_carry_plugin_id() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let timers = Rc::new(RefCell::new(TimerQueue::default()));

        tracing::subscriber::with_default(subscriber, || {
            ctx.with(|ctx| {
                register_capabilities(&ctx, "lyrics", &timers).unwrap();
                let _: () = ctx.eval(r#"console.warn("volume", 11);"#).unwrap();
            });
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("encore::plugin"));
        assert!(output.contains("plugin=lyrics"));
        assert!(output.contains("volume 11"));
    }
}
