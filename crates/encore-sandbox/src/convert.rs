//! JSON to JavaScript value conversion.

use rquickjs::{Array, Ctx, IntoJs, Object, Value};

/// Convert a `serde_json::Value` into a JavaScript value owned by `ctx`.
///
/// Integers outside the `i32` range become floats, matching what a JS engine
/// would do with the same literal.
pub(crate) fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    json: &serde_json::Value,
) -> rquickjs::Result<Value<'js>> {
    match json {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(Value::new_int(ctx.clone(), i))
            } else {
                Ok(Value::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => s.as_str().into_js(ctx),
        serde_json::Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        serde_json::Value::Object(fields) => {
            let object = Object::new(ctx.clone())?;
            for (key, val) in fields {
                object.set(key.as_str(), json_to_js(ctx, val)?)?;
            }
            Ok(object.into_value())
        }
    }
}
