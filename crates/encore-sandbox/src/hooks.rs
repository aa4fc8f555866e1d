//! Exported hook table.

use std::collections::BTreeMap;
use std::fmt;

use rquickjs::{Ctx, Function, Object, Persistent, Value};

/// A named callback a plugin may export. Any subset may be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hook {
    Enable,
    Disable,
    TrackChange,
    ThemeChange,
    ContentScript,
}

impl Hook {
    pub const ALL: [Hook; 5] = [
        Hook::Enable,
        Hook::Disable,
        Hook::TrackChange,
        Hook::ThemeChange,
        Hook::ContentScript,
    ];

    /// Property name on the plugin's export object
    pub fn export_name(self) -> &'static str {
        match self {
            Hook::Enable => "onEnable",
            Hook::Disable => "onDisable",
            Hook::TrackChange => "onTrackChange",
            Hook::ThemeChange => "onThemeChange",
            Hook::ContentScript => "contentScript",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

/// The callbacks resolved from `module.exports` after the plugin ran.
pub(crate) struct HookTable {
    this: Option<Persistent<Object<'static>>>,
    functions: BTreeMap<Hook, Persistent<Function<'static>>>,
}

impl HookTable {
    /// Resolve the table from whatever the plugin left in the placeholder.
    /// Anything that is not an object yields an empty table.
    pub(crate) fn resolve<'js>(ctx: &Ctx<'js>, exports: Value<'js>) -> rquickjs::Result<Self> {
        let Some(object) = exports.as_object().cloned() else {
            return Ok(Self::empty());
        };

        let mut functions = BTreeMap::new();
        for hook in Hook::ALL {
            let value: Value = object.get(hook.export_name())?;
            if let Some(function) = value.as_function() {
                functions.insert(hook, Persistent::save(ctx, function.clone()));
            }
        }

        Ok(Self {
            this: Some(Persistent::save(ctx, object)),
            functions,
        })
    }

    pub(crate) fn empty() -> Self {
        Self {
            this: None,
            functions: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, hook: Hook) -> Option<&Persistent<Function<'static>>> {
        self.functions.get(&hook)
    }

    pub(crate) fn this(&self) -> Option<&Persistent<Object<'static>>> {
        self.this.as_ref()
    }

    pub(crate) fn hooks(&self) -> Vec<Hook> {
        self.functions.keys().copied().collect()
    }
}
