//! Notification Fan-out
//!
//! Relays host domain events to every active script plugin. Each delivery
//! is isolated: a failing hook is logged and the rest still get the event.

use encore_sandbox::{Hook, Sandbox, SandboxResult};
use tracing::{debug, warn};

use super::lifecycle::PluginHost;

impl PluginHost {
    /// Deliver a track change to every `onTrackChange` hook. Returns how many
    /// hooks ran without throwing.
    pub fn notify_track_change(&self, track: &serde_json::Value) -> usize {
        self.fan_out(Hook::TrackChange, |sandbox| sandbox.on_track_change(track))
    }

    /// Deliver a theme change to every `onThemeChange` hook
    pub fn notify_theme_change(&self, is_dark: bool) -> usize {
        self.fan_out(Hook::ThemeChange, |sandbox| sandbox.on_theme_change(is_dark))
    }

    fn fan_out(&self, hook: Hook, deliver: impl Fn(&Sandbox) -> SandboxResult<()>) -> usize {
        let mut delivered = 0;
        for (id, runtime) in &self.runtimes {
            let Some(sandbox) = &runtime.sandbox else {
                continue;
            };
            if !sandbox.has_hook(hook) {
                continue;
            }
            match deliver(sandbox) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(plugin = %id, "{}", e),
            }
        }
        debug!("Delivered {} to {} plugins", hook, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::HeadlessPage;
    use crate::host::{HostOptions, PluginHost};
    use crate::plugin::SettingsStore;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    async fn host_with(files: &[(&str, &str)]) -> (TempDir, PluginHost, HeadlessPage) {
        let temp = TempDir::new().unwrap();
        let options = HostOptions {
            plugins_dir: temp.path().join("plugins"),
            settings_path: temp.path().join("settings.json"),
            ..HostOptions::default()
        };
        std::fs::create_dir_all(&options.plugins_dir).unwrap();
        let store = SettingsStore::new(&options.settings_path);
        for (name, content) in files {
            std::fs::write(options.plugins_dir.join(name), content).unwrap();
            let id = name.rsplit_once('.').unwrap().0;
            store.set_enabled(id, true).await.unwrap();
        }

        let (changed_tx, _) = broadcast::channel(4);
        let mut host = PluginHost::new(&options, changed_tx);
        host.initialize().await.unwrap();
        let page = HeadlessPage::new().unwrap();
        host.attach_page(Box::new(page.clone()));
        (temp, host, page)
    }

    /// Mirrors the last track title it saw into the page
    const RECORDER: &str = r#"
        var last = null;
        module.exports = {
            onTrackChange(track) { last = track.title; },
            contentScript() { return "window.lastTrack = " + JSON.stringify(last) + ";"; },
        };
    "#;

    #[tokio::test]
    async fn test_throwing_hook_does_not_block_others() {
        let (_temp, host, page) = host_with(&[
            ("a-thrower.js", "module.exports = { onTrackChange() { throw new Error('boom'); } };"),
            ("b-recorder.js", RECORDER),
        ])
        .await;
        assert_eq!(host.active_count(), 2);

        let delivered = host.notify_track_change(&serde_json::json!({
            "title": "Blue in Green",
            "artist": "Miles Davis",
        }));
        assert_eq!(delivered, 1);

        host.reinject_all();
        assert_eq!(page.eval_json("window.lastTrack"), Some(serde_json::json!("Blue in Green")));
    }

    #[tokio::test]
    async fn test_theme_change_reaches_hooks_with_this_bound() {
        let script = r#"
            module.exports = {
                dark: null,
                onThemeChange(isDark) { this.dark = isDark; },
                contentScript() { return "window.dark = " + this.dark + ";"; },
            };
        "#;
        let (_temp, host, page) = host_with(&[
            ("theme-aware.js", script),
            ("silent.js", "module.exports = {};"),
            ("skin.css", "body {}"),
        ])
        .await;

        assert_eq!(host.notify_theme_change(true), 1);
        host.reinject_all();
        assert_eq!(page.eval_json("window.dark"), Some(serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_no_active_plugins() {
        let (_temp, host, _page) = host_with(&[]).await;
        assert_eq!(host.notify_track_change(&serde_json::json!({})), 0);
        assert_eq!(host.notify_theme_change(false), 0);
    }
}
