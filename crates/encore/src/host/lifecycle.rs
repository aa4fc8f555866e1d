//! Lifecycle Controller
//!
//! Owns every piece of live plugin state and moves plugins between
//! inactive and active. Lives on the host thread only.
//!
//! A runtime exists for an id iff the id is enabled and its last activation
//! succeeded. An enabled id whose activation failed stays enabled (and
//! persisted) and is reported as `activationFailed`; it is tried again on
//! the next refresh or restart, never automatically.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use encore_sandbox::{Sandbox, SandboxError, SandboxOptions};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use super::HostOptions;
use super::error::HostError;
use crate::bridge::{ContentBridge, PageHost, PagePayload};
use crate::plugin::{PluginKind, PluginMetadata, PluginRecord, PluginRegistry, SettingsStore};

/// Lifecycle state reported for a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub enum PluginState {
    Inactive,
    Active,
    /// Enabled, but the last activation attempt failed
    ActivationFailed,
}

/// A plugin as reported to the settings UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    pub kind: PluginKind,
    pub path: String,
    pub metadata: PluginMetadata,
    pub enabled: bool,
    pub state: PluginState,
    pub activated_at: Option<DateTime<Utc>>,
}

/// A live plugin
pub(crate) struct PluginRuntime {
    /// Script plugins only
    pub(crate) sandbox: Option<Sandbox>,
    /// Theme plugins only
    stylesheet: Option<String>,
    activated_at: DateTime<Utc>,
}

impl PluginRuntime {
    /// What to inject into the page, if anything
    fn page_payload(&self) -> Result<Option<PagePayload>, SandboxError> {
        if let Some(css) = &self.stylesheet {
            return Ok(Some(PagePayload::Style(css.clone())));
        }
        match &self.sandbox {
            Some(sandbox) => Ok(sandbox.content_script()?.map(PagePayload::Script)),
            None => Ok(None),
        }
    }
}

/// The single owner of registry, runtimes and the page bridge
pub struct PluginHost {
    registry: PluginRegistry,
    store: SettingsStore,
    sandbox_options: SandboxOptions,
    pub(crate) runtimes: BTreeMap<String, PluginRuntime>,
    failed: BTreeSet<String>,
    bridge: ContentBridge,
    changed_tx: broadcast::Sender<()>,
}

impl PluginHost {
    pub fn new(options: &HostOptions, changed_tx: broadcast::Sender<()>) -> Self {
        Self {
            registry: PluginRegistry::new(&options.plugins_dir),
            store: SettingsStore::new(&options.settings_path),
            sandbox_options: options.sandbox.clone(),
            runtimes: BTreeMap::new(),
            failed: BTreeSet::new(),
            bridge: ContentBridge::new(),
            changed_tx,
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        self.registry.dir()
    }

    /// Startup: scan and activate everything persisted as enabled
    pub async fn initialize(&mut self) -> Result<(), HostError> {
        let dir = self.registry.dir().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| HostError::Startup(format!("{}: {}", dir.display(), e)))?;

        let enabled = self.store.enabled().await;
        self.registry.scan(&enabled).await?;

        for id in self.registry.enabled_ids() {
            self.activate(&id).await;
        }

        info!(
            "Plugin host ready: {} plugins, {} active",
            self.registry.len(),
            self.runtimes.len()
        );
        self.emit_changed();
        Ok(())
    }

    /// Activate a registered, enabled plugin. Idempotent: an existing runtime
    /// is left alone. Returns whether a runtime exists afterwards.
    pub(crate) async fn activate(&mut self, id: &str) -> bool {
        if self.runtimes.contains_key(id) {
            return true;
        }
        let Some(record) = self.registry.get(id) else {
            warn!(plugin = %id, "Cannot activate unknown plugin");
            return false;
        };
        if !record.enabled {
            warn!(plugin = %id, "Refusing to activate disabled plugin");
            return false;
        }
        let (kind, path) = (record.kind, record.path.clone());

        // Always from disk, so edits apply on the next enable
        let source = match fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) => {
                error!(plugin = %id, "Failed to read {}: {}", path.display(), e);
                self.failed.insert(id.to_string());
                return false;
            }
        };

        let runtime = match kind {
            PluginKind::Script => {
                let sandbox = match Sandbox::new(id, &source, &self.sandbox_options) {
                    Ok(sandbox) => sandbox,
                    Err(e) => {
                        error!(plugin = %id, "Activation failed: {}", e);
                        self.failed.insert(id.to_string());
                        return false;
                    }
                };
                if let Err(e) = sandbox.on_enable() {
                    warn!(plugin = %id, "{}", e);
                }
                PluginRuntime {
                    sandbox: Some(sandbox),
                    stylesheet: None,
                    activated_at: Utc::now(),
                }
            }
            PluginKind::Theme => PluginRuntime {
                sandbox: None,
                stylesheet: Some(source),
                activated_at: Utc::now(),
            },
        };

        self.failed.remove(id);
        self.runtimes.insert(id.to_string(), runtime);
        info!(plugin = %id, "Plugin activated");

        self.inject(id);
        true
    }

    /// Tear down a runtime: `onDisable`, page cleanup, then the sandbox.
    /// No-op without a runtime.
    pub fn deactivate(&mut self, id: &str) -> bool {
        self.failed.remove(id);
        let Some(runtime) = self.runtimes.remove(id) else {
            return false;
        };

        if let Some(sandbox) = &runtime.sandbox {
            if let Err(e) = sandbox.on_disable() {
                warn!(plugin = %id, "{}", e);
            }
        }

        self.bridge.remove(id);

        if let Some(sandbox) = &runtime.sandbox {
            sandbox.shutdown();
        }
        info!(plugin = %id, "Plugin deactivated");
        true
    }

    /// Persist the flag, then activate or deactivate
    pub async fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<PluginSummary, HostError> {
        if !self.registry.contains(id) {
            return Err(HostError::UnknownPlugin(id.to_string()));
        }

        self.store.set_enabled(id, enabled).await?;
        self.registry.set_enabled(id, enabled);

        if enabled {
            self.activate(id).await;
        } else {
            self.deactivate(id);
        }

        self.summary(id)
            .ok_or_else(|| HostError::UnknownPlugin(id.to_string()))
    }

    /// Rebuild from disk and reconcile against what was enabled before.
    ///
    /// Every runtime is torn down first and the registry is fully rebuilt
    /// before any re-activation runs.
    pub async fn refresh_plugins(&mut self) -> Result<Vec<PluginSummary>, HostError> {
        let snapshot = self.registry.enabled_ids();

        let active: Vec<String> = self.runtimes.keys().cloned().collect();
        for id in &active {
            self.deactivate(id);
        }
        self.failed.clear();

        let scanned = self.registry.scan(&snapshot).await;
        if let Err(e) = &scanned {
            error!("Refresh scan failed, keeping previous catalog: {}", e);
        }

        for id in &snapshot {
            if self.registry.contains(id) {
                self.activate(id).await;
            }
        }
        scanned?;

        self.store.save_enabled(&self.registry.enabled_ids()).await?;
        debug!("Refreshed plugins: {} found, {} active", self.registry.len(), self.runtimes.len());

        self.emit_changed();
        Ok(self.list_plugins())
    }

    pub fn list_plugins(&self) -> Vec<PluginSummary> {
        self.registry
            .iter()
            .map(|record| self.record_summary(record))
            .collect()
    }

    pub fn summary(&self, id: &str) -> Option<PluginSummary> {
        self.registry.get(id).map(|record| self.record_summary(record))
    }

    fn record_summary(&self, record: &PluginRecord) -> PluginSummary {
        let runtime = self.runtimes.get(&record.id);
        let state = if runtime.is_some() {
            PluginState::Active
        } else if record.enabled && self.failed.contains(&record.id) {
            PluginState::ActivationFailed
        } else {
            PluginState::Inactive
        };

        PluginSummary {
            id: record.id.clone(),
            kind: record.kind,
            path: record.path.display().to_string(),
            metadata: record.metadata.clone(),
            enabled: record.enabled,
            state,
            activated_at: runtime.map(|r| r.activated_at),
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.runtimes.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.runtimes.len()
    }

    /// Use `page` from now on and re-inject every active plugin into it
    pub fn attach_page(&mut self, page: Box<dyn PageHost>) -> u64 {
        let generation = self.bridge.attach(page);
        self.reinject_all();
        generation
    }

    pub fn detach_page(&mut self, generation: u64) -> bool {
        self.bridge.detach(generation)
    }

    /// Inject every active plugin again, e.g. after the page reloaded
    pub fn reinject_all(&self) {
        for id in self.runtimes.keys() {
            self.inject(id);
        }
    }

    fn inject(&self, id: &str) {
        if !self.bridge.is_attached() {
            return;
        }
        let Some(runtime) = self.runtimes.get(id) else {
            return;
        };

        match runtime.page_payload() {
            Ok(Some(payload)) => {
                self.bridge.inject(id, &payload);
            }
            Ok(None) => {}
            Err(e) => warn!(plugin = %id, "Skipping injection: {}", e),
        }
    }

    /// Earliest timer deadline across all sandboxes
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.runtimes
            .values()
            .filter_map(|runtime| runtime.sandbox.as_ref()?.next_timer_deadline())
            .min()
    }

    /// Fire every due timer. Returns how many callbacks ran.
    pub fn run_due_timers(&self, now: Instant) -> usize {
        self.runtimes
            .values()
            .filter_map(|runtime| runtime.sandbox.as_ref())
            .map(|sandbox| sandbox.run_due_timers(now))
            .sum()
    }

    /// Deactivate everything
    pub fn shutdown(&mut self) {
        let active: Vec<String> = self.runtimes.keys().cloned().collect();
        for id in &active {
            self.deactivate(id);
        }
        info!("Plugin host stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed_tx.subscribe()
    }

    fn emit_changed(&self) {
        // No subscribers is fine
        let _ = self.changed_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HeadlessPage;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        host: PluginHost,
        page: HeadlessPage,
    }

    impl Fixture {
        fn plugins(&self) -> PathBuf {
            self.temp.path().join("plugins")
        }

        fn settings(&self) -> PathBuf {
            self.temp.path().join("settings.json")
        }

        fn write(&self, name: &str, content: &str) {
            std::fs::write(self.plugins().join(name), content).unwrap();
        }

        fn store(&self) -> SettingsStore {
            SettingsStore::new(self.settings())
        }
    }

    async fn fixture(files: &[(&str, &str)], enabled: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let options = HostOptions {
            plugins_dir: temp.path().join("plugins"),
            settings_path: temp.path().join("settings.json"),
            ..HostOptions::default()
        };
        std::fs::create_dir_all(&options.plugins_dir).unwrap();
        for (name, content) in files {
            std::fs::write(options.plugins_dir.join(name), content).unwrap();
        }
        let store = SettingsStore::new(&options.settings_path);
        for id in enabled {
            store.set_enabled(id, true).await.unwrap();
        }

        let (changed_tx, _) = broadcast::channel(16);
        let mut host = PluginHost::new(&options, changed_tx);
        let page = HeadlessPage::new().unwrap();
        host.attach_page(Box::new(page.clone()));
        host.initialize().await.unwrap();

        Fixture { temp, host, page }
    }

    /// Reports how often onEnable ran inside this sandbox
    const COUNTING: &str = r#"
        var enables = 0;
        module.exports = {
            onEnable() { enables += 1; },
            contentScript() { return "window.enables = " + enables + ";"; },
        };
    "#;

    #[tokio::test]
    async fn test_startup_activates_persisted_ids() {
        let f = fixture(
            &[("a.js", "module.exports = {};"), ("b.js", "module.exports = {};")],
            &["a"],
        )
        .await;

        assert!(f.host.is_active("a"));
        assert!(!f.host.is_active("b"));

        let list = f.host.list_plugins();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].state, PluginState::Active);
        assert!(list[0].activated_at.is_some());
        assert_eq!(list[1].state, PluginState::Inactive);
        assert!(!list[1].enabled);
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let mut f = fixture(&[("counter.js", COUNTING)], &["counter"]).await;
        assert!(f.host.is_active("counter"));

        assert!(f.host.activate("counter").await);
        assert!(f.host.activate("counter").await);

        assert_eq!(f.host.active_count(), 1);
        f.host.reinject_all();
        assert_eq!(f.page.eval_json("window.enables"), Some(serde_json::json!(1)));
        assert_eq!(f.page.eval_json("document.head.children.length"), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_enable_disable_round_trip() {
        let mut f = fixture(
            &[("lyrics.js", r#"module.exports = { contentScript() { return "window.lyrics = true;"; } };"#)],
            &[],
        )
        .await;

        let summary = f.host.set_enabled("lyrics", true).await.unwrap();
        assert_eq!(summary.state, PluginState::Active);
        assert!(f.store().enabled().await.contains("lyrics"));
        assert_eq!(
            f.page.eval_json(r#"document.getElementById("encore-plugin-lyrics") !== null"#),
            Some(serde_json::json!(true))
        );

        let summary = f.host.set_enabled("lyrics", false).await.unwrap();
        assert_eq!(summary.state, PluginState::Inactive);
        assert!(!summary.enabled);
        assert!(f.store().enabled().await.is_empty());
        assert_eq!(
            f.page.eval_json(r#"document.getElementById("encore-plugin-lyrics")"#),
            Some(serde_json::Value::Null)
        );
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let mut f = fixture(&[], &[]).await;
        assert!(matches!(
            f.host.set_enabled("ghost", true).await,
            Err(HostError::UnknownPlugin(id)) if id == "ghost"
        ));
        assert!(f.store().enabled().await.is_empty());
    }

    #[tokio::test]
    async fn test_activation_failure_stays_enabled() {
        let mut f = fixture(&[("broken.js", "module.exports = {")], &[]).await;

        let summary = f.host.set_enabled("broken", true).await.unwrap();
        assert!(summary.enabled);
        assert_eq!(summary.state, PluginState::ActivationFailed);
        assert!(!f.host.is_active("broken"));
        assert!(f.store().enabled().await.contains("broken"));

        // Fixed on disk, picked up on refresh
        f.write("broken.js", "module.exports = {};");
        f.host.refresh_plugins().await.unwrap();
        assert!(f.host.is_active("broken"));
    }

    #[tokio::test]
    async fn test_on_enable_throwing_still_activates() {
        let mut f = fixture(
            &[("grumpy.js", "module.exports = { onEnable() { throw new Error('no'); } };")],
            &[],
        )
        .await;
        let summary = f.host.set_enabled("grumpy", true).await.unwrap();
        assert_eq!(summary.state, PluginState::Active);
        assert!(f.host.is_active("grumpy"));
    }

    #[tokio::test]
    async fn test_activate_refuses_disabled_plugin() {
        let mut f = fixture(&[("quiet.js", COUNTING)], &[]).await;

        assert!(!f.host.activate("quiet").await);
        assert!(!f.host.is_active("quiet"));
        assert_eq!(f.host.summary("quiet").unwrap().state, PluginState::Inactive);
        assert_eq!(f.page.eval_json("document.head.children.length"), Some(serde_json::json!(0)));
    }

    #[tokio::test]
    async fn test_activation_reads_source_fresh() {
        let mut f = fixture(
            &[("fresh.js", r#"module.exports = { contentScript() { return "window.v = 1;"; } };"#)],
            &["fresh"],
        )
        .await;
        assert_eq!(f.page.eval_json("window.v"), Some(serde_json::json!(1)));

        f.write("fresh.js", r#"module.exports = { contentScript() { return "window.v = 2;"; } };"#);
        f.host.set_enabled("fresh", false).await.unwrap();
        f.host.set_enabled("fresh", true).await.unwrap();
        assert_eq!(f.page.eval_json("window.v"), Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_refresh_preserves_intent() {
        let mut f = fixture(
            &[("a.js", "module.exports = {};"), ("b.js", "module.exports = {};")],
            &["a"],
        )
        .await;

        // Touch both files; timestamps must not matter
        f.write("b.js", "module.exports = {};");
        f.write("a.js", "module.exports = {};");

        let list = f.host.refresh_plugins().await.unwrap();
        let states: Vec<_> = list.iter().map(|p| (p.id.as_str(), p.enabled, p.state)).collect();
        assert_eq!(
            states,
            vec![
                ("a", true, PluginState::Active),
                ("b", false, PluginState::Inactive),
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_after_files_change() {
        let mut f = fixture(
            &[("a.js", "module.exports = {};"), ("b.js", "module.exports = {};")],
            &["a"],
        )
        .await;

        std::fs::remove_file(f.plugins().join("b.js")).unwrap();
        f.write("c.js", "module.exports = {};");

        let list = f.host.refresh_plugins().await.unwrap();
        let states: Vec<_> = list.iter().map(|p| (p.id.as_str(), p.enabled, p.state)).collect();
        assert_eq!(
            states,
            vec![
                ("a", true, PluginState::Active),
                ("c", false, PluginState::Inactive),
            ]
        );
        assert!(f.host.summary("b").is_none());
    }

    #[tokio::test]
    async fn test_refresh_drops_vanished_ids_from_store() {
        let mut f = fixture(&[("a.js", ""), ("gone.js", "")], &["a", "gone"]).await;
        std::fs::remove_file(f.plugins().join("gone.js")).unwrap();

        f.host.refresh_plugins().await.unwrap();
        let enabled: Vec<_> = f.store().enabled().await.into_iter().collect();
        assert_eq!(enabled, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_emits_change_signal() {
        let mut f = fixture(&[], &[]).await;
        let mut rx = f.host.subscribe();
        f.host.refresh_plugins().await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_refresh_reruns_lifecycle() {
        let mut f = fixture(&[("counter.js", COUNTING)], &["counter"]).await;
        assert_eq!(f.page.eval_json("window.enables"), Some(serde_json::json!(1)));

        f.host.refresh_plugins().await.unwrap();
        // Fresh sandbox, so the count starts over
        assert_eq!(f.page.eval_json("window.enables"), Some(serde_json::json!(1)));
        assert_eq!(f.page.eval_json("document.head.children.length"), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_disable_runs_page_cleanup_once() {
        let script = r#"
            module.exports = {
                contentScript() {
                    return "window.cleaned = 0; window.__encore_cleanup_now_playing = function () { window.cleaned += 1; };";
                },
            };
        "#;
        let mut f = fixture(&[("now-playing.js", script)], &["now-playing"]).await;

        f.host.set_enabled("now-playing", false).await.unwrap();
        f.host.set_enabled("now-playing", false).await.unwrap();

        assert_eq!(f.page.eval_json("window.cleaned"), Some(serde_json::json!(1)));
        assert_eq!(
            f.page.eval_json("typeof window.__encore_cleanup_now_playing"),
            Some(serde_json::json!("undefined"))
        );
    }

    #[tokio::test]
    async fn test_content_script_error_skips_injection() {
        let mut f = fixture(
            &[("oops.js", "module.exports = { contentScript() { return 42; } };")],
            &[],
        )
        .await;
        let summary = f.host.set_enabled("oops", true).await.unwrap();
        assert_eq!(summary.state, PluginState::Active);
        assert_eq!(f.page.eval_json("document.head.children.length"), Some(serde_json::json!(0)));
    }

    #[tokio::test]
    async fn test_throwing_content_script_skips_injection() {
        let mut f = fixture(
            &[
                ("thrower.js", "module.exports = { contentScript() { throw new Error('nope'); } };"),
                ("fine.js", r#"module.exports = { contentScript() { return "window.fine = true;"; } };"#),
            ],
            &[],
        )
        .await;

        let summary = f.host.set_enabled("thrower", true).await.unwrap();
        assert_eq!(summary.state, PluginState::Active);
        assert!(f.host.is_active("thrower"));
        assert_eq!(
            f.page.eval_json(r#"document.getElementById("encore-plugin-thrower")"#),
            Some(serde_json::Value::Null)
        );

        f.host.set_enabled("fine", true).await.unwrap();
        assert_eq!(f.page.eval_json("window.fine"), Some(serde_json::json!(true)));
        assert_eq!(f.page.eval_json("document.head.children.length"), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_theme_injects_stylesheet() {
        let mut f = fixture(&[("midnight.css", "/* @name Midnight */ body { color: #fff; }")], &[]).await;

        f.host.set_enabled("midnight", true).await.unwrap();
        assert_eq!(
            f.page.eval_json(r#"document.getElementById("encore-plugin-midnight").tagName"#),
            Some(serde_json::json!("STYLE"))
        );
        assert_eq!(f.host.summary("midnight").unwrap().metadata.name, "Midnight");

        f.host.set_enabled("midnight", false).await.unwrap();
        assert_eq!(
            f.page.eval_json(r#"document.getElementById("encore-plugin-midnight")"#),
            Some(serde_json::Value::Null)
        );
    }

    #[tokio::test]
    async fn test_attach_reinjects_active_plugins() {
        let mut f = fixture(
            &[("a.js", r#"module.exports = { contentScript() { return "window.a = 1;"; } };"#)],
            &["a"],
        )
        .await;

        let reloaded = HeadlessPage::new().unwrap();
        let generation = f.host.attach_page(Box::new(reloaded.clone()));
        assert_eq!(reloaded.eval_json("window.a"), Some(serde_json::json!(1)));

        assert!(!f.host.detach_page(generation - 1));
        assert!(f.host.detach_page(generation));
    }

    #[tokio::test]
    async fn test_timers_run_and_stop_with_deactivation() {
        let script = r#"
            var ticks = 0;
            module.exports = {
                onEnable() { setInterval(function () { ticks += 1; }, 5); },
                contentScript() { return "window.ticks = " + ticks + ";"; },
            };
        "#;
        let mut f = fixture(&[("ticker.js", script)], &["ticker"]).await;

        let deadline = f.host.next_timer_deadline().unwrap();
        let later = deadline + Duration::from_millis(1);
        assert_eq!(f.host.run_due_timers(later), 1);
        f.host.reinject_all();
        assert_eq!(f.page.eval_json("window.ticks"), Some(serde_json::json!(1)));

        f.host.deactivate("ticker");
        assert!(f.host.next_timer_deadline().is_none());
        assert_eq!(f.host.run_due_timers(later + Duration::from_secs(1)), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cleans_up_page() {
        let script = r#"
            module.exports = {
                contentScript() {
                    return "window.__encore_cleanup_bye = function () { window.bye = true; };";
                },
            };
        "#;
        let mut f = fixture(&[("bye.js", script)], &["bye"]).await;
        f.host.shutdown();

        assert_eq!(f.host.active_count(), 0);
        assert_eq!(f.page.eval_json("window.bye"), Some(serde_json::json!(true)));
        // Shutdown is not a disable
        assert!(f.store().enabled().await.contains("bye"));
    }
}
