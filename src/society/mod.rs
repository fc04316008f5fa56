//! The external agent-society collaborator and its module catalog.
//!
//! The gateway never reasons about agents itself. Each runnable
//! configuration is a declarative [`ModuleManifest`] describing what the
//! task needs (visible browser, process isolation, a built-in default
//! task) and [`SocietyRunner`] is the opaque execution boundary.

pub mod runner;

pub use runner::{CommandSocietyRunner, SocietyOutcome, SocietyRunner};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declarative capability descriptor for one runnable agent configuration.
///
/// Replaces source-text inspection: routing reads these fields instead of
/// scanning module code for toolkit invocation patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tasks for this module must run in the browser worker pool with a
    /// real, non-headless browser.
    #[serde(default)]
    pub requires_visible_browser: bool,
    /// Run in a one-shot child process even without a visible browser.
    #[serde(default)]
    pub isolate: bool,
    /// Built-in task text substituted when the caller opts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_task: Option<String>,
}

impl ModuleManifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            requires_visible_browser: false,
            isolate: false,
            default_task: None,
        }
    }

    pub fn visible_browser(mut self) -> Self {
        self.requires_visible_browser = true;
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolate = true;
        self
    }

    pub fn with_default_task(mut self, task: impl Into<String>) -> Self {
        self.default_task = Some(task.into());
        self
    }
}

/// The set of known module manifests: built-ins merged with configuration
/// entries, configuration winning on name collision.
pub struct ModuleCatalog {
    modules: BTreeMap<String, ModuleManifest>,
}

impl ModuleCatalog {
    /// Built-in catalog mirroring the agent framework's bundled
    /// configurations.
    pub fn builtin() -> Self {
        let builtins = vec![
            ModuleManifest::new(
                "run",
                "Default agent collaboration mode, suitable for most tasks.",
            ),
            ModuleManifest::new(
                "run_mini",
                "Minimal configuration driving a visible browser window.",
            )
            .visible_browser()
            .with_default_task(
                "Navigate to Amazon.com and identify one product that is attractive \
                 to coders. Please provide the product name and price.",
            ),
            ModuleManifest::new(
                "run_test_browser",
                "Browser smoke-test configuration with a visible window.",
            )
            .visible_browser()
            .with_default_task("Open example.com and describe what you see."),
            ModuleManifest::new("run_deepseek_zh", "Deepseek model for Chinese tasks.").isolated(),
            ModuleManifest::new(
                "run_openai_compatible_model",
                "OpenAI-compatible model endpoint.",
            ),
            ModuleManifest::new("run_ollama", "Local ollama model.").isolated(),
            ModuleManifest::new("run_qwen_mini_zh", "Qwen model, minimal configuration."),
            ModuleManifest::new("run_qwen_zh", "Qwen model."),
            ModuleManifest::new("run_azure_openai", "Azure OpenAI model."),
            ModuleManifest::new("run_groq", "Groq model."),
        ];
        let mut modules = BTreeMap::new();
        for manifest in builtins {
            modules.insert(manifest.name.clone(), manifest);
        }
        Self { modules }
    }

    /// Built-ins overlaid with configured manifests.
    pub fn with_overrides(overrides: &[ModuleManifest]) -> Self {
        let mut catalog = Self::builtin();
        for manifest in overrides {
            catalog
                .modules
                .insert(manifest.name.clone(), manifest.clone());
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<&ModuleManifest> {
        self.modules.get(name)
    }

    pub fn list(&self) -> Vec<&ModuleManifest> {
        self.modules.values().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_flags_browser_modules() {
        let catalog = ModuleCatalog::builtin();
        assert!(!catalog.get("run").expect("run").requires_visible_browser);
        assert!(
            catalog
                .get("run_mini")
                .expect("run_mini")
                .requires_visible_browser
        );
        assert!(catalog.get("run_mini").expect("run_mini").default_task.is_some());
    }

    #[test]
    fn overrides_replace_builtins_by_name() {
        let custom = ModuleManifest::new("run", "customized").isolated();
        let catalog = ModuleCatalog::with_overrides(&[custom]);
        let manifest = catalog.get("run").expect("run");
        assert!(manifest.isolate);
        assert_eq!(manifest.description, "customized");
    }

    #[test]
    fn unknown_module_is_none() {
        let catalog = ModuleCatalog::builtin();
        assert!(catalog.get("does_not_exist").is_none());
    }

    #[test]
    fn overrides_can_add_new_modules() {
        let extra = ModuleManifest::new("run_custom_lab", "site-local module").visible_browser();
        let catalog = ModuleCatalog::with_overrides(&[extra]);
        assert!(
            catalog
                .get("run_custom_lab")
                .expect("added")
                .requires_visible_browser
        );
        assert!(catalog.names().len() > 10);
    }
}
