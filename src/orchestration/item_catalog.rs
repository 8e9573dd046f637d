//! # Item Catalog
//!
//! Resolves the templates chosen for a host into the concrete monitoring
//! items Item Provisioning creates.

use crate::clients::ItemSpec;
use crate::config::TemplateConfig;
use crate::error::{StepError, TerminalReason};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Templates requested for a host, plus the category recorded on its lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSelection {
    pub category_id: Option<i64>,
    pub templates: Vec<String>,
}

impl TemplateSelection {
    pub fn new<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category_id: None,
            templates: templates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }
}

#[async_trait]
pub trait ItemCatalog: Send + Sync {
    /// Items for `selection`; an empty result is a terminal misconfiguration
    async fn resolve(&self, selection: &TemplateSelection) -> Result<Vec<ItemSpec>, StepError>;
}

/// Catalog backed by the `[templates.<name>]` configuration sections
#[derive(Debug, Clone, Default)]
pub struct StaticItemCatalog {
    templates: BTreeMap<String, Vec<ItemSpec>>,
}

impl StaticItemCatalog {
    pub fn new(templates: BTreeMap<String, Vec<ItemSpec>>) -> Self {
        Self { templates }
    }

    pub fn from_config(templates: &BTreeMap<String, TemplateConfig>) -> Self {
        Self {
            templates: templates
                .iter()
                .map(|(name, template)| (name.clone(), template.items.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl ItemCatalog for StaticItemCatalog {
    async fn resolve(&self, selection: &TemplateSelection) -> Result<Vec<ItemSpec>, StepError> {
        let mut items: Vec<ItemSpec> = Vec::new();
        for name in &selection.templates {
            let template = self.templates.get(name).ok_or_else(|| {
                StepError::terminal(
                    "item_catalog.resolve",
                    TerminalReason::Misconfigured,
                    format!("unknown template '{name}'"),
                )
            })?;
            for item in template {
                if !items.iter().any(|existing| existing.key == item.key) {
                    items.push(item.clone());
                }
            }
        }

        if items.is_empty() {
            return Err(StepError::terminal(
                "item_catalog.resolve",
                TerminalReason::Misconfigured,
                "template selection resolved to no items",
            ));
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str) -> ItemSpec {
        ItemSpec::new(key, key)
    }

    fn catalog() -> StaticItemCatalog {
        let mut templates = BTreeMap::new();
        templates.insert("linux".to_string(), vec![item("system.cpu.load"), item("vm.memory.size")]);
        templates.insert("web".to_string(), vec![item("net.tcp.service"), item("system.cpu.load")]);
        StaticItemCatalog::new(templates)
    }

    #[tokio::test]
    async fn test_resolve_merges_templates_without_duplicates() {
        let items = catalog()
            .resolve(&TemplateSelection::new(["linux", "web"]))
            .await
            .unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["system.cpu.load", "vm.memory.size", "net.tcp.service"]);
    }

    #[tokio::test]
    async fn test_empty_selection_is_misconfigured() {
        let err = catalog()
            .resolve(&TemplateSelection::default())
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Misconfigured));
    }

    #[tokio::test]
    async fn test_unknown_template_is_misconfigured() {
        let err = catalog()
            .resolve(&TemplateSelection::new(["windows"]))
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Misconfigured));
    }
}
