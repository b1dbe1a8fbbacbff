//! Aggregated, immutable tool catalog
//!
//! Built once per agent configuration from the local executor's tools and
//! every configured provider's `tools/list`. Each entry carries a
//! pre-resolved [`ToolTarget`] so dispatch never re-scans providers.
//!
//! Registration order: local tools first, then providers in configured
//! order. The first registration of a name wins; later duplicates are
//! dropped and recorded as [`Collision`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::ToolDescriptor;
use crate::metrics::{CATALOG_TOOLS, PROVIDER_DISCOVERY};
use crate::model::ToolDefinition;
use crate::provider::ProviderClient;

/// Where a catalog entry is dispatched to
#[derive(Clone)]
pub enum ToolTarget {
    Local,
    Provider(Arc<dyn ProviderClient>),
}

impl ToolTarget {
    /// Metric/log label: "local" or the provider id
    pub fn label(&self) -> &str {
        match self {
            ToolTarget::Local => "local",
            ToolTarget::Provider(client) => client.id(),
        }
    }
}

impl fmt::Debug for ToolTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolTarget::Local => write!(f, "Local"),
            ToolTarget::Provider(client) => write!(f, "Provider({})", client.id()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub descriptor: ToolDescriptor,
    pub target: ToolTarget,
}

/// A tool name registered by more than one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub name: String,
    pub kept_source: String,
    pub dropped_source: String,
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    collisions: Vec<Collision>,
    unavailable: Vec<String>,
}

impl Catalog {
    /// Discover provider tools and merge them with the local tools
    ///
    /// Discovery runs concurrently; a provider that fails contributes zero
    /// tools and is listed in [`Catalog::unavailable_providers`]. Building
    /// never fails as a whole.
    ///
    /// # Arguments
    /// * `providers` - Provider clients in registration order
    /// * `local` - Descriptors served by the local executor
    /// * `allow_list` - When set, only these names survive (applied after collision resolution)
    pub async fn build(
        providers: &[Arc<dyn ProviderClient>],
        local: Vec<ToolDescriptor>,
        allow_list: Option<&[String]>,
    ) -> Self {
        let discoveries = join_all(providers.iter().map(|provider| async move {
            (provider.clone(), provider.list_tools().await)
        }))
        .await;

        let mut sources = vec![(ToolTarget::Local, local)];
        let mut unavailable = Vec::new();

        for (provider, discovery) in discoveries {
            match discovery {
                Ok(mut tools) => {
                    info!(provider = %provider.id(), tools = tools.len(), "Discovered provider tools");
                    PROVIDER_DISCOVERY.with_label_values(&[provider.id(), "ok"]).inc();
                    for tool in &mut tools {
                        tool.source_provider_id = Some(provider.id().to_string());
                    }
                    sources.push((ToolTarget::Provider(provider), tools));
                }
                Err(e) => {
                    warn!(provider = %provider.id(), error = %e, "Provider unavailable, skipping its tools");
                    PROVIDER_DISCOVERY.with_label_values(&[provider.id(), e.code()]).inc();
                    unavailable.push(provider.id().to_string());
                }
            }
        }

        let mut catalog = Self::from_sources(sources, allow_list);
        catalog.unavailable = unavailable;
        CATALOG_TOOLS.set(catalog.len() as i64);

        info!(
            tools = catalog.len(),
            collisions = catalog.collisions.len(),
            unavailable = catalog.unavailable.len(),
            "Tool catalog built"
        );

        catalog
    }

    /// Merge already-discovered sources in the given order
    pub fn from_sources(
        sources: Vec<(ToolTarget, Vec<ToolDescriptor>)>,
        allow_list: Option<&[String]>,
    ) -> Self {
        let mut catalog = Self::default();

        for (target, descriptors) in sources {
            for descriptor in descriptors {
                if let Some(&existing) = catalog.index.get(&descriptor.name) {
                    let collision = Collision {
                        name: descriptor.name.clone(),
                        kept_source: catalog.entries[existing].descriptor.source().to_string(),
                        dropped_source: descriptor.source().to_string(),
                    };
                    warn!(
                        tool = %collision.name,
                        kept = %collision.kept_source,
                        dropped = %collision.dropped_source,
                        "Tool name collision, keeping first registration"
                    );
                    catalog.collisions.push(collision);
                    continue;
                }

                catalog
                    .index
                    .insert(descriptor.name.clone(), catalog.entries.len());
                catalog.entries.push(CatalogEntry {
                    descriptor,
                    target: target.clone(),
                });
            }
        }

        if let Some(allowed) = allow_list {
            catalog
                .entries
                .retain(|entry| allowed.iter().any(|name| name == &entry.descriptor.name));
            catalog.index = catalog
                .entries
                .iter()
                .enumerate()
                .map(|(i, entry)| (entry.descriptor.name.clone(), i))
                .collect();
        }

        catalog
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    pub fn unavailable_providers(&self) -> &[String] {
        &self.unavailable
    }

    /// Tool definitions in the shape the model API expects
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .map(|d| ToolDefinition {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema.clone(),
            })
            .collect()
    }
}
