//! Catalog lookup boundary
//!
//! Catalog and interaction records live in persistent storage owned by
//! another service. The engine only needs candidate lists and a popularity
//! ranking, plus a way to note that a user has touched an item.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

use shoprec_common::{Error, Result};

/// Catalog queries consumed by the ensemble
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Items the user has not interacted with, in catalog order
    async fn items_excluding(&self, user_id: &str) -> Result<Vec<String>>;

    /// The `n` most popular items, most popular first
    async fn item_popularity_rank(&self, n: usize) -> Result<Vec<String>>;

    /// Persist a user/item interaction
    async fn record_interaction(&self, user_id: &str, item_id: &str) -> Result<()>;
}

/// Catalog seed file layout
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<String>,
    #[serde(default)]
    popularity: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct CatalogState {
    /// Interaction counts per item
    popularity: HashMap<String, u64>,
    interactions: HashMap<String, HashSet<String>>,
}

/// In-process catalog
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    items: Vec<String>,
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    /// Catalog with the given items in catalog order
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let items = items
            .into_iter()
            .map(Into::into)
            .filter(|item: &String| seen.insert(item.clone()))
            .collect();
        Self {
            items,
            state: RwLock::new(CatalogState::default()),
        }
    }

    /// Seed popularity counts (builder style)
    pub fn with_popularity<I, S>(self, counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let popularity = counts.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            items: self.items,
            state: RwLock::new(CatalogState {
                popularity,
                interactions: HashMap::new(),
            }),
        }
    }

    /// Load a catalog from a TOML file with `items = [...]` and an optional
    /// `[popularity]` table
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: CatalogFile = toml::from_str(&content)?;
        if file.items.is_empty() {
            return Err(Error::Config(format!(
                "Catalog file {} lists no items",
                path.display()
            )));
        }
        Ok(Self::new(file.items).with_popularity(file.popularity))
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn items_excluding(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let seen = state.interactions.get(user_id);
        Ok(self
            .items
            .iter()
            .filter(|item| seen.map_or(true, |seen| !seen.contains(*item)))
            .cloned()
            .collect())
    }

    async fn item_popularity_rank(&self, n: usize) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut ranked: Vec<(usize, &String, u64)> = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (pos, item, state.popularity.get(item).copied().unwrap_or(0)))
            .collect();
        // Stable on catalog position for equal counts
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(n).map(|(_, item, _)| item.clone()).collect())
    }

    async fn record_interaction(&self, user_id: &str, item_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .interactions
            .entry(user_id.to_string())
            .or_default()
            .insert(item_id.to_string());
        *state.popularity.entry(item_id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}
