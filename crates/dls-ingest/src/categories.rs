//! Provider catalog as a flat arena
//!
//! Nodes are keyed by category code and point at their parent by code.
//! Walking up the tree is a bounded loop that reports cycles instead of
//! looping forever.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::models::{slugify, Category};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("Category {0} is its own ancestor")]
    Cycle(String),

    #[error("Unknown category {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub code: String,
    pub name: String,
    pub parent: Option<String>,
    pub position: u32,
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTree {
    nodes: Vec<CategoryNode>,
    index: HashMap<String, usize>,
}

impl CategoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node; a code seen before keeps its first definition.
    /// Position is the rank among siblings already present.
    pub fn insert(&mut self, code: impl Into<String>, name: impl Into<String>, parent: Option<&str>) -> bool {
        let code = code.into();
        if self.index.contains_key(&code) {
            return false;
        }
        let position = self
            .nodes
            .iter()
            .filter(|n| n.parent.as_deref() == parent)
            .count() as u32;
        self.index.insert(code.clone(), self.nodes.len());
        self.nodes.push(CategoryNode {
            code,
            name: name.into(),
            parent: parent.map(str::to_string),
            position,
            datasets: Vec::new(),
        });
        true
    }

    pub fn get(&self, code: &str) -> Option<&CategoryNode> {
        self.index.get(code).map(|&i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryNode> {
        self.nodes.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &CategoryNode> {
        self.nodes.iter().filter(|n| n.parent.is_none())
    }

    pub fn children<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a CategoryNode> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.parent.as_deref() == Some(code))
    }

    /// Link a dataset to a category, ignoring duplicates
    pub fn attach_dataset(&mut self, code: &str, dataset: &str) -> Result<(), CategoryError> {
        let i = *self
            .index
            .get(code)
            .ok_or_else(|| CategoryError::Unknown(code.to_string()))?;
        let node = &mut self.nodes[i];
        if !node.datasets.iter().any(|d| d == dataset) {
            node.datasets.push(dataset.to_string());
        }
        Ok(())
    }

    /// Parents of `code`, nearest first. A parent code that is not in the
    /// tree ends the walk.
    pub fn ancestors(&self, code: &str) -> Result<Vec<&CategoryNode>, CategoryError> {
        let mut node = self
            .get(code)
            .ok_or_else(|| CategoryError::Unknown(code.to_string()))?;
        let mut seen = HashSet::from([node.code.as_str()]);
        let mut out = Vec::new();

        for _ in 0..self.nodes.len() {
            let Some(parent) = node.parent.as_deref().and_then(|p| self.get(p)) else {
                return Ok(out);
            };
            if !seen.insert(parent.code.as_str()) {
                return Err(CategoryError::Cycle(code.to_string()));
            }
            out.push(parent);
            node = parent;
        }
        Err(CategoryError::Cycle(code.to_string()))
    }

    /// Every node must reach a root
    pub fn validate(&self) -> Result<(), CategoryError> {
        for node in &self.nodes {
            self.ancestors(&node.code)?;
        }
        Ok(())
    }

    /// Persisted documents for `provider_name`
    pub fn to_categories(&self, provider_name: &str) -> Vec<Category> {
        self.nodes
            .iter()
            .map(|n| Category {
                provider_name: provider_name.to_string(),
                category_code: n.code.clone(),
                name: n.name.clone(),
                slug: slugify(&format!("{}-{}", provider_name, n.code)),
                parent: n.parent.clone(),
                position: n.position,
                datasets: n.datasets.clone(),
            })
            .collect()
    }
}
