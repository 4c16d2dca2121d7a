//! Problem-type classification.
//!
//! The [`Classifier`] is built once at startup and shared by handle. It is
//! either a trained random-forest model loaded from a JSON artifact, or the
//! fixed rule set used when no artifact could be loaded:
//!
//! | condition                                   | label            |
//! |---------------------------------------------|------------------|
//! | `rssi < -80 && ping > 100`                  | `traffic_surge`  |
//! | `speed < 5 && ping > 50`                    | `backhaul_issue` |
//! | `rssi > -50 && ping < 20 && speed > 10`     | `normal`         |
//! | otherwise                                   | `router_issue`   |
//!
//! A trained model that fails while predicting yields
//! [`labels::CLASSIFICATION_ERROR`]; classification itself never fails.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::{labels, Reading};

// ---

/// Inputs to the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    // ---
    pub rssi: f64,
    pub speed: f64,
    pub ping: f64,
    pub ping_timeout: bool,
    /// Unset drop rates are fed as `0.0`.
    pub speed_drop_rate: f64,
}

impl Features {
    // ---
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            rssi: reading.rssi,
            speed: reading.speed,
            ping: reading.ping,
            ping_timeout: reading.ping_timeout,
            speed_drop_rate: reading.speed_drop_rate.unwrap_or(0.0),
        }
    }

    /// Look up a feature by artifact column name.
    fn value(&self, column: &str) -> Option<f64> {
        // ---
        match column {
            "rssi" => Some(self.rssi),
            "speed" | "avg_d_kbps" => Some(self.speed),
            "ping" | "avg_lat_ms" => Some(self.ping),
            "ping_timeout" | "timeout" => Some(if self.ping_timeout { 1.0 } else { 0.0 }),
            "speed_drop_rate" => Some(self.speed_drop_rate),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model artifact contains no trees")]
    Empty,

    #[error("model expects unknown feature `{0}`")]
    UnknownFeature(String),

    #[error("tree {tree} references missing node or feature at node {node}")]
    BadNode { tree: usize, node: usize },

    #[error("tree {tree} does not terminate in a leaf")]
    NoLeaf { tree: usize },
}

/// One node of a decision tree. Splits send `value <= threshold` left.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        label: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

/// Random-forest artifact: majority vote over the trees.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestModel {
    // ---
    #[serde(default)]
    pub version: Option<String>,
    pub feature_columns: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl ForestModel {
    // ---
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        // ---
        let model: ForestModel = serde_json::from_str(json)?;
        if model.trees.is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(model)
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Predict a label. Ties go to the lexicographically smallest label.
    pub fn predict(&self, features: &Features) -> Result<String, ModelError> {
        // ---
        let row = self
            .feature_columns
            .iter()
            .map(|c| {
                features
                    .value(c)
                    .ok_or_else(|| ModelError::UnknownFeature(c.clone()))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, tree) in self.trees.iter().enumerate() {
            *votes.entry(tree.walk(i, &row)?).or_default() += 1;
        }

        let mut best: Option<(&str, usize)> = None;
        for (label, count) in votes {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((label, count));
            }
        }
        best.map(|(label, _)| label.to_string())
            .ok_or(ModelError::Empty)
    }
}

impl DecisionTree {
    // ---
    fn walk(&self, tree: usize, row: &[f64]) -> Result<&str, ModelError> {
        // ---
        let mut node = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(node) {
                Some(TreeNode::Leaf { label }) => return Ok(label.as_str()),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row
                        .get(*feature)
                        .ok_or(ModelError::BadNode { tree, node })?;
                    node = if *value <= *threshold { *left } else { *right };
                }
                None => return Err(ModelError::BadNode { tree, node }),
            }
        }
        Err(ModelError::NoLeaf { tree })
    }
}

/// Classification capability, selected once at construction.
#[derive(Debug, Clone)]
pub enum Classifier {
    TrainedModel(ForestModel),
    FixedRuleFallback,
}

impl Classifier {
    // ---
    /// Load the model artifact, falling back to the fixed rules if it is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        // ---
        match ForestModel::from_file(path) {
            Ok(model) => {
                info!(
                    path = %path.display(),
                    version = model.version.as_deref().unwrap_or("unversioned"),
                    features = ?model.feature_columns,
                    trees = model.trees.len(),
                    "Loaded trained classification model"
                );
                Classifier::TrainedModel(model)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "No trained model available, using fixed-rule fallback classifier"
                );
                Classifier::FixedRuleFallback
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Classifier::TrainedModel(_) => "trained_model",
            Classifier::FixedRuleFallback => "fixed_rule_fallback",
        }
    }

    /// Always returns a label.
    pub fn classify(&self, features: &Features) -> String {
        // ---
        match self {
            Classifier::FixedRuleFallback => fallback_rule(features).to_string(),
            Classifier::TrainedModel(model) => match model.predict(features) {
                Ok(label) => label,
                Err(e) => {
                    error!(error = %e, "Model prediction failed");
                    labels::CLASSIFICATION_ERROR.to_string()
                }
            },
        }
    }
}

/// The documented decision rule used when no trained model is loaded.
pub fn fallback_rule(f: &Features) -> &'static str {
    // ---
    if f.rssi < -80.0 && f.ping > 100.0 {
        labels::TRAFFIC_SURGE
    } else if f.speed < 5.0 && f.ping > 50.0 {
        labels::BACKHAUL_ISSUE
    } else if f.rssi > -50.0 && f.ping < 20.0 && f.speed > 10.0 {
        labels::NORMAL
    } else {
        labels::ROUTER_ISSUE
    }
}
