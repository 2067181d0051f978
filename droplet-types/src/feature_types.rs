use anyhow::{format_err, Error};
use serde::{Deserialize, Serialize};

/// Library type of gene expression features
pub static GENE_EXPRESSION: &str = "Gene Expression";
/// Library type of antibody capture features, the usual home of TotalSeq hashtags
pub static ANTIBODY_CAPTURE: &str = "Antibody Capture";
/// Library type of CellPlex multiplexing oligos
pub static MULTIPLEXING_CAPTURE: &str = "Multiplexing Capture";

/// Feature type label of every row of a count matrix. Labels are interned so a matrix with
/// tens of thousands of features only stores one small index per row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTypes {
    labels: Vec<String>,
    index: Vec<usize>,
}

impl FeatureTypes {
    /// Intern a per-feature vector of type labels.
    pub fn from_type_vector(feature_types: &[String]) -> FeatureTypes {
        let mut labels: Vec<String> = Vec::new();
        let index = feature_types
            .iter()
            .map(|t| match labels.iter().position(|l| l == t) {
                Some(i) => i,
                None => {
                    labels.push(t.clone());
                    labels.len() - 1
                }
            })
            .collect();
        FeatureTypes { labels, index }
    }

    /// All `n` features share one label.
    pub fn uniform(label: &str, n: usize) -> FeatureTypes {
        if n == 0 {
            return FeatureTypes::default();
        }
        FeatureTypes {
            labels: vec![label.to_string()],
            index: vec![0; n],
        }
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if there are no features
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Distinct labels, in order of first appearance
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Label of feature `row`
    pub fn label_of(&self, row: usize) -> &str {
        &self.labels[self.index[row]]
    }

    /// Rows carrying exactly `label`, or an error naming the labels that do exist.
    pub fn rows_of(&self, label: &str) -> Result<Vec<usize>, Error> {
        let Some(target) = self.labels.iter().position(|l| l == label) else {
            return Err(format_err!(
                "feature type '{}' not found, available: {:?}",
                label,
                self.labels
            ));
        };
        Ok(self
            .index
            .iter()
            .enumerate()
            .filter_map(|(row, &i)| (i == target).then_some(row))
            .collect())
    }

    /// Rows whose label contains `pattern`.
    pub fn rows_like(&self, pattern: &str) -> Vec<usize> {
        self.index
            .iter()
            .enumerate()
            .filter_map(|(row, &i)| self.labels[i].contains(pattern).then_some(row))
            .collect()
    }

    /// Feature types of a subset of rows, in the order given.
    pub fn select(&self, rows: &[usize]) -> FeatureTypes {
        let names: Vec<String> = rows.iter().map(|&r| self.label_of(r).to_string()).collect();
        FeatureTypes::from_type_vector(&names)
    }
}
