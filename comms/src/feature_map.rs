use std::collections::{BTreeMap, btree_map};

use serde::{Deserialize, Serialize};

use crate::{CommsErr, Result};

/// Name and length of one parameter vector inside a flattened feature map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub len: usize,
}

/// A named collection of a model's trainable parameter vectors at a point in time.
///
/// Keys are kept ordered so flattening is deterministic on both ends of the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMap {
    features: BTreeMap<String, Vec<f32>>,
}

impl FeatureMap {
    /// Creates an empty `FeatureMap`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter vector, returning the previous one under the same name.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f32>) -> Option<Vec<f32>> {
        self.features.insert(name.into(), values)
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.features.get(name).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        self.features.get_mut(name).map(Vec::as_mut_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.features
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut [f32])> {
        self.features
            .iter_mut()
            .map(|(name, values)| (name.as_str(), values.as_mut_slice()))
    }

    /// The amount of named vectors.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The total amount of scalar parameters across every vector.
    pub fn num_params(&self) -> usize {
        self.features.values().map(Vec::len).sum()
    }

    /// Returns `true` if both maps hold the same names with the same vector lengths.
    pub fn same_shape(&self, other: &FeatureMap) -> bool {
        self.len() == other.len()
            && self
                .features
                .iter()
                .zip(&other.features)
                .all(|((a, va), (b, vb))| a == b && va.len() == vb.len())
    }

    /// Flattens the map into its specs and a single contiguous vector, in key order.
    ///
    /// # Returns
    /// The specs needed to rebuild the map and the concatenated values.
    pub fn flatten(&self) -> (Vec<FeatureSpec>, Vec<f32>) {
        let mut specs = Vec::with_capacity(self.len());
        let mut flat = Vec::with_capacity(self.num_params());

        for (name, values) in &self.features {
            specs.push(FeatureSpec {
                name: name.clone(),
                len: values.len(),
            });
            flat.extend_from_slice(values);
        }

        (specs, flat)
    }

    /// Rebuilds a map from its flattened representation.
    ///
    /// # Arguments
    /// * `specs` - The name and length of every vector, in payload order.
    /// * `flat` - The concatenated values.
    ///
    /// # Errors
    /// `CommsErr::PayloadMismatch` if the lengths don't add up, `CommsErr::DuplicateFeature`
    /// if a name is repeated.
    pub fn from_flat(specs: &[FeatureSpec], flat: &[f32]) -> Result<Self> {
        let expected: usize = specs.iter().map(|spec| spec.len).sum();
        if expected != flat.len() {
            return Err(CommsErr::PayloadMismatch {
                got: flat.len(),
                expected,
            });
        }

        let mut features = BTreeMap::new();
        let mut rest = flat;

        for spec in specs {
            let (values, tail) = rest.split_at(spec.len);
            rest = tail;

            if features.insert(spec.name.clone(), values.to_vec()).is_some() {
                return Err(CommsErr::DuplicateFeature(spec.name.clone()));
            }
        }

        Ok(Self { features })
    }
}

impl FromIterator<(String, Vec<f32>)> for FeatureMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f32>)>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FeatureMap {
    type Item = (String, Vec<f32>);
    type IntoIter = btree_map::IntoIter<String, Vec<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}
