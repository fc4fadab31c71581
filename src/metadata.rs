//! Read-only sample annotations: the group, class and batch labels of each sample.
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleMetadata {
    pub group: String,
    pub class: String,
    pub batch: String,
}

impl SampleMetadata {
    pub fn new(
        group: impl Into<String>,
        class: impl Into<String>,
        batch: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            class: class.into(),
            batch: batch.into(),
        }
    }

    pub fn in_group(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }
}

/// A mapping from sample name to [`SampleMetadata`]
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleSheet {
    entries: HashMap<String, SampleMetadata>,
}

impl SampleSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample: impl Into<String>, metadata: SampleMetadata) {
        self.entries.insert(sample.into(), metadata);
    }

    pub fn get(&self, sample: &str) -> Option<&SampleMetadata> {
        self.entries.get(sample)
    }

    pub fn group_of(&self, sample: &str) -> Option<&str> {
        self.entries.get(sample).map(|m| m.group.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The group label of each of `samples`, in order. Samples without an
    /// entry get an empty label.
    pub fn groups_for<S: AsRef<str>>(&self, samples: &[S]) -> Vec<String> {
        samples
            .iter()
            .map(|s| self.group_of(s.as_ref()).unwrap_or_default().to_string())
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, SampleMetadata)> for SampleSheet {
    fn from_iter<T: IntoIterator<Item = (S, SampleMetadata)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_groups_for() {
        let sheet: SampleSheet = [
            ("a", SampleMetadata::in_group("Blank")),
            ("b", SampleMetadata::new("Treated", "QC", "1")),
        ]
        .into_iter()
        .collect();
        assert_eq!(sheet.len(), 2);
        assert_eq!(sheet.get("b").unwrap().batch, "1");
        assert_eq!(
            sheet.groups_for(&["b", "a", "c"]),
            vec!["Treated".to_string(), "Blank".to_string(), String::new()]
        );
    }
}
