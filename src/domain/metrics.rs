use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known metric names
pub const COHERENCE: &str = "coherence";
pub const ENERGY: &str = "energy";
pub const PHASE: &str = "phase";

/// One tick's worth of metrics for a single agent.
///
/// Values are semantically bounded in `[0, 1]`; the snapshot is immutable once
/// produced. Keys are kept sorted so serialized snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot(BTreeMap<String, f64>);

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by producers
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Uniform snapshot with the three standard metrics set to `value`
    pub fn uniform(value: f64) -> Self {
        Self::new()
            .with(COHERENCE, value)
            .with(ENERGY, value)
            .with(PHASE, value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Coherence is the metric the adaptive policy and peak detection key on
    pub fn coherence(&self) -> Option<f64> {
        self.get(COHERENCE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.values().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for MetricsSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={:.3}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_builder_and_display() {
        let snapshot = MetricsSnapshot::new()
            .with(ENERGY, 0.91)
            .with(COHERENCE, 0.9);

        assert_eq!(snapshot.coherence(), Some(0.9));
        assert_eq!(snapshot.len(), 2);
        // Sorted by key
        assert_eq!(snapshot.to_string(), "coherence=0.900 energy=0.910");
    }

    #[test]
    fn test_snapshot_serializes_as_plain_map() {
        let snapshot = MetricsSnapshot::uniform(0.5);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["coherence"], 0.5);
        assert_eq!(json["phase"], 0.5);

        let back: MetricsSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
