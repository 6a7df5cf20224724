//! Shared state snapshots and the partial updates steps return.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

name_type!(
    /// Type-safe channel name wrapper.
    ChannelName
);

/// Immutable snapshot of every declared channel's current value.
///
/// States are produced by a [`ChannelSchema`](crate::ChannelSchema), either
/// as an initial state or by merging an [`Update`] into a previous state.
/// Steps only ever see a shared reference.
///
/// # Examples
///
/// ```
/// use meguri_core::{ChannelSchema, ValueType};
/// use serde_json::json;
///
/// let schema = ChannelSchema::builder()
///     .append("messages", ValueType::String)
///     .overwrite("quality", ValueType::Number)
///     .build()
///     .unwrap();
///
/// let state = schema.state([("quality", json!(0.5))]).unwrap();
/// assert_eq!(state.get("quality"), Some(&json!(0.5)));
/// assert_eq!(state.get("messages"), Some(&json!([])));
/// assert_eq!(state.get_as::<f64>("quality"), Some(0.5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    values: BTreeMap<ChannelName, Value>,
}

impl State {
    pub(crate) fn from_values(values: BTreeMap<ChannelName, Value>) -> Self {
        Self { values }
    }

    pub(crate) fn values_mut(&mut self) -> &mut BTreeMap<ChannelName, Value> {
        &mut self.values
    }

    /// Returns the value of a channel.
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.values.get(channel)
    }

    /// Returns the value of a channel converted to `T`.
    ///
    /// Returns `None` if the channel doesn't exist or the value doesn't convert.
    pub fn get_as<T: DeserializeOwned>(&self, channel: &str) -> Option<T> {
        self.get(channel)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Returns `true` if the state holds a value for the channel.
    pub fn contains(&self, channel: &str) -> bool {
        self.values.contains_key(channel)
    }

    /// Returns an iterator over channel names and values, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelName, &Value)> {
        self.values.iter()
    }

    /// Returns the number of channels.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the state holds no channels.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Renders the state as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }
}

/// Partial update returned by a step.
///
/// Holds an ordered list of channel writes. A channel may be written more
/// than once; writes are reduced in the order they were added. An empty
/// update means "no change".
///
/// # Examples
///
/// ```
/// use meguri_core::Update;
///
/// let update = Update::new()
///     .set("messages", "draft")
///     .set("quality", 0.9);
/// assert_eq!(update.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    writes: Vec<(ChannelName, Value)>,
}

impl Update {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a write and returns the update.
    pub fn set(mut self, channel: impl Into<ChannelName>, value: impl Into<Value>) -> Self {
        self.insert(channel, value);
        self
    }

    /// Adds a write in place.
    pub fn insert(&mut self, channel: impl Into<ChannelName>, value: impl Into<Value>) {
        self.writes.push((channel.into(), value.into()));
    }

    /// Returns an iterator over the writes in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelName, &Value)> {
        self.writes.iter().map(|(k, v)| (k, v))
    }

    /// Returns `true` if any write targets the channel.
    pub fn writes_to(&self, channel: &str) -> bool {
        self.writes.iter().any(|(k, _)| k.as_str() == channel)
    }

    /// Returns the number of writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns `true` if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl IntoIterator for Update {
    type Item = (ChannelName, Value);
    type IntoIter = std::vec::IntoIter<(ChannelName, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Update
where
    K: Into<ChannelName>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            writes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
