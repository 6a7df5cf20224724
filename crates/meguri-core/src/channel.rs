//! Channel schema: declared state fields and their reducer policies.

use crate::error::{ChannelError, SchemaError};
use crate::state::{ChannelName, State, Update};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Declared type of a channel value.
///
/// For append channels this is the type of each element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Any JSON value, including `null`.
    #[default]
    Any,
    /// A string.
    String,
    /// Any number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl ValueType {
    /// Returns `true` if the value is of this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    /// The value a channel of this type holds when nothing was written.
    pub fn zero(self) -> Value {
        match self {
            ValueType::Any => Value::Null,
            ValueType::String => Value::String(String::new()),
            ValueType::Number => Value::from(0.0),
            ValueType::Integer => Value::from(0),
            ValueType::Boolean => Value::Bool(false),
            ValueType::Array => Value::Array(Vec::new()),
            ValueType::Object => Value::Object(Map::new()),
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, ValueType::Number | ValueType::Integer)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

type CombineFn = dyn Fn(Value, Value) -> Value + Send + Sync;

/// How a step's write is combined with a channel's current value.
#[derive(Clone)]
pub enum Reducer {
    /// The new value replaces the old one.
    Overwrite,
    /// New element(s) are added to the end of the sequence.
    Append,
    /// The larger number is kept.
    Max,
    /// The smaller number is kept.
    Min,
    /// Object keys are merged; keys in the new value win.
    Merge,
    /// A named user-supplied combine function `(old, new) -> value`.
    Custom {
        /// Name shown in diagnostics and topology snapshots.
        name: &'static str,
        /// The combine function.
        combine: Arc<CombineFn>,
    },
}

impl Reducer {
    /// Creates a custom reducer.
    pub fn custom<F>(name: &'static str, combine: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Reducer::Custom {
            name,
            combine: Arc::new(combine),
        }
    }

    /// Returns the policy name.
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Overwrite => "overwrite",
            Reducer::Append => "append",
            Reducer::Max => "max",
            Reducer::Min => "min",
            Reducer::Merge => "merge",
            Reducer::Custom { name, .. } => *name,
        }
    }

    fn reduce(&self, current: Value, new: Value) -> Value {
        match self {
            Reducer::Overwrite => new,
            Reducer::Append => {
                let mut items = match current {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                match new {
                    Value::Array(new_items) => items.extend(new_items),
                    other => items.push(other),
                }
                Value::Array(items)
            }
            Reducer::Max => keep_if(current, new, |old, new| new > old),
            Reducer::Min => keep_if(current, new, |old, new| new < old),
            Reducer::Merge => match (current, new) {
                (Value::Object(mut current), Value::Object(new)) => {
                    current.extend(new);
                    Value::Object(current)
                }
                (_, new) => new,
            },
            Reducer::Custom { combine, .. } => combine(current, new),
        }
    }
}

fn keep_if(current: Value, new: Value, replace: fn(f64, f64) -> bool) -> Value {
    match (current.as_f64(), new.as_f64()) {
        (Some(old), Some(candidate)) if !replace(old, candidate) => current,
        _ => new,
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named field of shared state.
#[derive(Debug, Clone)]
pub struct Channel {
    name: ChannelName,
    value_type: ValueType,
    reducer: Reducer,
    default: Option<Value>,
}

impl Channel {
    /// Declares a channel with an explicit reducer.
    pub fn new(name: impl Into<ChannelName>, value_type: ValueType, reducer: Reducer) -> Self {
        Self {
            name: name.into(),
            value_type,
            reducer,
            default: None,
        }
    }

    /// Declares an overwrite channel.
    pub fn overwrite(name: impl Into<ChannelName>, value_type: ValueType) -> Self {
        Self::new(name, value_type, Reducer::Overwrite)
    }

    /// Declares an append channel whose elements are of `element_type`.
    pub fn append(name: impl Into<ChannelName>, element_type: ValueType) -> Self {
        Self::new(name, element_type, Reducer::Append)
    }

    /// Sets the value used when an initial state omits this channel.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Returns the channel name.
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Returns the declared value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Returns the reducer policy.
    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    fn initial_value(&self) -> Value {
        match (&self.default, &self.reducer) {
            (Some(value), _) => value.clone(),
            (None, Reducer::Append) => Value::Array(Vec::new()),
            (None, _) => self.value_type.zero(),
        }
    }

    fn mismatch(&self, expected: ValueType, value: &Value) -> ChannelError {
        ChannelError::TypeMismatch {
            channel: self.name.clone(),
            expected,
            found: kind_of(value),
        }
    }

    /// Validates a value written by a step.
    fn check_write(&self, value: &Value) -> Result<(), ChannelError> {
        match &self.reducer {
            Reducer::Append => match value {
                Value::Array(items) => items
                    .iter()
                    .find(|item| !self.value_type.matches(item))
                    .map_or(Ok(()), |item| Err(self.mismatch(self.value_type, item))),
                single if self.value_type.matches(single) => Ok(()),
                other => Err(self.mismatch(self.value_type, other)),
            },
            Reducer::Merge if !value.is_object() => Err(self.mismatch(ValueType::Object, value)),
            _ if self.value_type.matches(value) => Ok(()),
            _ => Err(self.mismatch(self.value_type, value)),
        }
    }

    /// Validates a value that replaces the channel wholesale (initial state).
    fn check_seed(&self, value: &Value) -> Result<(), ChannelError> {
        match &self.reducer {
            Reducer::Append => match value {
                Value::Array(_) => self.check_write(value),
                other => Err(self.mismatch(ValueType::Array, other)),
            },
            _ => self.check_write(value),
        }
    }
}

/// The set of channels making up a graph's shared state.
///
/// # Examples
///
/// ```
/// use meguri_core::{ChannelSchema, Update, ValueType};
/// use serde_json::json;
///
/// let schema = ChannelSchema::builder()
///     .append("messages", ValueType::String)
///     .overwrite("quality", ValueType::Number)
///     .build()
///     .unwrap();
///
/// let state = schema.default_state();
/// let next = schema
///     .merge(&state, Update::new().set("messages", "draft").set("quality", 0.9))
///     .unwrap();
///
/// assert_eq!(next.get("messages"), Some(&json!(["draft"])));
/// assert_eq!(next.get("quality"), Some(&json!(0.9)));
/// // The input snapshot is untouched.
/// assert_eq!(state.get("messages"), Some(&json!([])));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChannelSchema {
    channels: Vec<Channel>,
    index: HashMap<ChannelName, usize>,
}

impl ChannelSchema {
    /// Creates a new schema builder.
    pub fn builder() -> ChannelSchemaBuilder {
        ChannelSchemaBuilder::default()
    }

    /// Returns the channel with the given name.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.index.get(name).and_then(|&i| self.channels.get(i))
    }

    /// Returns an iterator over channels in declaration order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Returns the number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` if no channels are declared.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn lookup(&self, name: &ChannelName) -> Result<&Channel, ChannelError> {
        self.get(name.as_str())
            .ok_or_else(|| ChannelError::UnknownChannel(name.clone()))
    }

    /// Returns a state with every channel at its default value.
    pub fn default_state(&self) -> State {
        State::from_values(
            self.channels
                .iter()
                .map(|c| (c.name.clone(), c.initial_value()))
                .collect(),
        )
    }

    /// Builds an initial state, seeding the given channels and defaulting the rest.
    ///
    /// Values replace defaults wholesale; for append channels the value must be
    /// the full initial sequence.
    pub fn state<K, V, I>(&self, values: I) -> Result<State, ChannelError>
    where
        K: Into<ChannelName>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut state = self.default_state();
        for (name, value) in values {
            let name = name.into();
            let value = value.into();
            self.lookup(&name)?.check_seed(&value)?;
            state.values_mut().insert(name, value);
        }
        Ok(state)
    }

    /// Checks a state against the schema, returning a copy with any missing
    /// channels filled with defaults. The given state is left untouched.
    pub fn conform(&self, state: &State) -> Result<State, ChannelError> {
        let mut values: BTreeMap<ChannelName, Value> = BTreeMap::new();
        for (name, value) in state.iter() {
            self.lookup(name)?.check_seed(value)?;
            values.insert(name.clone(), value.clone());
        }
        for channel in &self.channels {
            values
                .entry(channel.name.clone())
                .or_insert_with(|| channel.initial_value());
        }
        Ok(State::from_values(values))
    }

    /// Merges an update into a state, producing the next state.
    ///
    /// Every write is validated before any is applied, so a rejected update
    /// leaves no partial effect. Channels absent from the update keep their
    /// value.
    pub fn merge(&self, state: &State, update: Update) -> Result<State, ChannelError> {
        let mut writes = Vec::with_capacity(update.len());
        for (name, value) in update {
            let channel = self.lookup(&name)?;
            channel.check_write(&value)?;
            writes.push((channel, value));
        }

        let mut next = state.clone();
        for (channel, value) in writes {
            let values = next.values_mut();
            let current = values
                .remove(&channel.name)
                .unwrap_or_else(|| channel.initial_value());
            values.insert(channel.name.clone(), channel.reducer.reduce(current, value));
        }
        Ok(next)
    }
}

/// Builder for [`ChannelSchema`].
#[derive(Debug, Default)]
pub struct ChannelSchemaBuilder {
    channels: Vec<Channel>,
}

impl ChannelSchemaBuilder {
    /// Adds a channel.
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Adds an overwrite channel.
    pub fn overwrite(self, name: impl Into<ChannelName>, value_type: ValueType) -> Self {
        self.channel(Channel::overwrite(name, value_type))
    }

    /// Adds an append channel.
    pub fn append(self, name: impl Into<ChannelName>, element_type: ValueType) -> Self {
        self.channel(Channel::append(name, element_type))
    }

    /// Validates the declarations and builds the schema.
    pub fn build(self) -> Result<ChannelSchema, SchemaError> {
        let mut index = HashMap::with_capacity(self.channels.len());
        for (i, channel) in self.channels.iter().enumerate() {
            if index.insert(channel.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateChannel(channel.name.clone()));
            }
            validate_channel(channel)?;
        }
        Ok(ChannelSchema {
            channels: self.channels,
            index,
        })
    }
}

fn validate_channel(channel: &Channel) -> Result<(), SchemaError> {
    let compatible = match channel.reducer {
        Reducer::Max | Reducer::Min => channel.value_type.is_numeric(),
        Reducer::Merge => matches!(channel.value_type, ValueType::Object | ValueType::Any),
        _ => true,
    };
    if !compatible {
        return Err(SchemaError::IncompatibleReducer {
            channel: channel.name.clone(),
            reducer: channel.reducer.name(),
            value_type: channel.value_type,
        });
    }
    match &channel.default {
        Some(value) if channel.check_seed(value).is_err() => {
            Err(SchemaError::InvalidDefault(channel.name.clone()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn critic_schema() -> ChannelSchema {
        ChannelSchema::builder()
            .append("messages", ValueType::String)
            .overwrite("quality", ValueType::Number)
            .overwrite("iterations", ValueType::Integer)
            .build()
            .expect("valid schema")
    }

    #[test]
    fn test_default_state() {
        let state = critic_schema().default_state();
        assert_eq!(state.get("messages"), Some(&json!([])));
        assert_eq!(state.get("quality"), Some(&json!(0.0)));
        assert_eq!(state.get("iterations"), Some(&json!(0)));
    }

    #[test]
    fn test_overwrite_replaces() {
        let schema = critic_schema();
        let state = schema.default_state();
        let next = schema
            .merge(&state, Update::new().set("quality", 0.3).set("quality", 0.7))
            .expect("merge");
        assert_eq!(next.get("quality"), Some(&json!(0.7)));
    }

    #[test]
    fn test_append_preserves_order_within_update() {
        let schema = critic_schema();
        let state = schema
            .state([("messages", json!(["seed"]))])
            .expect("state");
        let next = schema
            .merge(
                &state,
                Update::new()
                    .set("messages", json!(["a", "b"]))
                    .set("messages", "c"),
            )
            .expect("merge");
        assert_eq!(next.get("messages"), Some(&json!(["seed", "a", "b", "c"])));
    }

    #[test]
    fn test_absent_channel_unchanged() {
        let schema = critic_schema();
        let state = schema.state([("iterations", 4)]).expect("state");
        let next = schema
            .merge(&state, Update::new().set("quality", 1.0))
            .expect("merge");
        assert_eq!(next.get("iterations"), Some(&json!(4)));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let schema = critic_schema();
        let state = schema.default_state();
        let result = schema.merge(&state, Update::new().set("score", 1.0));
        assert_eq!(
            result,
            Err(ChannelError::UnknownChannel(ChannelName::new("score")))
        );
    }

    #[test]
    fn test_rejected_update_has_no_partial_effect() {
        let schema = critic_schema();
        let state = schema.default_state();
        let result = schema.merge(
            &state,
            Update::new().set("messages", "kept?").set("quality", "high"),
        );
        assert!(matches!(
            result,
            Err(ChannelError::TypeMismatch { expected: ValueType::Number, found: "string", .. })
        ));
        assert_eq!(state.get("messages"), Some(&json!([])));
    }

    #[test]
    fn test_append_element_type_checked() {
        let schema = critic_schema();
        let state = schema.default_state();
        let result = schema.merge(&state, Update::new().set("messages", json!(["ok", 3])));
        assert!(matches!(
            result,
            Err(ChannelError::TypeMismatch { expected: ValueType::String, found: "number", .. })
        ));
    }

    #[test]
    fn test_integer_channel_rejects_fraction() {
        let schema = critic_schema();
        let state = schema.default_state();
        assert!(schema
            .merge(&state, Update::new().set("iterations", 1.5))
            .is_err());
    }

    #[test]
    fn test_max_min_and_merge_reducers() {
        let schema = ChannelSchema::builder()
            .channel(Channel::new("best", ValueType::Number, Reducer::Max))
            .channel(Channel::new("worst", ValueType::Number, Reducer::Min).with_default(1.0))
            .channel(Channel::new("meta", ValueType::Object, Reducer::Merge))
            .build()
            .expect("valid schema");
        let state = schema.default_state();

        let update = Update::new()
            .set("best", 0.4)
            .set("best", 0.2)
            .set("worst", 0.6)
            .set("worst", 0.8)
            .set("meta", json!({"a": 1, "b": 1}))
            .set("meta", json!({"b": 2}));
        let next = schema.merge(&state, update).expect("merge");

        assert_eq!(next.get("best"), Some(&json!(0.4)));
        assert_eq!(next.get("worst"), Some(&json!(0.6)));
        assert_eq!(next.get("meta"), Some(&json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_custom_reducer() {
        let sum = Reducer::custom("sum", |old, new| {
            json!(old.as_i64().unwrap_or(0) + new.as_i64().unwrap_or(0))
        });
        let schema = ChannelSchema::builder()
            .channel(Channel::new("total", ValueType::Integer, sum))
            .build()
            .expect("valid schema");
        let state = schema.default_state();
        let next = schema
            .merge(&state, Update::new().set("total", 3).set("total", 4))
            .expect("merge");
        assert_eq!(next.get("total"), Some(&json!(7)));
        assert_eq!(schema.get("total").map(|c| c.reducer().name()), Some("sum"));
    }

    #[test]
    fn test_schema_validation() {
        let duplicate = ChannelSchema::builder()
            .overwrite("a", ValueType::Any)
            .append("a", ValueType::String)
            .build();
        assert_eq!(
            duplicate.err(),
            Some(SchemaError::DuplicateChannel(ChannelName::new("a")))
        );

        let max_on_string = ChannelSchema::builder()
            .channel(Channel::new("a", ValueType::String, Reducer::Max))
            .build();
        assert!(matches!(
            max_on_string,
            Err(SchemaError::IncompatibleReducer { reducer: "max", .. })
        ));

        let bad_default = ChannelSchema::builder()
            .channel(Channel::append("a", ValueType::String).with_default("not a list"))
            .build();
        assert_eq!(
            bad_default.err(),
            Some(SchemaError::InvalidDefault(ChannelName::new("a")))
        );
    }

    #[test]
    fn test_state_seed_validation() {
        let schema = critic_schema();
        assert!(schema.state([("messages", "single")]).is_err());
        assert!(matches!(
            schema.state([("unknown", 1)]),
            Err(ChannelError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_conform_fills_missing_channels() {
        let schema = critic_schema();
        let partial = ChannelSchema::builder()
            .overwrite("quality", ValueType::Number)
            .build()
            .expect("valid schema")
            .state([("quality", 0.5)])
            .expect("state");

        let conformed = schema.conform(&partial).expect("conform");
        assert_eq!(conformed.len(), 3);
        assert_eq!(conformed.get("quality"), Some(&json!(0.5)));
        assert_eq!(conformed.get("messages"), Some(&json!([])));
    }
}
