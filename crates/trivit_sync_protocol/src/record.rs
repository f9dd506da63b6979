//! Wire projection of a counter.

use crate::counter::{Counter, CounterId, Timestamp, MAX_COUNT};
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields;
use crate::messages::MessageKind;
use trivit_codec::Value;

/// A counter as it travels between replicas.
///
/// The tombstone is never part of the record. `sort_order` is always
/// present in full-sync entries and absent from single updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    /// Counter ID.
    pub id: CounterId,
    /// Display title.
    pub title: String,
    /// Current tally, at most [`MAX_COUNT`].
    pub count: u64,
    /// Palette index.
    pub color_index: u32,
    /// Collapsed UI flag.
    pub is_collapsed: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Manual ordering position, if carried.
    pub sort_order: Option<i64>,
}

impl CounterRecord {
    /// Record for a single update. Omits `sortOrder`.
    pub fn update_of(counter: &Counter) -> Self {
        Self {
            sort_order: None,
            ..Self::from(counter)
        }
    }

    /// Builds a counter from this record with the given sort order.
    pub fn into_counter(self, sort_order: i64) -> Counter {
        Counter {
            id: self.id,
            title: self.title,
            count: self.count,
            color_index: self.color_index,
            is_collapsed: self.is_collapsed,
            created_at: self.created_at,
            sort_order,
            deleted_at: None,
        }
    }

    /// Overwrites the mutable fields of `counter` (title, count, color,
    /// collapsed). ID, creation time, sort order and tombstone are untouched.
    pub fn apply_to(&self, counter: &mut Counter) {
        counter.title.clone_from(&self.title);
        counter.count = self.count;
        counter.color_index = self.color_index;
        counter.is_collapsed = self.is_collapsed;
    }

    /// Lowers the record to a payload map.
    pub fn to_value(&self) -> Value {
        let mut pairs = vec![
            (fields::ID, Value::Text(self.id.to_string())),
            (fields::TITLE, Value::Text(self.title.clone())),
            (
                fields::COUNT,
                Value::Integer(i64::try_from(self.count.min(MAX_COUNT)).unwrap_or(i64::MAX)),
            ),
            (fields::COLOR_INDEX, Value::from(self.color_index)),
            (fields::IS_COLLAPSED, Value::Bool(self.is_collapsed)),
            (fields::CREATED_AT, Value::Integer(self.created_at.as_millis())),
        ];
        if let Some(sort_order) = self.sort_order {
            pairs.push((fields::SORT_ORDER, Value::Integer(sort_order)));
        }
        Value::text_map(pairs)
    }

    /// Parses a record out of a payload map.
    ///
    /// `require_sort_order` is set for full-sync entries.
    pub fn from_value(
        value: &Value,
        kind: MessageKind,
        require_sort_order: bool,
    ) -> ProtocolResult<Self> {
        let reader = FieldReader::new(value, kind)?;

        let sort_order = if require_sort_order {
            Some(reader.integer(fields::SORT_ORDER)?)
        } else {
            reader.optional_integer(fields::SORT_ORDER)?
        };

        Ok(Self {
            id: reader.id(fields::ID)?,
            title: reader.text(fields::TITLE)?.to_string(),
            count: reader.non_negative(fields::COUNT)?,
            color_index: reader.color_index(fields::COLOR_INDEX)?,
            is_collapsed: reader.bool(fields::IS_COLLAPSED)?,
            created_at: Timestamp::from_millis(reader.integer(fields::CREATED_AT)?),
            sort_order,
        })
    }
}

impl From<&Counter> for CounterRecord {
    fn from(counter: &Counter) -> Self {
        Self {
            id: counter.id,
            title: counter.title.clone(),
            count: counter.count.min(MAX_COUNT),
            color_index: counter.color_index,
            is_collapsed: counter.is_collapsed,
            created_at: counter.created_at,
            sort_order: Some(counter.sort_order),
        }
    }
}

/// Typed field access over a payload map, reporting errors against the
/// declared message kind.
pub(crate) struct FieldReader<'a> {
    map: &'a Value,
    kind: MessageKind,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(map: &'a Value, kind: MessageKind) -> ProtocolResult<Self> {
        if map.as_map().is_none() {
            return Err(ProtocolError::InvalidField {
                kind,
                field: fields::DATA,
                reason: format!("expected map, found {}", map.type_name()),
            });
        }
        Ok(Self { map, kind })
    }

    fn get(&self, field: &'static str) -> ProtocolResult<&'a Value> {
        match self.map.get(field) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(ProtocolError::MissingField {
                kind: self.kind,
                field,
            }),
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::InvalidField {
            kind: self.kind,
            field,
            reason: reason.into(),
        }
    }

    fn expected(&self, field: &'static str, wanted: &str, found: &Value) -> ProtocolError {
        self.invalid(field, format!("expected {wanted}, found {}", found.type_name()))
    }

    pub(crate) fn text(&self, field: &'static str) -> ProtocolResult<&'a str> {
        let value = self.get(field)?;
        value
            .as_text()
            .ok_or_else(|| self.expected(field, "text", value))
    }

    pub(crate) fn integer(&self, field: &'static str) -> ProtocolResult<i64> {
        let value = self.get(field)?;
        value
            .as_integer()
            .ok_or_else(|| self.expected(field, "integer", value))
    }

    pub(crate) fn optional_integer(&self, field: &'static str) -> ProtocolResult<Option<i64>> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_integer()
                .map(Some)
                .ok_or_else(|| self.expected(field, "integer", value)),
        }
    }

    pub(crate) fn bool(&self, field: &'static str) -> ProtocolResult<bool> {
        let value = self.get(field)?;
        value
            .as_bool()
            .ok_or_else(|| self.expected(field, "bool", value))
    }

    pub(crate) fn non_negative(&self, field: &'static str) -> ProtocolResult<u64> {
        let n = self.integer(field)?;
        u64::try_from(n).map_err(|_| self.invalid(field, format!("{n} is negative")))
    }

    pub(crate) fn color_index(&self, field: &'static str) -> ProtocolResult<u32> {
        let n = self.integer(field)?;
        u32::try_from(n).map_err(|_| self.invalid(field, format!("{n} is out of range")))
    }

    pub(crate) fn id(&self, field: &'static str) -> ProtocolResult<CounterId> {
        let text = self.text(field)?;
        text.parse()
            .map_err(|e| self.invalid(field, format!("{text:?} is not a UUID: {e}")))
    }

    pub(crate) fn array(&self, field: &'static str) -> ProtocolResult<&'a [Value]> {
        let value = self.get(field)?;
        value
            .as_array()
            .ok_or_else(|| self.expected(field, "array", value))
    }

    pub(crate) fn value(&self, field: &'static str) -> ProtocolResult<&'a Value> {
        self.get(field)
    }
}
