use std::{collections::HashMap, time::Duration};

use stagehand_model::{GoalDescription, TaskDescription, TaskRef};
use stagehand_store::{Delta, Value};
use time::OffsetDateTime;

use crate::{error::RpcError, proto};

pub(crate) type WireDelta = HashMap<String, proto::Value>;

impl From<Value> for proto::Value {
    fn from(value: Value) -> Self {
        use proto::value::Kind;

        let kind = match value {
            Value::String(s) => Kind::Str(s),
            Value::Bool(b) => Kind::Flag(b),
            Value::Int(i) => Kind::Int(i),
            Value::Float(f) => Kind::Float(f),
            Value::Duration(d) => Kind::DurationNanos(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
            Value::Time(t) => {
                let nanos = t.unix_timestamp_nanos();
                Kind::TimeUnixNanos(i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX }))
            }
            Value::List(items) => Kind::List(proto::ValueList {
                items: items.into_iter().map(proto::Value::from).collect(),
            }),
            Value::Map(entries) => Kind::Map(proto::ValueMap {
                entries: entries.into_iter().map(|(k, v)| (k, v.into())).collect(),
            }),
        };
        proto::Value { kind: Some(kind) }
    }
}

impl TryFrom<proto::Value> for Value {
    type Error = RpcError;

    fn try_from(value: proto::Value) -> Result<Self, Self::Error> {
        use proto::value::Kind;

        let kind = value
            .kind
            .ok_or_else(|| RpcError::InvalidMessage("value without kind".into()))?;

        Ok(match kind {
            Kind::Str(s) => Value::String(s),
            Kind::Flag(b) => Value::Bool(b),
            Kind::Int(i) => Value::Int(i),
            Kind::Float(f) => Value::Float(f),
            Kind::DurationNanos(n) => Value::Duration(Duration::from_nanos(n.max(0) as u64)),
            Kind::TimeUnixNanos(n) => Value::Time(
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(n))
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            ),
            Kind::List(list) => Value::List(
                list.items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Kind::Map(map) => Value::Map(
                map.entries
                    .into_iter()
                    .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

pub(crate) fn delta_to_wire(delta: Delta) -> WireDelta {
    delta.into_iter().map(|(k, v)| (k, v.into())).collect()
}

pub(crate) fn delta_from_wire(delta: WireDelta) -> Result<Delta, RpcError> {
    delta
        .into_iter()
        .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
        .collect()
}

impl From<&TaskRef> for proto::TaskRef {
    fn from(r: &TaskRef) -> Self {
        proto::TaskRef {
            name: r.name.clone(),
            instance: r.instance.clone(),
        }
    }
}

impl From<proto::TaskRef> for TaskRef {
    fn from(r: proto::TaskRef) -> Self {
        TaskRef::new(r.name, r.instance)
    }
}

impl From<TaskDescription> for proto::TaskDescription {
    fn from(t: TaskDescription) -> Self {
        proto::TaskDescription {
            plugin: t.plugin,
            name: t.name,
            short: t.short,
            requires: t.requires,
        }
    }
}

impl From<proto::TaskDescription> for TaskDescription {
    fn from(t: proto::TaskDescription) -> Self {
        TaskDescription::new(t.plugin, t.name, t.short, t.requires)
    }
}

impl From<GoalDescription> for proto::GoalDescription {
    fn from(g: GoalDescription) -> Self {
        proto::GoalDescription {
            name: g.name,
            plugin: g.plugin,
            short: g.short,
            aliases: g.aliases,
        }
    }
}

impl From<proto::GoalDescription> for GoalDescription {
    fn from(g: proto::GoalDescription) -> Self {
        GoalDescription::new(g.name, g.short)
            .with_plugin(g.plugin)
            .with_aliases(g.aliases)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::macros::datetime;

    use super::*;

    #[test]
    fn typed_values_keep_their_kind() {
        let mut notes = BTreeMap::new();
        notes.insert("title".to_string(), Value::from("Fixes"));

        let mut delta = Delta::new();
        delta.insert("release.tag".into(), Value::from("v1.2.3"));
        delta.insert("release.draft".into(), Value::Bool(false));
        delta.insert("release.timeout".into(), Value::Duration(Duration::from_millis(1500)));
        delta.insert("release.at".into(), Value::Time(datetime!(2024-03-01 12:00 UTC)));
        delta.insert("release.labels".into(), Value::from(vec!["a".to_string(), "b".to_string()]));
        delta.insert("release.notes".into(), Value::Map(notes));

        let back = delta_from_wire(delta_to_wire(delta.clone())).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn empty_value_is_rejected() {
        let mut wire = WireDelta::new();
        wire.insert("k".into(), proto::Value { kind: None });
        assert!(matches!(delta_from_wire(wire), Err(RpcError::InvalidMessage(_))));
    }
}
