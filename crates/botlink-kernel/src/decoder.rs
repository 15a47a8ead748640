//! Typed-value decoder: turns tagged wire objects into domain arguments.
//!
//! Clients cannot send a `Distance` or a `Light` over JSON, so they wrap
//! such values as `{"__type": "<tag>", "value": ...}`. [`decode_typed`] is
//! the strict form and reports a [`DecodeError`]; [`decode`] is the lenient
//! form the dispatcher uses, which keeps the original JSON as
//! [`Arg::Raw`] whenever strict decoding fails.

use botlink_types::wire::{LEGACY_TYPE_TAG_KEY, TYPE_TAG_KEY, is_truthy};
use botlink_types::{
    AnimTrigger, Angle, Color, Distance, Light, NoteDuration, NoteType, SongNote, Speed,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// A decoded call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Untagged or undecodable value, passed through as-is.
    Raw(Value),
    Distance(Distance),
    Speed(Speed),
    Angle(Angle),
    Note(SongNote),
    Anim(AnimTrigger),
    Light(Light),
    List(Vec<Arg>),
}

impl Arg {
    /// Borrow the raw JSON, if this argument was not decoded.
    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            Arg::Raw(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Raw(_) => "raw value",
            Arg::Distance(_) => "distance",
            Arg::Speed(_) => "speed",
            Arg::Angle(_) => "angle",
            Arg::Note(_) => "song note",
            Arg::Anim(_) => "animation trigger",
            Arg::Light(_) => "light",
            Arg::List(_) => "list",
        }
    }
}

/// Wire tags understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedTag {
    DistanceMm,
    SpeedMmps,
    Degrees,
    SongNote,
    Anim,
    Light,
}

impl TypedTag {
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "distance_mm" => Some(Self::DistanceMm),
            "speed_mmps" => Some(Self::SpeedMmps),
            "degrees" | "degree" | "angle" => Some(Self::Degrees),
            "songnote" => Some(Self::SongNote),
            "anim" => Some(Self::Anim),
            "light" => Some(Self::Light),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DistanceMm => "distance_mm",
            Self::SpeedMmps => "speed_mmps",
            Self::Degrees => "degrees",
            Self::SongNote => "songnote",
            Self::Anim => "anim",
            Self::Light => "light",
        }
    }
}

/// Why a tagged value could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unknown type tag `{0}`")]
    UnknownTag(String),

    #[error("`{tag}` value is missing {field}")]
    MissingField { tag: &'static str, field: &'static str },

    #[error("`{tag}` expects a number, got {found}")]
    NotANumber { tag: &'static str, found: String },

    #[error("unknown {kind} `{name}`")]
    UnknownConstant { kind: &'static str, name: String },

    #[error("invalid light: {0}")]
    InvalidLight(String),
}

/// The type tag carried by `obj`, preferring `__type` over the legacy key.
pub fn type_tag(obj: &Map<String, Value>) -> Option<&str> {
    [TYPE_TAG_KEY, LEGACY_TYPE_TAG_KEY]
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
}

/// Lenient decode: never fails, degrades to [`Arg::Raw`].
pub fn decode(value: &Value) -> Arg {
    match value {
        Value::Array(items) => Arg::List(items.iter().map(decode).collect()),
        Value::Object(obj) => match type_tag(obj) {
            Some(tag) => decode_typed(tag, value.get("value").unwrap_or(&Value::Null))
                .unwrap_or_else(|e| {
                    debug!(tag, error = %e, "typed value kept raw");
                    Arg::Raw(value.clone())
                }),
            None => Arg::Raw(value.clone()),
        },
        _ => Arg::Raw(value.clone()),
    }
}

/// Strict decode of the payload `value` of a value tagged `tag`.
pub fn decode_typed(tag: &str, value: &Value) -> Result<Arg, DecodeError> {
    let tag = TypedTag::from_wire(tag).ok_or_else(|| DecodeError::UnknownTag(tag.to_string()))?;
    // List payloads carry the argument in their first element.
    let first = match value {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    };

    match tag {
        TypedTag::DistanceMm => Ok(Arg::Distance(Distance::mm(number(tag, first)?))),
        TypedTag::SpeedMmps => Ok(Arg::Speed(Speed::mmps(number(tag, first)?))),
        TypedTag::Degrees => Ok(Arg::Angle(Angle::degrees(number(tag, first)?))),
        TypedTag::SongNote => decode_note(first).map(Arg::Note),
        TypedTag::Anim => {
            let name = first
                .and_then(Value::as_str)
                .ok_or(DecodeError::MissingField { tag: "anim", field: "trigger name" })?;
            AnimTrigger::from_name(name)
                .map(Arg::Anim)
                .ok_or_else(|| DecodeError::UnknownConstant {
                    kind: "animation trigger",
                    name: name.to_string(),
                })
        }
        TypedTag::Light => match value {
            Value::Object(spec) => decode_light_spec(spec).map(Arg::Light),
            Value::Array(_) => Ok(Arg::Light(Light::steady(rgb(value)?))),
            _ => Err(DecodeError::InvalidLight("expected an RGB list or light object".into())),
        },
    }
}

fn number(tag: TypedTag, v: Option<&Value>) -> Result<f64, DecodeError> {
    let v = v.ok_or(DecodeError::MissingField { tag: tag.as_str(), field: "value" })?;
    as_f64(v).ok_or_else(|| DecodeError::NotANumber {
        tag: tag.as_str(),
        found: v.to_string(),
    })
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_note(v: Option<&Value>) -> Result<SongNote, DecodeError> {
    let obj = v
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingField { tag: "songnote", field: "note object" })?;
    let field = |key: &'static str| {
        obj.get(key)
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField { tag: "songnote", field: key })
    };

    let type_name = field("noteType")?;
    let duration_name = field("noteDuration")?;
    Ok(SongNote {
        note_type: NoteType::from_name(type_name).ok_or_else(|| DecodeError::UnknownConstant {
            kind: "note type",
            name: type_name.to_string(),
        })?,
        duration: NoteDuration::from_name(duration_name).ok_or_else(|| {
            DecodeError::UnknownConstant {
                kind: "note duration",
                name: duration_name.to_string(),
            }
        })?,
    })
}

/// Parse a `[r, g, b, ..]` list; channels are masked to a byte.
fn rgb(v: &Value) -> Result<Color, DecodeError> {
    let items = v
        .as_array()
        .filter(|items| items.len() >= 3)
        .ok_or_else(|| DecodeError::InvalidLight(format!("{v} is not an RGB triple")))?;
    let mut channels = [0u8; 3];
    for (slot, item) in channels.iter_mut().zip(items) {
        let n = as_f64(item)
            .ok_or_else(|| DecodeError::InvalidLight(format!("channel {item} is not a number")))?;
        *slot = ((n as i64) & 0xFF) as u8;
    }
    Ok(Color::rgb(channels[0], channels[1], channels[2]))
}

/// First truthy value among `keys`.
fn first_set<'a>(spec: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| spec.get(*k)).find(|v| is_truthy(v))
}

fn period(spec: &Map<String, Value>, keys: &[&str]) -> u32 {
    first_set(spec, keys)
        .and_then(as_f64)
        .map(|n| n.max(0.0) as u32)
        .unwrap_or(0)
}

fn decode_light_spec(spec: &Map<String, Value>) -> Result<Light, DecodeError> {
    let on = first_set(spec, &["on", "on_color", "on_rgb", "value"])
        .ok_or_else(|| DecodeError::InvalidLight("no on colour".into()))
        .and_then(rgb)?;
    let off = match first_set(spec, &["off", "off_color", "off_rgb"]) {
        Some(v) => rgb(v).unwrap_or(on),
        None => on,
    };

    let on_period_ms = period(spec, &["on_period_ms", "on_ms"]);
    let off_period_ms = period(spec, &["off_period_ms", "off_ms"]);
    let base = Light {
        on_color: on,
        off_color: off,
        on_period_ms,
        off_period_ms,
        transition_on_period_ms: period(spec, &["transition_on_period_ms", "transition_on_ms"]),
        transition_off_period_ms: period(spec, &["transition_off_period_ms", "transition_off_ms"]),
    };

    let pattern = spec
        .get("pattern")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match pattern.as_str() {
        "flash" => base.flash(on_period_ms, off_period_ms),
        "off" => Light::OFF,
        _ => base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untagged_values_pass_through() {
        assert_eq!(decode(&json!(5)), Arg::Raw(json!(5)));
        assert_eq!(decode(&json!({"speed": 3})), Arg::Raw(json!({"speed": 3})));
        assert_eq!(decode(&json!("hi")), Arg::Raw(json!("hi")));
    }

    #[test]
    fn distance_from_scalar_or_list() {
        let d = decode(&json!({"__type": "distance_mm", "value": 150}));
        assert_eq!(d, Arg::Distance(Distance::mm(150.0)));
        let d = decode(&json!({"__type": "distance_mm", "value": ["42.5"]}));
        assert_eq!(d, Arg::Distance(Distance::mm(42.5)));
    }

    #[test]
    fn legacy_tag_key_is_accepted() {
        let s = decode(&json!({"__cozmo_type": "speed_mmps", "value": 50}));
        assert_eq!(s, Arg::Speed(Speed::mmps(50.0)));
    }

    #[test]
    fn angle_aliases() {
        for tag in ["degrees", "degree", "angle"] {
            let a = decode(&json!({"__type": tag, "value": 90}));
            assert_eq!(a, Arg::Angle(Angle::degrees(90.0)));
        }
    }

    #[test]
    fn sequences_decode_elementwise() {
        let v = json!([{"__type": "degrees", "value": 10}, 3, {"__type": "bogus", "value": 1}]);
        match decode(&v) {
            Arg::List(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0], Arg::Angle(Angle::degrees(10.0)));
                assert_eq!(items[1], Arg::Raw(json!(3)));
                assert_eq!(items[2], Arg::Raw(json!({"__type": "bogus", "value": 1})));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn song_note_lookup() {
        let v = json!({"noteType": "C2_Sharp", "noteDuration": "Half"});
        let n = decode_typed("songnote", &v).unwrap();
        assert_eq!(
            n,
            Arg::Note(SongNote { note_type: NoteType::C2Sharp, duration: NoteDuration::Half })
        );
        let bad = json!({"noteType": "Z9", "noteDuration": "Half"});
        assert!(matches!(
            decode_typed("songnote", &bad),
            Err(DecodeError::UnknownConstant { kind: "note type", .. })
        ));
    }

    #[test]
    fn anim_trigger_lookup() {
        assert_eq!(
            decode_typed("anim", &json!("MajorWin")).unwrap(),
            Arg::Anim(AnimTrigger::from_name("MajorWin").unwrap())
        );
        let raw = json!({"__type": "anim", "value": "NotAnAnim"});
        assert_eq!(decode(&raw), Arg::Raw(raw.clone()));
    }

    #[test]
    fn light_from_rgb_list_masks_channels() {
        let l = decode(&json!({"__type": "light", "value": [256, 128, 0]}));
        assert_eq!(l, Arg::Light(Light::steady(Color::rgb(0, 128, 0))));
    }

    #[test]
    fn light_from_plain_rgb_list_is_steady() {
        let Arg::Light(light) = decode(&json!({"__type": "light", "value": [255, 0, 0]})) else {
            panic!("expected light");
        };
        assert_eq!(light.on_color, Color::rgb(255, 0, 0));
        assert_eq!(light.off_color, Color::rgb(255, 0, 0));
    }

    #[test]
    fn legacy_tagged_light_decodes_strictly() {
        let wire = json!({"__cozmo_type": "light", "value": [0, 255, 0]});
        let obj = wire.as_object().unwrap();
        let tag = type_tag(obj).unwrap();
        assert_eq!(tag, "light");
        assert_eq!(
            decode_typed(tag, &obj["value"]).unwrap(),
            Arg::Light(Light::steady(Color::rgb(0, 255, 0)))
        );
    }

    #[test]
    fn scalar_light_is_rejected() {
        assert!(matches!(decode_typed("light", &json!(7)), Err(DecodeError::InvalidLight(_))));
        assert!(matches!(decode_typed("light", &Value::Null), Err(DecodeError::InvalidLight(_))));
    }

    #[test]
    fn light_from_object_with_aliases() {
        let v = json!({
            "on_rgb": [255, 0, 0],
            "off_color": [0, 0, 255],
            "on_ms": 200,
            "off_period_ms": 300,
            "transition_on_ms": 10
        });
        let Arg::Light(light) = decode_typed("light", &v).unwrap() else {
            panic!("expected light");
        };
        assert_eq!(light.on_color, Color::rgb(255, 0, 0));
        assert_eq!(light.off_color, Color::rgb(0, 0, 255));
        assert_eq!(light.on_period_ms, 200);
        assert_eq!(light.off_period_ms, 300);
        assert_eq!(light.transition_on_period_ms, 10);
        assert_eq!(light.transition_off_period_ms, 0);
    }

    #[test]
    fn light_off_defaults_to_on() {
        let Arg::Light(light) = decode_typed("light", &json!({"on": [1, 2, 3]})).unwrap() else {
            panic!("expected light");
        };
        assert_eq!(light.off_color, Color::rgb(1, 2, 3));
    }

    #[test]
    fn light_patterns() {
        let flash = json!({"on": [0, 255, 0], "on_ms": 100, "off_ms": 100, "pattern": "FLASH"});
        let Arg::Light(light) = decode_typed("light", &flash).unwrap() else {
            panic!("expected light");
        };
        assert_eq!(light.off_color, Color::OFF);
        assert_eq!(light.on_period_ms, 100);

        let off = json!({"on": [0, 255, 0], "pattern": "off"});
        assert_eq!(decode_typed("light", &off).unwrap(), Arg::Light(Light::OFF));
    }

    #[test]
    fn malformed_light_degrades_to_raw() {
        let raw = json!({"__type": "light", "value": [1, 2]});
        assert_eq!(decode(&raw), Arg::Raw(raw.clone()));
        assert!(matches!(
            decode_typed("light", &json!([1, 2])),
            Err(DecodeError::InvalidLight(_))
        ));
    }

    #[test]
    fn strict_decoder_reports_bad_numbers() {
        assert!(matches!(
            decode_typed("distance_mm", &json!("far")),
            Err(DecodeError::NotANumber { tag: "distance_mm", .. })
        ));
        assert!(matches!(
            decode_typed("distance_mm", &Value::Null),
            Err(DecodeError::MissingField { .. })
        ));
        assert_eq!(decode_typed("nope", &json!(1)), Err(DecodeError::UnknownTag("nope".into())));
    }
}
