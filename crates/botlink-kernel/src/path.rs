//! Call path parsing: `robot.world.light_cubes[2].set_lights`.

use std::fmt;

use botlink_types::BridgeError;

/// Root every capability path hangs off.
pub const ROOT: &str = "robot";
/// Shorthand root accepted for world paths.
const WORLD_SHORTHAND: &str = "world";

/// One dot-separated path element with an optional `[n]` index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub index: Option<u32>,
}

impl Segment {
    fn parse(raw: &str, path: &str) -> Result<Self, BridgeError> {
        let malformed = |why: &str| BridgeError::Resolution {
            path: path.to_string(),
            details: format!("malformed segment `{raw}`: {why}"),
        };

        let (name, index) = match raw.split_once('[') {
            None => (raw, None),
            Some((name, rest)) => {
                let digits = rest.strip_suffix(']').ok_or_else(|| malformed("missing `]`"))?;
                let index = digits
                    .parse::<u32>()
                    .map_err(|_| malformed("index is not a non-negative integer"))?;
                (name, Some(index))
            }
        };

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed("invalid name"));
        }
        Ok(Self {
            name: name.to_string(),
            index,
        })
    }
}

/// A parsed, root-normalized call path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPath {
    segments: Vec<Segment>,
}

impl CallPath {
    /// Parse `path`. A leading `world.` is rewritten to `robot.world.`.
    pub fn parse(path: &str) -> Result<Self, BridgeError> {
        if path.trim().is_empty() {
            return Err(BridgeError::Resolution {
                path: path.to_string(),
                details: "empty path".to_string(),
            });
        }

        let mut segments = path
            .split('.')
            .map(|raw| Segment::parse(raw, path))
            .collect::<Result<Vec<_>, _>>()?;

        if segments[0].name == WORLD_SHORTHAND {
            segments.insert(
                0,
                Segment {
                    name: ROOT.to_string(),
                    index: None,
                },
            );
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Path with indices blanked, e.g. `robot.world.light_cubes[].set_lights`.
    pub fn pattern(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s.index {
                Some(_) => format!("{}[]", s.name),
                None => s.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Index carried by the last indexed segment.
    pub fn last_index(&self) -> Option<u32> {
        self.segments.iter().rev().find_map(|s| s.index)
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&s.name)?;
            if let Some(idx) = s.index {
                write!(f, "[{idx}]")?;
            }
        }
        Ok(())
    }
}
