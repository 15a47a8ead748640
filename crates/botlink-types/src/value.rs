//! Domain value objects handed to the device.
//!
//! These are the typed forms of the tagged wire values clients send
//! (`{"__type": "distance_mm", "value": 100}` and friends). Named constants
//! (song notes, animation triggers) are looked up by their wire name and
//! return `None` for unknown names.

use serde::{Deserialize, Serialize};

/// A distance in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub mm: f64,
}

impl Distance {
    pub fn mm(mm: f64) -> Self {
        Self { mm }
    }
}

/// A speed in millimetres per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    pub mmps: f64,
}

impl Speed {
    pub fn mmps(mmps: f64) -> Self {
        Self { mmps }
    }
}

/// An angle, stored in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Angle {
    pub degrees: f64,
}

impl Angle {
    pub fn degrees(degrees: f64) -> Self {
        Self { degrees }
    }

    pub fn radians(&self) -> f64 {
        self.degrees.to_radians()
    }
}

// ---------------------------------------------------------------------------
// Song notes
// ---------------------------------------------------------------------------

/// Pitch of a [`SongNote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteType {
    C2,
    C2Sharp,
    D2,
    D2Sharp,
    E2,
    F2,
    F2Sharp,
    G2,
    G2Sharp,
    A2,
    A2Sharp,
    B2,
    C3,
    C3Sharp,
    Rest,
}

const NOTE_TYPES: [(&str, NoteType); 15] = [
    ("C2", NoteType::C2),
    ("C2_Sharp", NoteType::C2Sharp),
    ("D2", NoteType::D2),
    ("D2_Sharp", NoteType::D2Sharp),
    ("E2", NoteType::E2),
    ("F2", NoteType::F2),
    ("F2_Sharp", NoteType::F2Sharp),
    ("G2", NoteType::G2),
    ("G2_Sharp", NoteType::G2Sharp),
    ("A2", NoteType::A2),
    ("A2_Sharp", NoteType::A2Sharp),
    ("B2", NoteType::B2),
    ("C3", NoteType::C3),
    ("C3_Sharp", NoteType::C3Sharp),
    ("Rest", NoteType::Rest),
];

impl NoteType {
    pub fn from_name(name: &str) -> Option<Self> {
        NOTE_TYPES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
    }

    pub fn name(&self) -> &'static str {
        NOTE_TYPES
            .iter()
            .find(|(_, t)| t == self)
            .map(|(n, _)| *n)
            .unwrap_or("Rest")
    }
}

/// Length of a [`SongNote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteDuration {
    Whole,
    ThreeQuarter,
    Half,
    Quarter,
}

impl NoteDuration {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Whole" => Some(Self::Whole),
            "ThreeQuarter" => Some(Self::ThreeQuarter),
            "Half" => Some(Self::Half),
            "Quarter" => Some(Self::Quarter),
            _ => None,
        }
    }

    /// Fraction of a whole note.
    pub fn beats(&self) -> f32 {
        match self {
            Self::Whole => 1.0,
            Self::ThreeQuarter => 0.75,
            Self::Half => 0.5,
            Self::Quarter => 0.25,
        }
    }
}

/// One note of a song played through the device speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongNote {
    pub note_type: NoteType,
    pub duration: NoteDuration,
}

// ---------------------------------------------------------------------------
// Animation triggers
// ---------------------------------------------------------------------------

const ANIM_TRIGGERS: &[&str] = &[
    "CodeLabAmazed",
    "CodeLabBored",
    "CodeLabCelebrate",
    "CodeLabChatty",
    "CodeLabDejected",
    "CodeLabExcited",
    "CodeLabFrustrated",
    "CodeLabHappy",
    "CodeLabLose",
    "CodeLabNo",
    "CodeLabSleep",
    "CodeLabSurprise",
    "CodeLabThinking",
    "CodeLabWin",
    "CodeLabYes",
    "CubePounceLoseSession",
    "FistBumpSuccess",
    "GoToSleepGetIn",
    "Hiccup",
    "MajorFail",
    "MajorWin",
    "PeekABooSurprised",
    "PounceSuccess",
    "ReactToCliff",
];

/// A named animation the device knows how to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AnimTrigger(&'static str);

impl AnimTrigger {
    pub fn from_name(name: &str) -> Option<Self> {
        ANIM_TRIGGERS
            .iter()
            .find(|n| **n == name)
            .map(|n| AnimTrigger(n))
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Lights
// ---------------------------------------------------------------------------

/// An RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }
}

/// A light configuration: alternates between `on_color` and `off_color`
/// with the given periods and transitions (all in milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Light {
    pub on_color: Color,
    pub off_color: Color,
    pub on_period_ms: u32,
    pub off_period_ms: u32,
    pub transition_on_period_ms: u32,
    pub transition_off_period_ms: u32,
}

impl Light {
    /// All channels dark.
    pub const OFF: Light = Light::steady(Color::OFF);

    /// A light that shows `color` constantly.
    pub const fn steady(color: Color) -> Self {
        Self {
            on_color: color,
            off_color: color,
            on_period_ms: 0,
            off_period_ms: 0,
            transition_on_period_ms: 0,
            transition_off_period_ms: 0,
        }
    }

    /// Flashing variant: alternates this light's on colour with darkness.
    pub fn flash(&self, on_period_ms: u32, off_period_ms: u32) -> Self {
        Self {
            on_color: self.on_color,
            off_color: Color::OFF,
            on_period_ms,
            off_period_ms,
            transition_on_period_ms: 0,
            transition_off_period_ms: 0,
        }
    }

    pub fn is_off(&self) -> bool {
        self.on_color.is_off() && self.off_color.is_off()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_lookup_by_wire_name() {
        assert_eq!(NoteType::from_name("C2_Sharp"), Some(NoteType::C2Sharp));
        assert_eq!(NoteType::from_name("H9"), None);
        assert_eq!(NoteType::A2Sharp.name(), "A2_Sharp");
        assert_eq!(NoteDuration::from_name("Half"), Some(NoteDuration::Half));
        assert_eq!(NoteDuration::from_name("Eighth"), None);
    }

    #[test]
    fn anim_trigger_lookup() {
        let t = AnimTrigger::from_name("MajorWin").expect("known trigger");
        assert_eq!(t.name(), "MajorWin");
        assert!(AnimTrigger::from_name("NotAnAnimation").is_none());
    }

    #[test]
    fn flash_keeps_on_color_and_darkens_off_phase() {
        let base = Light::steady(Color::rgb(0, 255, 0));
        let flashing = base.flash(250, 500);
        assert_eq!(flashing.on_color, Color::rgb(0, 255, 0));
        assert_eq!(flashing.off_color, Color::OFF);
        assert_eq!(flashing.on_period_ms, 250);
        assert_eq!(flashing.off_period_ms, 500);
    }

    #[test]
    fn off_light_is_dark() {
        assert!(Light::OFF.is_off());
        assert!(!Light::steady(Color::rgb(1, 0, 0)).is_off());
    }
}
