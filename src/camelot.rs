//! Camelot wheel key notation.
//!
//! The Camelot wheel arranges the 24 musical keys on a circle of twelve
//! positions. Same number with different letter = relative major/minor pair;
//! adjacent numbers = a perfect fifth apart. DJs mix between keys that are
//! close on the wheel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The twelve pitch classes, C-based indexing (C=0 ... B=11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Db,
    D,
    Eb,
    E,
    F,
    Fs,
    G,
    Ab,
    A,
    Bb,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        Self::C,
        Self::Db,
        Self::D,
        Self::Eb,
        Self::E,
        Self::F,
        Self::Fs,
        Self::G,
        Self::Ab,
        Self::A,
        Self::Bb,
        Self::B,
    ];

    /// Chromagram index (C=0 ... B=11).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMode {
    Major,
    Minor,
}

/// Camelot wheel letter: A = minor (outer ring), B = major (inner ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Letter {
    A,
    B,
}

/// Camelot wheel codes for major keys, indexed by pitch class (C=0 ... B=11).
const CAMELOT_MAJOR: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];

/// Camelot wheel codes for minor keys, indexed by pitch class.
const CAMELOT_MINOR: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

/// Musical key names for major keys, indexed by pitch class.
const MAJOR_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// Musical key names for minor keys.
const MINOR_NAMES: [&str; 12] = [
    "Cm", "C#m", "Dm", "Ebm", "Em", "Fm", "F#m", "Gm", "G#m", "Am", "Bbm", "Bm",
];

/// A key expressed in Camelot notation, e.g. `8A` (A minor) or `8B` (C major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CamelotKey {
    pub number: u8,
    pub letter: Letter,
}

impl CamelotKey {
    /// Map a (root, mode) pair to its Camelot code via the fixed 24-entry table.
    pub fn from_key(root: PitchClass, mode: KeyMode) -> Self {
        let number = match mode {
            KeyMode::Major => CAMELOT_MAJOR[root.index()],
            KeyMode::Minor => CAMELOT_MINOR[root.index()],
        };
        let letter = match mode {
            KeyMode::Major => Letter::B,
            KeyMode::Minor => Letter::A,
        };
        Self { number, letter }
    }

    /// Inverse mapping: Camelot code back to (root, mode).
    pub fn to_key(self) -> (PitchClass, KeyMode) {
        let (table, mode) = match self.letter {
            Letter::B => (&CAMELOT_MAJOR, KeyMode::Major),
            Letter::A => (&CAMELOT_MINOR, KeyMode::Minor),
        };
        let index = table
            .iter()
            .position(|&n| n == self.number)
            .unwrap_or(0);
        (PitchClass::from_index(index), mode)
    }

    /// Minimal circular distance between two wheel numbers (0..=6).
    pub fn wheel_distance(self, other: CamelotKey) -> u8 {
        let a = i16::from(self.number);
        let b = i16::from(other.number);
        let diff = (a - b).rem_euclid(12);
        diff.min(12 - diff) as u8
    }

    /// True when the two codes are the same number with different letters,
    /// i.e. a relative major/minor pair.
    pub fn is_relative_of(self, other: CamelotKey) -> bool {
        self.number == other.number && self.letter != other.letter
    }

    /// Standard musical-notation name ("Am", "C", "F#m"). Used by the XML export.
    pub fn musical_name(self) -> &'static str {
        let (root, mode) = self.to_key();
        match mode {
            KeyMode::Major => MAJOR_NAMES[root.index()],
            KeyMode::Minor => MINOR_NAMES[root.index()],
        }
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.letter {
            Letter::A => 'A',
            Letter::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid Camelot code: {0}")]
pub struct ParseCamelotError(String);

impl FromStr for CamelotKey {
    type Err = ParseCamelotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(ParseCamelotError(s.to_string()));
        }
        let (num_part, letter_part) = s.split_at(s.len() - 1);
        let number: u8 = num_part
            .parse()
            .map_err(|_| ParseCamelotError(s.to_string()))?;
        if !(1..=12).contains(&number) {
            return Err(ParseCamelotError(s.to_string()));
        }
        let letter = match letter_part {
            "A" | "a" => Letter::A,
            "B" | "b" => Letter::B,
            _ => return Err(ParseCamelotError(s.to_string())),
        };
        Ok(Self { number, letter })
    }
}
