//! Musical note conversion
//!
//! Maps a frequency onto the equal-tempered scale (A4 = 440 Hz), reporting
//! the two neighbouring notes with frequency, percentage and cent offsets,
//! plus the acoustic wave for the frequency. Only frequencies inside
//! [`MIN_FREQUENCY`, `MAX_FREQUENCY`] are accepted.

use std::fmt;

use crate::error::RangeError;

pub const MIN_FREQUENCY: f64 = 20.0;
pub const MAX_FREQUENCY: f64 = 4190.0;

/// Speed of sound in air (m/s).
pub const SPEED_OF_SOUND: f64 = 343.0;

const STANDARD_FREQUENCY: f64 = 440.0;
const STANDARD_OCTAVE: i32 = 4;
/// Semitones from C up to A.
const A_OFFSET_FROM_C: i32 = 9;

pub fn is_valid_frequency(frequency: f64) -> bool {
    frequency > 0.0 && (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&frequency)
}

pub fn validate_frequency(frequency: f64) -> Result<(), RangeError> {
    if is_valid_frequency(frequency) {
        Ok(())
    } else {
        Err(RangeError::InvalidFrequency(frequency))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Letter {
    A,
    ASharp,
    B,
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
}

impl Letter {
    /// Letters ordered from A, matching note index 0 = A4.
    pub const ALL: [Letter; 12] = [
        Letter::A,
        Letter::ASharp,
        Letter::B,
        Letter::C,
        Letter::CSharp,
        Letter::D,
        Letter::DSharp,
        Letter::E,
        Letter::F,
        Letter::FSharp,
        Letter::G,
        Letter::GSharp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Letter::A => "A",
            Letter::ASharp => "A#",
            Letter::B => "B",
            Letter::C => "C",
            Letter::CSharp => "C#",
            Letter::D => "D",
            Letter::DSharp => "D#",
            Letter::E => "E",
            Letter::F => "F",
            Letter::FSharp => "F#",
            Letter::G => "G",
            Letter::GSharp => "G#",
        }
    }

    fn position(self) -> i32 {
        Letter::ALL.iter().position(|&l| l == self).unwrap_or(0) as i32
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn raw_index(frequency: f64) -> f64 {
    12.0 * (frequency / STANDARD_FREQUENCY).log2()
}

/// Note indices reachable from the valid frequency range, widened so both
/// neighbours of every valid frequency exist.
pub fn index_bounds() -> (i32, i32) {
    (
        raw_index(MIN_FREQUENCY).floor() as i32,
        raw_index(MAX_FREQUENCY).ceil() as i32,
    )
}

pub fn octave_bounds() -> (i32, i32) {
    let (minimum, maximum) = index_bounds();
    (octave_for_index(minimum), octave_for_index(maximum))
}

pub fn is_valid_index(index: i32) -> bool {
    let (minimum, maximum) = index_bounds();
    (minimum..=maximum).contains(&index)
}

pub fn is_valid_octave(octave: i32) -> bool {
    let (minimum, maximum) = octave_bounds();
    (minimum..=maximum).contains(&octave)
}

fn octave_for_index(index: i32) -> i32 {
    STANDARD_OCTAVE + (index + A_OFFSET_FROM_C).div_euclid(12)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub index: i32,
    pub letter: Letter,
    pub octave: i32,
    pub frequency: f64,
}

impl Note {
    pub fn from_index(index: i32) -> Result<Self, RangeError> {
        if !is_valid_index(index) {
            return Err(RangeError::InvalidIndex(index));
        }

        Ok(Self {
            index,
            letter: Letter::ALL[index.rem_euclid(12) as usize],
            octave: octave_for_index(index),
            frequency: STANDARD_FREQUENCY * 2f64.powf(index as f64 / 12.0),
        })
    }

    /// The nearest equal-tempered note.
    pub fn from_frequency(frequency: f64) -> Result<Self, RangeError> {
        validate_frequency(frequency)?;
        Self::from_index(raw_index(frequency).round() as i32)
    }

    pub fn from_letter(letter: Letter, octave: i32) -> Result<Self, RangeError> {
        if !is_valid_octave(octave) {
            return Err(RangeError::InvalidOctave(octave));
        }
        let semitones_from_c = (letter.position() + A_OFFSET_FROM_C).rem_euclid(12);
        let index = (octave - STANDARD_OCTAVE) * 12 + semitones_from_c - A_OFFSET_FROM_C;
        Self::from_index(index)
    }

    /// One semitone lower.
    pub fn lower(&self) -> Result<Self, RangeError> {
        Self::from_index(self.index - 1)
    }

    /// One semitone higher.
    pub fn higher(&self) -> Result<Self, RangeError> {
        Self::from_index(self.index + 1)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter, self.octave)
    }
}

/// Distance from a frequency to one neighbouring note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub note: Note,
    pub frequency: f64,
    pub percentage: f64,
    pub cents: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offsets {
    pub lower: Offset,
    pub higher: Offset,
}

impl Offsets {
    pub fn for_frequency(frequency: f64) -> Result<Self, RangeError> {
        let nearest = Note::from_frequency(frequency)?;
        let (lower, higher) = if nearest.frequency <= frequency {
            (nearest, nearest.higher()?)
        } else {
            (nearest.lower()?, nearest)
        };

        let span = higher.frequency - lower.frequency;
        let offset = |note: Note| {
            let difference = frequency - note.frequency;
            Offset {
                note,
                frequency: difference,
                percentage: difference * 100.0 / span,
                cents: 1200.0 * (frequency / note.frequency).log2(),
            }
        };

        Ok(Self {
            lower: offset(lower),
            higher: offset(higher),
        })
    }

    pub fn closest(&self) -> &Offset {
        if self.lower.frequency.abs() < self.higher.frequency.abs() {
            &self.lower
        } else {
            &self.higher
        }
    }
}

pub fn wavelength_bounds() -> (f64, f64) {
    (
        SPEED_OF_SOUND / MAX_FREQUENCY,
        SPEED_OF_SOUND / MIN_FREQUENCY,
    )
}

pub fn period_bounds() -> (f64, f64) {
    let (minimum, maximum) = wavelength_bounds();
    (minimum / SPEED_OF_SOUND, maximum / SPEED_OF_SOUND)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcousticWave {
    pub frequency: f64,
    pub wavelength: f64,
    pub period: f64,
}

impl AcousticWave {
    pub fn from_frequency(frequency: f64) -> Result<Self, RangeError> {
        validate_frequency(frequency)?;
        let wavelength = SPEED_OF_SOUND / frequency;
        Ok(Self {
            frequency,
            wavelength,
            period: wavelength / SPEED_OF_SOUND,
        })
    }

    pub fn from_wavelength(wavelength: f64) -> Result<Self, RangeError> {
        let (minimum, maximum) = wavelength_bounds();
        if !(wavelength > 0.0 && (minimum..=maximum).contains(&wavelength)) {
            return Err(RangeError::InvalidWavelength(wavelength));
        }
        Ok(Self {
            frequency: SPEED_OF_SOUND / wavelength,
            wavelength,
            period: wavelength / SPEED_OF_SOUND,
        })
    }

    pub fn from_period(period: f64) -> Result<Self, RangeError> {
        let (minimum, maximum) = period_bounds();
        if !(period > 0.0 && (minimum..=maximum).contains(&period)) {
            return Err(RangeError::InvalidPeriod(period));
        }
        let wavelength = period * SPEED_OF_SOUND;
        Ok(Self {
            frequency: SPEED_OF_SOUND / wavelength,
            wavelength,
            period,
        })
    }

    /// Up to 16 harmonics, stopping at the first one outside the valid range.
    pub fn harmonics(&self) -> Vec<Pitch> {
        (1..=16)
            .map(|n| Pitch::new(n as f64 * self.frequency))
            .take_while(|pitch| pitch.is_ok())
            .filter_map(|pitch| pitch.ok())
            .collect()
    }
}

/// A validated frequency mapped onto the scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pitch {
    pub frequency: f64,
    pub wave: AcousticWave,
    pub offsets: Offsets,
}

impl Pitch {
    pub fn new(frequency: f64) -> Result<Self, RangeError> {
        validate_frequency(frequency)?;
        Ok(Self {
            frequency,
            wave: AcousticWave::from_frequency(frequency)?,
            offsets: Offsets::for_frequency(frequency)?,
        })
    }

    pub fn note(&self) -> Note {
        self.offsets.closest().note
    }

    pub fn closest_offset(&self) -> &Offset {
        self.offsets.closest()
    }
}

/// Turns an estimated frequency into a [`Pitch`].
///
/// Runs on the engine's worker thread, after the frequency has been checked
/// against the supported range.
pub trait PitchMapper: Send {
    fn map(&self, frequency: f64) -> Result<Pitch, RangeError>;
}

/// Twelve-tone equal temperament around A4 = 440 Hz.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualTemperament;

impl PitchMapper for EqualTemperament {
    fn map(&self, frequency: f64) -> Result<Pitch, RangeError> {
        Pitch::new(frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_note_mapping() {
        let test_cases = [
            (440.0, "A4"),
            (493.88, "B4"),
            (523.25, "C5"),
            (392.0, "G4"),
            (220.0, "A3"),
            (880.0, "A5"),
        ];

        for (freq, expected) in test_cases.iter() {
            let pitch = Pitch::new(*freq).unwrap();
            let offset = pitch.closest_offset();

            assert_eq!(pitch.note().to_string(), *expected);
            assert!(
                offset.cents.abs() < 10.0,
                "Frequency {} Hz should be close to perfect pitch, got {} cents off",
                freq,
                offset.cents
            );
        }
    }

    #[test]
    fn test_frequency_validation() {
        assert!(!is_valid_frequency(5_000.0));
        assert!(!is_valid_frequency(10.0));
        assert!(!is_valid_frequency(0.0));
        assert!(is_valid_frequency(440.0));
        assert!(validate_frequency(f64::NAN).is_err());
    }

    #[test]
    fn test_note_calculations() {
        let notes = [
            (0, Letter::A, 4, 440.0),
            (12, Letter::A, 5, 880.000),
            (2, Letter::B, 4, 493.883),
            (-10, Letter::B, 3, 246.942),
            (-9, Letter::C, 4, 261.626),
            (-30, Letter::DSharp, 2, 77.7817),
            (11, Letter::GSharp, 5, 830.609),
            (29, Letter::D, 7, 2349.32),
        ];

        for &(index, letter, octave, frequency) in notes.iter() {
            let note = Note::from_index(index).unwrap();
            assert!(close(note.frequency, frequency, 0.01), "{:?}", note);
            assert_eq!(note.letter, letter);
            assert_eq!(note.octave, octave);
            assert_eq!(Note::from_frequency(frequency).unwrap().index, index);
            assert_eq!(Note::from_letter(letter, octave).unwrap().index, index);
        }
    }

    #[test]
    fn test_bounds() {
        assert_eq!(index_bounds(), (-54, 40));
        assert_eq!(octave_bounds(), (0, 8));

        assert!(!is_valid_index(1_000));
        assert!(!is_valid_index(-100));
        assert!(is_valid_index(6));

        assert!(!is_valid_octave(10));
        assert!(!is_valid_octave(-1));
        assert!(is_valid_octave(2));

        // Both edges of the range still have two neighbours.
        assert!(Pitch::new(MIN_FREQUENCY).is_ok());
        assert!(Pitch::new(MAX_FREQUENCY).is_ok());
    }

    #[test]
    fn test_offsets() {
        let result = Offsets::for_frequency(445.0).unwrap();
        assert_eq!(result.lower.note.index, 0);
        assert!(close(result.lower.frequency, 5.0, 0.01));
        assert!(close(result.lower.percentage, 19.1, 0.1));
        assert!(close(result.lower.cents, 19.56, 0.1));
        assert_eq!(result.higher.note.index, 1);
        assert!(close(result.higher.frequency, -21.164, 0.01));
        assert!(close(result.higher.percentage, -80.9, 0.1));
        assert!(close(result.higher.cents, -80.4338, 0.1));
        assert_eq!(result.closest().note.to_string(), "A4");

        let result = Offsets::for_frequency(108.0).unwrap();
        assert_eq!(result.lower.note.index, -25);
        assert!(close(result.lower.frequency, 4.174, 0.01));
        assert!(close(result.lower.percentage, 67.6, 0.1));
        assert!(close(result.lower.cents, 68.2333, 0.1));
        assert_eq!(result.higher.note.index, -24);
        assert!(close(result.higher.frequency, -2.0, 0.01));
        assert!(close(result.higher.percentage, -32.39, 0.1));
        assert!(close(result.higher.cents, -31.76, 0.1));
        assert_eq!(result.closest().note.to_string(), "A2");
    }

    #[test]
    fn test_acoustic_wave() {
        let waves = [(440.0, 0.7795, 0.00227259), (1000.0, 0.343, 0.001)];

        for &(frequency, wavelength, period) in waves.iter() {
            let wave = AcousticWave::from_frequency(frequency).unwrap();
            assert!(close(wave.wavelength, wavelength, 0.0001));
            assert!(close(wave.period, period, 0.0001));

            let wave = AcousticWave::from_wavelength(wavelength).unwrap();
            assert!(close(wave.frequency, frequency, 0.1));

            let wave = AcousticWave::from_period(period).unwrap();
            assert!(close(wave.frequency, frequency, 0.1));
        }

        assert!(AcousticWave::from_wavelength(100.0).is_err());
        assert!(AcousticWave::from_period(0.0).is_err());
    }

    #[test]
    fn test_harmonics() {
        let wave = AcousticWave::from_frequency(440.0).unwrap();
        // 440 * 9 = 3960 is the last harmonic below 4190 Hz.
        assert_eq!(wave.harmonics().len(), 9);

        let wave = AcousticWave::from_frequency(100.0).unwrap();
        assert_eq!(wave.harmonics().len(), 16);
    }

    #[test]
    fn test_equal_temperament_rejects_out_of_range() {
        let mapper = EqualTemperament;
        assert!(mapper.map(440.0).is_ok());
        assert_eq!(mapper.map(5.0), Err(RangeError::InvalidFrequency(5.0)));
    }
}
