//! Ambient sound control synchronized to breathing phases.
//!
//! Only the volume envelope lives here; producing audio is up to the host.

use crate::{Error, Result};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Receives phase/progress hints from the host while a session runs
pub trait SoundController {
    fn notify_phase(&mut self, phase: &str, progress: f64);
}

/// A shared controller, so the host keeps a handle while the engine drives it
impl<T: SoundController> SoundController for Rc<RefCell<T>> {
    fn notify_phase(&mut self, phase: &str, progress: f64) {
        self.borrow_mut().notify_phase(phase, progress);
    }
}

/// Available ambient sounds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SoundKind {
    #[default]
    None,
    Rain,
    Ocean,
    Forest,
    PinkNoise,
    BrownNoise,
    WhiteNoise,
}

impl SoundKind {
    pub const ALL: [SoundKind; 7] = [
        SoundKind::None,
        SoundKind::Rain,
        SoundKind::Ocean,
        SoundKind::Forest,
        SoundKind::PinkNoise,
        SoundKind::BrownNoise,
        SoundKind::WhiteNoise,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SoundKind::None => "none",
            SoundKind::Rain => "rain",
            SoundKind::Ocean => "ocean",
            SoundKind::Forest => "forest",
            SoundKind::PinkNoise => "pink-noise",
            SoundKind::BrownNoise => "brown-noise",
            SoundKind::WhiteNoise => "white-noise",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SoundKind::None => "Silent",
            SoundKind::Rain => "Rain",
            SoundKind::Ocean => "Ocean",
            SoundKind::Forest => "Forest",
            SoundKind::PinkNoise => "Pink Noise",
            SoundKind::BrownNoise => "Brown Noise",
            SoundKind::WhiteNoise => "White Noise",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SoundKind::None => "No background sound",
            SoundKind::Rain => "Gentle rainfall ambience",
            SoundKind::Ocean => "Ocean waves and surf",
            SoundKind::Forest => "Forest ambience with gentle rustling",
            SoundKind::PinkNoise => "Balanced frequency noise",
            SoundKind::BrownNoise => "Deep, low-frequency noise",
            SoundKind::WhiteNoise => "Full spectrum noise",
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SoundKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        SoundKind::ALL
            .into_iter()
            .find(|kind| kind.key() == key)
            .ok_or_else(|| Error::Config(format!("Unknown sound: {}", s)))
    }
}

/// Volume multiplier for a phase at the given progress
///
/// Inhale swells from 0.5 to 1.0, exhale fades from 1.0 to 0.7, holds and
/// anything else stay at 1.0.
pub fn phase_volume_multiplier(phase: &str, progress: f64) -> f64 {
    let progress = if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    };

    match phase {
        "inhale" => 0.5 + progress * 0.5,
        "exhale" => 1.0 - progress * 0.3,
        p if p.starts_with("hold") => 1.0,
        _ => 1.0,
    }
}

/// Playback state of the ambient sound
#[derive(Clone, Debug, PartialEq)]
pub struct AmbientSound {
    base_volume: f64,
    volume: f64,
    current: SoundKind,
    playing: bool,
}

impl AmbientSound {
    /// `base_volume` is clamped to 0..=1
    pub fn new(base_volume: f64) -> Self {
        let base_volume = clamp_volume(base_volume);
        Self {
            base_volume,
            volume: base_volume,
            current: SoundKind::None,
            playing: false,
        }
    }

    /// Start a sound; `SoundKind::None` stops playback
    pub fn play(&mut self, kind: SoundKind) {
        if kind == SoundKind::None {
            self.stop();
            return;
        }
        self.current = kind;
        self.playing = true;
        self.volume = self.base_volume;
        tracing::debug!("Playing ambient sound {}", kind);
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.current = SoundKind::None;
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.base_volume = clamp_volume(volume);
        self.volume = self.base_volume;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_sound(&self) -> SoundKind {
        self.current
    }

    pub fn base_volume(&self) -> f64 {
        self.base_volume
    }

    /// Volume currently applied, after phase modulation
    pub fn current_volume(&self) -> f64 {
        self.volume
    }
}

impl Default for AmbientSound {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl SoundController for AmbientSound {
    fn notify_phase(&mut self, phase: &str, progress: f64) {
        if !self.playing {
            return;
        }
        self.volume = self.base_volume * phase_volume_multiplier(phase, progress);
    }
}

fn clamp_volume(volume: f64) -> f64 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_multiplier_envelope() {
        assert!(approx(phase_volume_multiplier("inhale", 0.0), 0.5));
        assert!(approx(phase_volume_multiplier("inhale", 1.0), 1.0));
        assert!(approx(phase_volume_multiplier("exhale", 0.0), 1.0));
        assert!(approx(phase_volume_multiplier("exhale", 1.0), 0.7));
        assert!(approx(phase_volume_multiplier("hold2", 0.4), 1.0));
        assert!(approx(phase_volume_multiplier("power-breath", 0.4), 1.0));
        assert!(approx(phase_volume_multiplier("inhale", 7.0), 1.0));
    }

    #[test]
    fn test_notify_applies_immediately_while_playing() {
        let mut sound = AmbientSound::new(0.4);
        sound.play(SoundKind::Ocean);

        sound.notify_phase("inhale", 0.5);
        assert!(approx(sound.current_volume(), 0.3));

        sound.notify_phase("exhale", 1.0);
        assert!(approx(sound.current_volume(), 0.28));
    }

    #[test]
    fn test_notify_ignored_when_stopped() {
        let mut sound = AmbientSound::new(0.4);
        sound.notify_phase("inhale", 0.0);
        assert!(approx(sound.current_volume(), 0.4));
        assert!(!sound.is_playing());
    }

    #[test]
    fn test_shared_handle_drives_inner_sound() {
        let sound = Rc::new(RefCell::new(AmbientSound::new(1.0)));
        sound.borrow_mut().play(SoundKind::Forest);

        let mut handle = sound.clone();
        handle.notify_phase("inhale", 0.0);

        assert!(approx(sound.borrow().current_volume(), 0.5));
    }

    #[test]
    fn test_play_none_stops() {
        let mut sound = AmbientSound::default();
        sound.play(SoundKind::Rain);
        assert_eq!(sound.current_sound(), SoundKind::Rain);

        sound.play(SoundKind::None);
        assert!(!sound.is_playing());
        assert_eq!(sound.current_sound(), SoundKind::None);
    }

    #[test]
    fn test_volume_clamped() {
        let mut sound = AmbientSound::new(3.0);
        assert_eq!(sound.base_volume(), 1.0);
        sound.set_volume(-1.0);
        assert_eq!(sound.base_volume(), 0.0);
    }

    #[test]
    fn test_sound_kind_parsing() {
        assert_eq!("pink-noise".parse::<SoundKind>().unwrap(), SoundKind::PinkNoise);
        assert_eq!(" Rain ".parse::<SoundKind>().unwrap(), SoundKind::Rain);
        assert!("thunder".parse::<SoundKind>().is_err());
    }
}
