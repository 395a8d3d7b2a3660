//! Linear gain ramps
//!
//! A [`GainRamp`] moves one voice's gain toward a target at a constant rate,
//! one update tick at a time. The ramp holds only the voice's [`AudioId`];
//! the gain is applied through a [`GainTarget`], which reports whether the
//! voice still exists.

use crate::audio::AudioId;
use tracing::trace;

/// Something that can apply gain to voices by id
pub trait GainTarget {
    /// Apply `gain`; `false` if the voice no longer exists
    fn set_gain(&mut self, id: AudioId, gain: f32) -> bool;

    /// Current gain, `None` if the voice no longer exists
    fn gain(&self, id: AudioId) -> Option<f32>;
}

/// Linear gain interpolation toward a target value
#[derive(Debug, Clone, PartialEq)]
pub struct GainRamp {
    id: AudioId,
    /// Gain change per second (always >= 0)
    rate: f32,
    initial: f32,
    current: f32,
    target: f32,
}

impl GainRamp {
    /// Create a ramp and immediately apply `initial` to the voice.
    pub fn new(
        id: AudioId,
        rate: f32,
        initial: f32,
        target: f32,
        gains: &mut dyn GainTarget,
    ) -> Self {
        gains.set_gain(id, initial);
        Self {
            id,
            rate: rate.abs(),
            initial,
            current: initial,
            target,
        }
    }

    /// Create a ramp from `initial` to `target` that takes `seconds`.
    pub fn over(
        id: AudioId,
        seconds: f32,
        initial: f32,
        target: f32,
        gains: &mut dyn GainTarget,
    ) -> Self {
        let mut ramp = Self::new(id, 0.0, initial, target, gains);
        ramp.set_duration(seconds);
        ramp
    }

    pub fn audio_id(&self) -> AudioId {
        self.id
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Advance by `dt` seconds and apply the new gain.
    ///
    /// Returns `true` once the target has been reached or the voice is gone.
    pub fn update(&mut self, dt: f32, gains: &mut dyn GainTarget) -> bool {
        let step = self.rate * dt.max(0.0);
        let reached = if !step.is_finite() {
            self.current = self.target;
            true
        } else if self.target > self.initial {
            self.current += step;
            self.current >= self.target
        } else {
            self.current -= step;
            self.current <= self.target
        };
        if reached {
            self.current = self.target;
        }

        let alive = gains.set_gain(self.id, self.current);
        if !alive {
            trace!("Gain ramp for {} ended: voice gone", self.id);
        }
        !alive || reached
    }

    /// Point the ramp at a new target, starting from the voice's current gain.
    ///
    /// The rate is kept; call [`GainRamp::set_duration`] to re-time it.
    pub fn retarget(&mut self, target: f32, gains: &dyn GainTarget) {
        self.initial = gains.gain(self.id).unwrap_or(self.current);
        self.current = self.initial;
        self.target = target;
    }

    /// Re-time the ramp so that initial → target takes `seconds`.
    pub fn set_duration(&mut self, seconds: f32) {
        self.rate = if seconds > 0.0 {
            (self.target - self.initial).abs() / seconds
        } else {
            f32::INFINITY
        };
    }
}
