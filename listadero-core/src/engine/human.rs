use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::BehaviorSection;

use super::driver::{KeyInput, PagePoint};

#[derive(Debug, Clone)]
pub struct TimedPoint {
    pub point: PagePoint,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct PointerPath {
    pub points: Vec<TimedPoint>,
}

#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub key: KeyInput,
    pub delay: Duration,
}

/// Pure generator of human-shaped pointer paths and keystroke timing
/// streams. Holds no page state and performs no I/O; the state machine
/// replays its plans against the driver.
#[derive(Debug)]
pub struct InputSynthesizer {
    config: BehaviorSection,
    rng: ChaCha8Rng,
}

impl InputSynthesizer {
    pub fn new(config: BehaviorSection) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Deterministic variant for reproducible runs.
    pub fn seeded(config: BehaviorSection, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Maximum distance any synthesized point may sit from the straight
    /// line between the two endpoints.
    pub fn deviation_bound(&self, distance: f64) -> f64 {
        (distance * self.config.max_deviation_ratio).min(self.config.max_deviation_px)
    }

    /// Timed points along a cubic curve from `from` to `to`. Control points
    /// are displaced perpendicular to the chord only, so progress along the
    /// chord stays monotone and the path never doubles back.
    pub fn pointer_path(&mut self, from: PagePoint, to: PagePoint) -> PointerPath {
        let distance = from.distance_to(to);
        if distance < 1.0 {
            return PointerPath {
                points: vec![TimedPoint {
                    point: to,
                    delay: Duration::from_millis(self.rng.gen_range(8..24)),
                }],
            };
        }

        let bound = self.deviation_bound(distance);
        let (dx, dy) = (to.x - from.x, to.y - from.y);
        let (px, py) = (-dy / distance, dx / distance);
        // Worst-case curve offset is 3t(1-t) * max control displacement,
        // i.e. 0.75 of it; 0.7 here leaves headroom for point jitter.
        let c1 = self.rng.gen_range(-0.7..0.7) * bound;
        let c2 = self.rng.gen_range(-0.7..0.7) * bound;
        let jitter_cap = bound * 0.1;

        let speed = {
            let [lo, hi] = self.config.pointer_speed_px_s;
            self.rng.gen_range(lo..=hi) as f64 * self.config.profile.speed_factor()
        };
        let duration_secs = (distance / speed).max(0.08);
        let steps = ((duration_secs * 60.0).clamp(12.0, 48.0)) as usize;
        let mean_delay = duration_secs / steps as f64;

        let mut points = Vec::with_capacity(steps);
        for idx in 1..=steps {
            let t = ease_in_out_cubic(idx as f64 / steps as f64);
            let along = t;
            let offset = 3.0 * (1.0 - t) * (1.0 - t) * t * c1 + 3.0 * (1.0 - t) * t * t * c2;
            let jitter = if idx == steps {
                0.0
            } else {
                self.rng.gen_range(-jitter_cap..=jitter_cap)
            };
            let point = PagePoint::new(
                from.x + dx * along + px * (offset + jitter),
                from.y + dy * along + py * (offset + jitter),
            );
            let delay_secs = self.truncated_normal(
                mean_delay,
                mean_delay * 0.35 * self.config.profile.spread_factor(),
                mean_delay * 0.3,
                mean_delay * 2.5,
            );
            points.push(TimedPoint {
                point,
                delay: Duration::from_secs_f64(delay_secs),
            });
        }
        PointerPath { points }
    }

    /// Per-character keystroke stream with lognormal inter-key delays and
    /// occasional adjacent-key slips corrected by backspace-and-retype.
    pub fn keystrokes(&mut self, text: &str) -> Vec<KeyEvent> {
        let cadence = {
            let [lo, hi] = self.config.typing_cadence_cpm;
            self.rng.gen_range(lo.max(1)..=hi.max(2)) as f64 * self.config.profile.speed_factor()
        };
        let mean_delay_ms = (60_000.0 / cadence.max(30.0)).max(20.0);
        let sigma = self.config.typing_sigma * self.config.profile.spread_factor();

        let mut events = Vec::with_capacity(text.chars().count());
        for ch in text.chars() {
            if self.rng.gen_bool(self.config.typo_probability.clamp(0.0, 1.0)) {
                if let Some(slip) = self.adjacent_key(ch) {
                    events.push(KeyEvent {
                        key: KeyInput::Char(slip),
                        delay: self.lognormal_ms(mean_delay_ms, sigma),
                    });
                    let [lo, hi] = self.config.typo_pause_ms;
                    events.push(KeyEvent {
                        key: KeyInput::Backspace,
                        delay: Duration::from_millis(self.rng.gen_range(lo as u64..=hi as u64)),
                    });
                }
            }
            events.push(KeyEvent {
                key: KeyInput::Char(ch),
                delay: self.lognormal_ms(mean_delay_ms, sigma),
            });
        }
        events
    }

    pub fn hesitation(&mut self) -> Duration {
        let [lo, hi] = self.config.click_hesitation_ms;
        Duration::from_millis(self.rng.gen_range(lo as u64..=hi as u64))
    }

    pub fn idle(&mut self) -> Duration {
        let [lo, hi] = self.config.idle_duration_ms;
        Duration::from_millis(self.rng.gen_range(lo as u64..=hi as u64))
    }

    fn adjacent_key(&mut self, ch: char) -> Option<char> {
        const ROWS: [&str; 4] = ["1234567890", "qwertyuiop", "asdfghjkl", "zxcvbnm"];
        let lower = ch.to_ascii_lowercase();
        for row in ROWS {
            if let Some(pos) = row.find(lower) {
                let chars: Vec<char> = row.chars().collect();
                let mut neighbors = Vec::new();
                if pos > 0 {
                    neighbors.push(chars[pos - 1]);
                }
                if pos + 1 < chars.len() {
                    neighbors.push(chars[pos + 1]);
                }
                let pick = neighbors[self.rng.gen_range(0..neighbors.len())];
                return Some(if ch.is_ascii_uppercase() {
                    pick.to_ascii_uppercase()
                } else {
                    pick
                });
            }
        }
        None
    }

    fn lognormal_ms(&mut self, mean_ms: f64, sigma: f64) -> Duration {
        let mu = mean_ms.ln() - sigma * sigma / 2.0;
        let sample = (mu + sigma * self.standard_normal()).exp();
        Duration::from_secs_f64(sample.clamp(15.0, 1_800.0) / 1000.0)
    }

    fn truncated_normal(&mut self, mean: f64, sigma: f64, lo: f64, hi: f64) -> f64 {
        for _ in 0..16 {
            let sample = mean + sigma * self.standard_normal();
            if sample >= lo && sample <= hi {
                return sample;
            }
        }
        mean
    }

    /// Box-Muller transform; two uniforms in, one standard normal out.
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviorProfile;

    fn synthesizer(seed: u64) -> InputSynthesizer {
        InputSynthesizer::seeded(BehaviorSection::default(), seed)
    }

    fn deviation_from_chord(from: PagePoint, to: PagePoint, point: PagePoint) -> f64 {
        let (dx, dy) = (to.x - from.x, to.y - from.y);
        let length = (dx * dx + dy * dy).sqrt();
        ((point.x - from.x) * dy - (point.y - from.y) * dx).abs() / length
    }

    #[test]
    fn paths_stay_inside_the_deviation_envelope() {
        let pairs = [
            (PagePoint::new(0.0, 0.0), PagePoint::new(800.0, 300.0)),
            (PagePoint::new(640.0, 480.0), PagePoint::new(12.0, 700.0)),
            (PagePoint::new(10.0, 10.0), PagePoint::new(30.0, 14.0)),
            (PagePoint::new(500.0, 0.0), PagePoint::new(500.0, 900.0)),
        ];
        for seed in 0..20u64 {
            let mut synth = synthesizer(seed);
            for (from, to) in pairs {
                let bound = synth.deviation_bound(from.distance_to(to));
                let path = synth.pointer_path(from, to);
                for timed in &path.points {
                    let dev = deviation_from_chord(from, to, timed.point);
                    assert!(
                        dev <= bound + 1e-6,
                        "seed {seed}: deviation {dev} exceeds bound {bound}"
                    );
                }
            }
        }
    }

    #[test]
    fn paths_never_double_back_along_the_chord() {
        let from = PagePoint::new(50.0, 50.0);
        let to = PagePoint::new(900.0, 400.0);
        let (dx, dy) = (to.x - from.x, to.y - from.y);
        let mut synth = synthesizer(7);
        let path = synth.pointer_path(from, to);
        let mut last_progress = f64::MIN;
        for timed in &path.points {
            let progress = (timed.point.x - from.x) * dx + (timed.point.y - from.y) * dy;
            assert!(progress >= last_progress);
            last_progress = progress;
        }
        // path terminates exactly on target
        let last = path.points.last().unwrap();
        assert!((last.point.x - to.x).abs() < 1e-9);
        assert!((last.point.y - to.y).abs() < 1e-9);
    }

    #[test]
    fn fixed_seed_reproduces_paths_and_delays() {
        let from = PagePoint::new(0.0, 0.0);
        let to = PagePoint::new(400.0, 250.0);
        let first = {
            let mut synth = synthesizer(42);
            let path = synth.pointer_path(from, to);
            let keys = synth.keystrokes("Casa Moderna");
            (path, keys)
        };
        let second = {
            let mut synth = synthesizer(42);
            let path = synth.pointer_path(from, to);
            let keys = synth.keystrokes("Casa Moderna");
            (path, keys)
        };
        assert_eq!(first.0.points.len(), second.0.points.len());
        for (a, b) in first.0.points.iter().zip(second.0.points.iter()) {
            assert_eq!(a.point, b.point);
            assert_eq!(a.delay, b.delay);
        }
        assert_eq!(first.1.len(), second.1.len());
        for (a, b) in first.1.iter().zip(second.1.iter()) {
            assert_eq!(a.key, b.key);
            assert_eq!(a.delay, b.delay);
        }
    }

    #[test]
    fn typo_injection_corrects_itself() {
        let mut config = BehaviorSection {
            typo_probability: 1.0,
            ..BehaviorSection::default()
        };
        config.profile = BehaviorProfile::Fast;
        let mut synth = InputSynthesizer::seeded(config, 3);
        let events = synth.keystrokes("casa");
        // every character gets slip + backspace + correction
        assert_eq!(events.len(), 12);
        let mut value = String::new();
        for event in &events {
            match event.key {
                KeyInput::Char(c) => value.push(c),
                KeyInput::Backspace => {
                    value.pop();
                }
            }
        }
        assert_eq!(value, "casa");
    }

    #[test]
    fn zero_typo_probability_is_clean() {
        let config = BehaviorSection {
            typo_probability: 0.0,
            ..BehaviorSection::default()
        };
        let mut synth = InputSynthesizer::seeded(config, 9);
        let events = synth.keystrokes("3 recámaras");
        assert!(events.iter().all(|e| matches!(e.key, KeyInput::Char(_))));
        assert_eq!(events.len(), "3 recámaras".chars().count());
    }
}
