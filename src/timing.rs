//! Inter-keystroke timing.
//!
//! Fixed mode waits a constant time after every unit. Human-like mode computes a
//! jittered delay before each character and an extra pause after it for
//! punctuation, line ends and burst boundaries. All randomness comes from the
//! caller's RNG so a seeded job replays identically.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TypingError};

const SENTENCE_PUNCTUATION: [char; 4] = [',', '.', ';', ':'];
const CLOSING_BRACKETS: [char; 3] = [')', ']', '}'];
const LONG_WORD_CHARS: usize = 8;
const LONG_WORD_PENALTY_PROBABILITY: f64 = 0.35;
const SYMBOL_HEAVY_RATIO: f64 = 0.28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterShape {
    Uniform,
    /// Normal around zero with sigma = jitter / 2, clamped to +/- jitter.
    Gaussian,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingParams {
    pub base_delay_ms: f64,
    pub jitter_ms: f64,
    pub jitter_shape: JitterShape,
    pub punctuation_pause_multiplier: f64,
    pub newline_pause_multiplier: f64,
    pub burst_min_chars: u32,
    pub burst_max_chars: u32,
    pub burst_pause_min_ms: f64,
    pub burst_pause_max_ms: f64,
    pub long_word_penalty_min: f64,
    pub long_word_penalty_max: f64,
    pub symbol_line_penalty_min: f64,
    pub symbol_line_penalty_max: f64,
    pub code_pause_probability: f64,
    pub code_pause_min_ms: f64,
    pub code_pause_max_ms: f64,
}

impl TimingParams {
    pub fn smooth() -> Self {
        Self {
            base_delay_ms: 35.0,
            jitter_ms: 8.0,
            jitter_shape: JitterShape::Uniform,
            punctuation_pause_multiplier: 1.4,
            newline_pause_multiplier: 1.9,
            burst_min_chars: 14,
            burst_max_chars: 24,
            burst_pause_min_ms: 120.0,
            burst_pause_max_ms: 260.0,
            long_word_penalty_min: 1.2,
            long_word_penalty_max: 1.8,
            symbol_line_penalty_min: 1.25,
            symbol_line_penalty_max: 2.0,
            code_pause_probability: 0.2,
            code_pause_min_ms: 120.0,
            code_pause_max_ms: 350.0,
        }
    }

    pub fn natural() -> Self {
        Self {
            base_delay_ms: 45.0,
            jitter_ms: 18.0,
            jitter_shape: JitterShape::Gaussian,
            punctuation_pause_multiplier: 2.0,
            newline_pause_multiplier: 2.8,
            burst_min_chars: 8,
            burst_max_chars: 20,
            burst_pause_min_ms: 150.0,
            burst_pause_max_ms: 500.0,
            long_word_penalty_min: 1.4,
            long_word_penalty_max: 2.8,
            symbol_line_penalty_min: 1.5,
            symbol_line_penalty_max: 3.0,
            code_pause_probability: 0.35,
            code_pause_min_ms: 200.0,
            code_pause_max_ms: 650.0,
        }
    }

    pub fn slow_deliberate() -> Self {
        Self {
            base_delay_ms: 85.0,
            jitter_ms: 35.0,
            jitter_shape: JitterShape::Gaussian,
            punctuation_pause_multiplier: 2.8,
            newline_pause_multiplier: 4.0,
            burst_min_chars: 6,
            burst_max_chars: 12,
            burst_pause_min_ms: 260.0,
            burst_pause_max_ms: 700.0,
            long_word_penalty_min: 1.5,
            long_word_penalty_max: 2.8,
            symbol_line_penalty_min: 1.5,
            symbol_line_penalty_max: 2.6,
            code_pause_probability: 0.5,
            code_pause_min_ms: 300.0,
            code_pause_max_ms: 900.0,
        }
    }

    fn validate(&self) -> Result<()> {
        let finite = [
            self.base_delay_ms,
            self.jitter_ms,
            self.punctuation_pause_multiplier,
            self.newline_pause_multiplier,
            self.burst_pause_min_ms,
            self.burst_pause_max_ms,
            self.long_word_penalty_min,
            self.long_word_penalty_max,
            self.symbol_line_penalty_min,
            self.symbol_line_penalty_max,
            self.code_pause_probability,
            self.code_pause_min_ms,
            self.code_pause_max_ms,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(TypingError::invalid_job("timing parameters must be finite"));
        }
        if self.base_delay_ms <= 0.0 {
            return Err(TypingError::invalid_job("base_delay_ms must be > 0"));
        }
        if self.jitter_ms < 0.0 {
            return Err(TypingError::invalid_job("jitter_ms must be >= 0"));
        }
        if self.punctuation_pause_multiplier < 1.0 || self.newline_pause_multiplier < 1.0 {
            return Err(TypingError::invalid_job("pause multipliers must be >= 1.0"));
        }
        if self.burst_min_chars == 0 {
            return Err(TypingError::invalid_job("burst_min_chars must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.code_pause_probability) {
            return Err(TypingError::invalid_job(
                "code_pause_probability must be between 0.0 and 1.0",
            ));
        }
        if self.long_word_penalty_min < 1.0 || self.symbol_line_penalty_min < 1.0 {
            return Err(TypingError::invalid_job("hesitation penalties must be >= 1.0"));
        }

        let ranges = [
            ("burst chars", self.burst_min_chars as f64, self.burst_max_chars as f64),
            ("burst pause", self.burst_pause_min_ms, self.burst_pause_max_ms),
            ("long word penalty", self.long_word_penalty_min, self.long_word_penalty_max),
            ("symbol line penalty", self.symbol_line_penalty_min, self.symbol_line_penalty_max),
            ("code pause", self.code_pause_min_ms, self.code_pause_max_ms),
        ];
        for (name, min, max) in ranges {
            if min < 0.0 || min > max {
                return Err(TypingError::invalid_job(format!(
                    "{name}: min must be >= 0 and <= max"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingProfile {
    Smooth,
    #[default]
    Natural,
    SlowDeliberate,
    Custom(TimingParams),
}

impl TimingProfile {
    pub fn params(&self) -> TimingParams {
        match self {
            TimingProfile::Smooth => TimingParams::smooth(),
            TimingProfile::Natural => TimingParams::natural(),
            TimingProfile::SlowDeliberate => TimingParams::slow_deliberate(),
            TimingProfile::Custom(params) => params.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimingProfile::Smooth => "Smooth",
            TimingProfile::Natural => "Natural",
            TimingProfile::SlowDeliberate => "Slow & Deliberate",
            TimingProfile::Custom(_) => "Custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fixed-mode wait after each character.
    pub char_delay_ms: u64,
    /// Fixed-mode wait after each newline or line.
    pub line_delay_ms: u64,
    /// Use the profile-driven model for char-by-char typing.
    pub human_like: bool,
    pub profile: TimingProfile,
    /// Lower bound for human-like delays. Tiny values are allowed but unreliable.
    pub floor_ms: f64,
    pub seed: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            char_delay_ms: 30,
            line_delay_ms: 50,
            human_like: false,
            profile: TimingProfile::default(),
            floor_ms: 1.0,
            seed: None,
        }
    }
}

impl TimingConfig {
    /// Constant delays, no randomness.
    pub fn fixed(char_delay_ms: u64, line_delay_ms: u64) -> Self {
        Self {
            char_delay_ms,
            line_delay_ms,
            ..Default::default()
        }
    }

    pub fn human(profile: TimingProfile, seed: Option<u64>) -> Self {
        Self {
            human_like: true,
            profile,
            seed,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.floor_ms.is_finite() || self.floor_ms < 0.0 {
            return Err(TypingError::invalid_job("floor_ms must be >= 0"));
        }
        if self.human_like {
            self.profile.params().validate()?;
        }
        Ok(())
    }
}

/// Where a character sits in the source text.
#[derive(Debug, Clone, Copy)]
pub struct CharContext<'a> {
    pub c: char,
    /// The line containing `c`, without its newline.
    pub line: &'a [char],
    pub line_index: usize,
    /// Column of `c`; equals `line.len()` for the newline itself.
    pub col_index: usize,
    pub global_index: usize,
    pub prev: Option<char>,
}

/// Waits around one unit, in whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitDelay {
    pub before_ms: u64,
    pub after_ms: u64,
}

#[derive(Debug, Clone)]
enum Mode {
    Fixed { char_ms: u64, line_ms: u64 },
    HumanLike { params: TimingParams, floor_ms: f64 },
}

#[derive(Debug, Clone)]
pub struct TimingModel {
    mode: Mode,
    burst_remaining: u32,
}

impl TimingModel {
    /// Human-like timing only applies to char-by-char typing; line-by-line
    /// always uses the fixed delays.
    pub fn new(config: &TimingConfig, char_by_char: bool) -> Self {
        let mode = if config.human_like && char_by_char {
            Mode::HumanLike {
                params: config.profile.params(),
                floor_ms: config.floor_ms,
            }
        } else {
            Mode::Fixed {
                char_ms: config.char_delay_ms,
                line_ms: config.line_delay_ms,
            }
        };
        Self {
            mode,
            burst_remaining: 0,
        }
    }

    pub fn is_human_like(&self) -> bool {
        matches!(self.mode, Mode::HumanLike { .. })
    }

    /// Delay around a whole line in line-by-line mode.
    pub fn line_delay(&self) -> UnitDelay {
        let after_ms = match &self.mode {
            Mode::Fixed { line_ms, .. } => *line_ms,
            Mode::HumanLike { params, .. } => params.base_delay_ms.round() as u64,
        };
        UnitDelay {
            before_ms: 0,
            after_ms,
        }
    }

    pub fn char_delay(&mut self, ctx: &CharContext<'_>, rng: &mut impl Rng) -> UnitDelay {
        let (params, floor_ms) = match &self.mode {
            Mode::Fixed { char_ms, line_ms } => {
                let after_ms = if ctx.c == '\n' { *line_ms } else { *char_ms };
                return UnitDelay {
                    before_ms: 0,
                    after_ms,
                };
            }
            Mode::HumanLike { params, floor_ms } => (params.clone(), *floor_ms),
        };

        let jittered = (params.base_delay_ms + jitter(&params, rng)).max(1.0);
        let mut before = jittered;
        let mut after = 0.0;

        if ctx.c == '\n' {
            after += jittered * (params.newline_pause_multiplier - 1.0);
            self.burst_remaining = 0;

            if line_looks_like_code_boundary(ctx.line)
                && rng.gen_bool(params.code_pause_probability)
            {
                after += rng.gen_range(params.code_pause_min_ms..=params.code_pause_max_ms);
            }
        } else {
            if SENTENCE_PUNCTUATION.contains(&ctx.c) {
                after += jittered * (params.punctuation_pause_multiplier - 1.0);
            } else if CLOSING_BRACKETS.contains(&ctx.c) {
                let softened = (params.punctuation_pause_multiplier * 0.85).max(1.1);
                after += jittered * (softened - 1.0);
            }

            let (speedup, boundary_pause) = self.burst_component(&params, rng);
            before -= speedup;
            after += boundary_pause;

            if is_word_start(ctx)
                && word_length_from(ctx.line, ctx.col_index) >= LONG_WORD_CHARS
                && rng.gen_bool(LONG_WORD_PENALTY_PROBABILITY)
            {
                before *=
                    rng.gen_range(params.long_word_penalty_min..=params.long_word_penalty_max);
            }

            if ctx.col_index == 0 && is_symbol_heavy_line(ctx.line) {
                before *=
                    rng.gen_range(params.symbol_line_penalty_min..=params.symbol_line_penalty_max);
            }
        }

        UnitDelay {
            before_ms: before.max(floor_ms).round() as u64,
            after_ms: after.max(0.0).round() as u64,
        }
    }

    /// Returns the in-burst speedup and, at a burst boundary, the rest pause.
    fn burst_component(&mut self, params: &TimingParams, rng: &mut impl Rng) -> (f64, f64) {
        if self.burst_remaining == 0 {
            self.burst_remaining = rng.gen_range(params.burst_min_chars..=params.burst_max_chars);
        }

        let speedup = rng.gen_range(0.18..=0.32) * params.base_delay_ms;
        self.burst_remaining -= 1;

        if self.burst_remaining == 0 {
            let pause = rng.gen_range(params.burst_pause_min_ms..=params.burst_pause_max_ms);
            (speedup, pause)
        } else {
            (speedup, 0.0)
        }
    }
}

fn jitter(params: &TimingParams, rng: &mut impl Rng) -> f64 {
    if params.jitter_ms <= 0.0 {
        return 0.0;
    }
    match params.jitter_shape {
        JitterShape::Uniform => rng.gen_range(-params.jitter_ms..=params.jitter_ms),
        JitterShape::Gaussian => {
            let dist = match Normal::new(0.0, params.jitter_ms / 2.0) {
                Ok(dist) => dist,
                Err(_) => return 0.0,
            };
            dist.sample(rng).clamp(-params.jitter_ms, params.jitter_ms)
        }
    }
}

pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_word_start(ctx: &CharContext<'_>) -> bool {
    if !is_word_char(ctx.c) {
        return false;
    }
    if ctx.col_index == 0 {
        return true;
    }
    !ctx.prev.map(is_word_char).unwrap_or(false)
}

fn word_length_from(line: &[char], start: usize) -> usize {
    line.iter()
        .skip(start)
        .take_while(|c| is_word_char(**c))
        .count()
}

fn trimmed(line: &[char]) -> &[char] {
    let start = line.iter().position(|c| !c.is_whitespace());
    let end = line.iter().rposition(|c| !c.is_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &line[s..=e],
        _ => &[],
    }
}

/// True when at least 28% of the line's non-blank characters are symbols.
pub fn is_symbol_heavy_line(line: &[char]) -> bool {
    let stripped = trimmed(line);
    if stripped.is_empty() {
        return false;
    }
    let symbols = stripped
        .iter()
        .filter(|c| !(is_word_char(**c) || c.is_whitespace()))
        .count();
    symbols as f64 / stripped.len() as f64 >= SYMBOL_HEAVY_RATIO
}

/// Block openers and closers in most curly-brace and indentation languages.
pub fn line_looks_like_code_boundary(line: &[char]) -> bool {
    let stripped: String = trimmed(line).iter().collect();
    if stripped.is_empty() {
        return false;
    }

    const STARTS: [&str; 7] = ["def ", "class ", "function ", "fn ", "if ", "for ", "while "];
    const ENDS: [&str; 5] = ["{", "}", ":", ");", "};"];

    STARTS.iter().any(|s| stripped.starts_with(s)) || ENDS.iter().any(|e| stripped.ends_with(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn ctx<'a>(line: &'a [char], col: usize) -> CharContext<'a> {
        CharContext {
            c: line.get(col).copied().unwrap_or('\n'),
            line,
            line_index: 0,
            col_index: col,
            global_index: col,
            prev: col.checked_sub(1).map(|p| line[p]),
        }
    }

    fn delays_for(text: &str, config: &TimingConfig, seed: u64) -> Vec<UnitDelay> {
        let line = chars(text);
        let mut model = TimingModel::new(config, true);
        let mut rng = StdRng::seed_from_u64(seed);
        (0..line.len())
            .map(|col| model.char_delay(&ctx(&line, col), &mut rng))
            .collect()
    }

    #[test]
    fn fixed_mode_waits_after_each_unit() {
        let config = TimingConfig::fixed(0, 40);
        let line = chars("ab");
        let mut model = TimingModel::new(&config, true);
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(
            model.char_delay(&ctx(&line, 0), &mut rng),
            UnitDelay::default()
        );
        assert_eq!(
            model.char_delay(&ctx(&line, 2), &mut rng),
            UnitDelay {
                before_ms: 0,
                after_ms: 40
            }
        );
    }

    #[test]
    fn line_mode_ignores_human_like_profile() {
        let config = TimingConfig {
            line_delay_ms: 75,
            ..TimingConfig::human(TimingProfile::SlowDeliberate, Some(3))
        };
        let model = TimingModel::new(&config, false);
        assert!(!model.is_human_like());
        assert_eq!(model.line_delay().after_ms, 75);
    }

    #[test]
    fn seeded_delays_replay_identically() {
        let config = TimingConfig::human(TimingProfile::Natural, Some(42));
        let text = "The quick brown fox, extraordinarily sleepy. }";
        assert_eq!(delays_for(text, &config, 42), delays_for(text, &config, 42));
        assert_ne!(delays_for(text, &config, 42), delays_for(text, &config, 43));
    }

    #[test]
    fn punctuation_adds_a_pause_after_the_character() {
        let config = TimingConfig::human(
            TimingProfile::Custom(TimingParams {
                burst_min_chars: 100,
                burst_max_chars: 100,
                ..TimingParams::natural()
            }),
            Some(5),
        );
        let delays = delays_for("a.", &config, 5);
        assert_eq!(delays[0].after_ms, 0);
        assert!(delays[1].after_ms > 0);
    }

    #[test]
    fn delays_respect_the_floor() {
        let config = TimingConfig {
            floor_ms: 25.0,
            ..TimingConfig::human(
                TimingProfile::Custom(TimingParams {
                    base_delay_ms: 2.0,
                    jitter_ms: 0.0,
                    ..TimingParams::smooth()
                }),
                Some(8),
            )
        };
        for delay in delays_for("plain words here", &config, 8) {
            assert!(delay.before_ms >= 25);
        }
    }

    #[test]
    fn smooth_jitter_stays_close_to_base() {
        let config = TimingConfig::human(TimingProfile::Smooth, Some(11));
        let delays = delays_for("a a a a a a", &config, 11);
        for d in delays {
            // base 35 +/- 8, minus an 18-32% in-burst speedup
            assert!((15..=37).contains(&d.before_ms), "got {}", d.before_ms);
        }
    }

    #[test]
    fn newline_resets_the_burst_and_pauses() {
        let config = TimingConfig::human(TimingProfile::Natural, Some(2));
        let line = chars("fn main() {");
        let mut model = TimingModel::new(&config, true);
        let mut rng = StdRng::seed_from_u64(2);
        model.char_delay(&ctx(&line, 0), &mut rng);
        assert!(model.burst_remaining > 0);

        let newline = model.char_delay(&ctx(&line, line.len()), &mut rng);
        assert_eq!(model.burst_remaining, 0);
        assert!(newline.after_ms > 0);
    }

    #[test]
    fn invalid_custom_params_are_rejected() {
        let config = TimingConfig::human(
            TimingProfile::Custom(TimingParams {
                burst_min_chars: 10,
                burst_max_chars: 4,
                ..TimingParams::natural()
            }),
            None,
        );
        assert!(matches!(
            config.validate(),
            Err(TypingError::InvalidJob(_))
        ));
    }

    #[test]
    fn line_classifiers() {
        assert!(is_symbol_heavy_line(&chars("  {}();  ")));
        assert!(!is_symbol_heavy_line(&chars("plain prose line")));
        assert!(!is_symbol_heavy_line(&chars("   ")));
        assert!(line_looks_like_code_boundary(&chars("    if x > 1 {")));
        assert!(line_looks_like_code_boundary(&chars("def run(self):")));
        assert!(!line_looks_like_code_boundary(&chars("just text")));
    }
}
