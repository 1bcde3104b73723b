//! Typo injection and correction.
//!
//! The simulator decides where a wrong key is pressed and how the mistake is
//! noticed and fixed. The planner turns each injection into a typo group: the
//! wrong key, a few more correct keys, a hesitation, a backspace run and the
//! retyped characters.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TypingError};
use crate::keyboard::{has_qwerty_neighbors, qwerty_adjacent_char, random_letter_other_than};
use crate::timing::{is_symbol_heavy_line, CharContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypoProfile {
    #[default]
    Off,
    Subtle,
    Natural,
    Messy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Substitution {
    /// A key physically next to the intended one.
    AdjacentKey,
    /// Any other letter.
    RandomLetter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypoParams {
    pub probability: f64,
    pub substitution: Substitution,
    /// Correct characters typed after the mistake before it is noticed.
    pub awareness_min_chars: u32,
    pub awareness_max_chars: u32,
    pub hesitation_min_ms: f64,
    pub hesitation_max_ms: f64,
    pub double_hesitation_probability: f64,
    pub backspace_min_ms: f64,
    pub backspace_max_ms: f64,
    /// 0 disables mid-run pauses.
    pub backspace_pause_every_n: u32,
    pub backspace_pause_min_ms: f64,
    pub backspace_pause_max_ms: f64,
    pub cooldown_min_chars: u32,
    pub cooldown_max_chars: u32,
    pub cooldown_pause_min_ms: f64,
    pub cooldown_pause_max_ms: f64,
}

impl TypoParams {
    pub fn subtle() -> Self {
        Self {
            probability: 0.006,
            substitution: Substitution::AdjacentKey,
            awareness_min_chars: 0,
            awareness_max_chars: 1,
            hesitation_min_ms: 120.0,
            hesitation_max_ms: 260.0,
            double_hesitation_probability: 0.1,
            backspace_min_ms: 35.0,
            backspace_max_ms: 70.0,
            backspace_pause_every_n: 0,
            backspace_pause_min_ms: 0.0,
            backspace_pause_max_ms: 0.0,
            cooldown_min_chars: 25,
            cooldown_max_chars: 60,
            cooldown_pause_min_ms: 40.0,
            cooldown_pause_max_ms: 120.0,
        }
    }

    pub fn natural() -> Self {
        Self {
            probability: 0.015,
            substitution: Substitution::AdjacentKey,
            awareness_min_chars: 0,
            awareness_max_chars: 3,
            hesitation_min_ms: 180.0,
            hesitation_max_ms: 450.0,
            double_hesitation_probability: 0.2,
            backspace_min_ms: 40.0,
            backspace_max_ms: 95.0,
            backspace_pause_every_n: 4,
            backspace_pause_min_ms: 60.0,
            backspace_pause_max_ms: 180.0,
            cooldown_min_chars: 15,
            cooldown_max_chars: 40,
            cooldown_pause_min_ms: 60.0,
            cooldown_pause_max_ms: 200.0,
        }
    }

    pub fn messy() -> Self {
        Self {
            probability: 0.04,
            substitution: Substitution::RandomLetter,
            awareness_min_chars: 1,
            awareness_max_chars: 5,
            hesitation_min_ms: 250.0,
            hesitation_max_ms: 700.0,
            double_hesitation_probability: 0.35,
            backspace_min_ms: 45.0,
            backspace_max_ms: 130.0,
            backspace_pause_every_n: 3,
            backspace_pause_min_ms: 80.0,
            backspace_pause_max_ms: 260.0,
            cooldown_min_chars: 6,
            cooldown_max_chars: 20,
            cooldown_pause_min_ms: 80.0,
            cooldown_pause_max_ms: 300.0,
        }
    }

    fn validate(&self) -> Result<()> {
        let probabilities = [
            ("probability", self.probability),
            ("double_hesitation_probability", self.double_hesitation_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(TypingError::invalid_job(format!(
                    "typo {name} must be between 0.0 and 1.0"
                )));
            }
        }

        let ranges = [
            (
                "awareness chars",
                self.awareness_min_chars as f64,
                self.awareness_max_chars as f64,
            ),
            ("hesitation", self.hesitation_min_ms, self.hesitation_max_ms),
            ("backspace", self.backspace_min_ms, self.backspace_max_ms),
            (
                "backspace pause",
                self.backspace_pause_min_ms,
                self.backspace_pause_max_ms,
            ),
            (
                "cooldown chars",
                self.cooldown_min_chars as f64,
                self.cooldown_max_chars as f64,
            ),
            (
                "cooldown pause",
                self.cooldown_pause_min_ms,
                self.cooldown_pause_max_ms,
            ),
        ];
        for (name, min, max) in ranges {
            if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
                return Err(TypingError::invalid_job(format!(
                    "typo {name}: min must be >= 0 and <= max"
                )));
            }
        }

        Ok(())
    }
}

impl TypoProfile {
    /// `None` for `Off`.
    pub fn params(self) -> Option<TypoParams> {
        match self {
            TypoProfile::Off => None,
            TypoProfile::Subtle => Some(TypoParams::subtle()),
            TypoProfile::Natural => Some(TypoParams::natural()),
            TypoProfile::Messy => Some(TypoParams::messy()),
        }
    }
}

/// Half-open range of char indices into the job text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypoConfig {
    pub profile: TypoProfile,
    /// Keep mistakes away from code-like regions.
    pub safe_mode: bool,
    /// Replaces the profile's injection probability.
    pub probability: Option<f64>,
    /// Never injected into, whatever `safe_mode` says.
    pub unsafe_spans: Vec<CharSpan>,
}

impl Default for TypoConfig {
    fn default() -> Self {
        Self {
            profile: TypoProfile::Off,
            safe_mode: true,
            probability: None,
            unsafe_spans: Vec::new(),
        }
    }
}

impl TypoConfig {
    pub fn with_profile(profile: TypoProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    /// Effective parameters with the probability override applied.
    pub fn params(&self) -> Option<TypoParams> {
        let mut params = self.profile.params()?;
        if let Some(p) = self.probability {
            params.probability = p;
        }
        Some(params)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self.probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(TypingError::invalid_job(
                    "typo probability must be between 0.0 and 1.0",
                ));
            }
        }
        match self.params() {
            Some(params) => params.validate(),
            None => Ok(()),
        }
    }
}

/// Marks every char of `chars` that must never become an injection point.
///
/// The scan is lexical: quote tracking restarts on each line and does not know
/// about comments or raw strings.
pub fn risky_chars(chars: &[char], safe_mode: bool, unsafe_spans: &[CharSpan]) -> Vec<bool> {
    let mut risky = vec![false; chars.len()];

    for (idx, flag) in risky.iter_mut().enumerate() {
        if unsafe_spans.iter().any(|span| span.contains(idx)) {
            *flag = true;
        }
    }

    if !safe_mode {
        return risky;
    }

    let mut line_start = 0;
    for line in chars.split(|c| *c == '\n') {
        let has_backslash = line.contains(&'\\');
        let indent = line.iter().take_while(|c| **c == ' ' || **c == '\t').count();

        let mut quote: Option<char> = None;
        let mut escaped = false;

        for (col, &c) in line.iter().enumerate() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '\'' || c == '"' {
                match quote {
                    None => quote = Some(c),
                    Some(open) if open == c => quote = None,
                    Some(_) => {}
                }
            }

            if !c.is_alphabetic() || has_backslash || quote.is_some() || col < indent {
                risky[line_start + col] = true;
            }
        }

        // the newline itself
        if let Some(flag) = risky.get_mut(line_start + line.len()) {
            *flag = true;
        }
        line_start += line.len() + 1;
    }

    risky
}

/// A wrong key about to be pressed in place of `intended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injection {
    pub index: usize,
    pub intended: char,
    pub wrong: char,
    /// Further correct characters typed before the mistake is noticed.
    pub awareness: usize,
}

/// Delays of the correction part of a typo group, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// Wait between the last mistyped key and the first backspace.
    pub hesitation_ms: u64,
    /// Wait before each backspace after the first, mid-run pauses included.
    pub backspace_gaps_ms: Vec<u64>,
    /// Wait before the first retyped character.
    pub retype_lead_ms: u64,
    /// Extra wait after the group is retyped.
    pub cooldown_pause_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TypoSimulator {
    params: Option<TypoParams>,
    risky: Vec<bool>,
    cooldown_remaining: u32,
}

impl TypoSimulator {
    pub fn new(config: &TypoConfig, chars: &[char]) -> Self {
        let params = config.params().filter(|p| p.probability > 0.0);
        let risky = match params {
            Some(_) => risky_chars(chars, config.safe_mode, &config.unsafe_spans),
            None => Vec::new(),
        };
        Self {
            params,
            risky,
            cooldown_remaining: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.params.is_some()
    }

    pub fn is_candidate(&self, index: usize, c: char) -> bool {
        let Some(params) = &self.params else {
            return false;
        };
        if self.risky.get(index).copied().unwrap_or(true) {
            return false;
        }
        match params.substitution {
            Substitution::AdjacentKey => has_qwerty_neighbors(c),
            Substitution::RandomLetter => c.is_ascii_alphabetic(),
        }
    }

    /// Records one character typed without an injection.
    pub fn note_clean_char(&mut self) {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
    }

    /// Decides whether the character at `ctx` is mistyped.
    ///
    /// Draws nothing from `rng` while cooling down or for non-candidates.
    pub fn maybe_inject(&mut self, ctx: &CharContext<'_>, rng: &mut impl Rng) -> Option<Injection> {
        if self.cooldown_remaining > 0 || !self.is_candidate(ctx.global_index, ctx.c) {
            return None;
        }
        let params = self.params.as_ref()?;
        if !rng.gen_bool(params.probability) {
            return None;
        }

        let wrong = match params.substitution {
            Substitution::AdjacentKey => qwerty_adjacent_char(ctx.c, rng)?,
            Substitution::RandomLetter => random_letter_other_than(ctx.c, rng)?,
        };

        // awareness never crosses the end of the line
        let room = ctx.line.len().saturating_sub(ctx.col_index + 1);
        let drawn = rng.gen_range(params.awareness_min_chars..=params.awareness_max_chars) as usize;
        let awareness = drawn.min(room);

        debug!(
            index = ctx.global_index,
            intended = %ctx.c,
            wrong = %wrong,
            awareness,
            "injected typo"
        );

        Some(Injection {
            index: ctx.global_index,
            intended: ctx.c,
            wrong,
            awareness,
        })
    }

    /// Draws the correction delays for `injection` and starts the cooldown.
    pub fn correction(
        &mut self,
        injection: &Injection,
        line: &[char],
        rng: &mut impl Rng,
    ) -> Correction {
        let Some(params) = self.params.clone() else {
            return Correction {
                hesitation_ms: 0,
                backspace_gaps_ms: Vec::new(),
                retype_lead_ms: 0,
                cooldown_pause_ms: 0,
            };
        };

        let to_erase = injection.awareness + 1;

        let mut bonus = 0.0;
        if to_erase >= 8 {
            bonus += rng.gen_range(40.0..=180.0);
        }
        if is_symbol_heavy_line(line) {
            bonus += rng.gen_range(35.0..=160.0);
        }
        let low = params.hesitation_min_ms + bonus * 0.35;
        let high = (params.hesitation_max_ms + bonus).max(low);
        let mut hesitation = rng.gen_range(low..=high);

        if rng.gen_bool(params.double_hesitation_probability) {
            let second = rng.gen_range(50.0..=240.0);
            debug!(ms = second, "second hesitation");
            hesitation += second;
        }

        let first_backspace = backspace_delay(&params, rng);
        let mut backspace_gaps_ms = Vec::with_capacity(to_erase.saturating_sub(1));
        for done in 1..to_erase {
            let mut gap = backspace_delay(&params, rng);
            if should_pause_after(&params, done, to_erase) {
                gap += rng.gen_range(params.backspace_pause_min_ms..=params.backspace_pause_max_ms);
            }
            backspace_gaps_ms.push(gap.round() as u64);
        }
        let retype_lead = backspace_delay(&params, rng);

        let cooldown_pause =
            rng.gen_range(params.cooldown_pause_min_ms..=params.cooldown_pause_max_ms);
        self.cooldown_remaining =
            rng.gen_range(params.cooldown_min_chars..=params.cooldown_max_chars);

        debug!(
            index = injection.index,
            erased = to_erase,
            cooldown_chars = self.cooldown_remaining,
            "corrected typo"
        );

        Correction {
            hesitation_ms: (hesitation + first_backspace).round() as u64,
            backspace_gaps_ms,
            retype_lead_ms: retype_lead.round() as u64,
            cooldown_pause_ms: cooldown_pause.round() as u64,
        }
    }
}

fn backspace_delay(params: &TypoParams, rng: &mut impl Rng) -> f64 {
    let min = params.backspace_min_ms.max(1.0);
    let max = params.backspace_max_ms.max(min);
    let mut delay = rng.gen_range(min..=max);
    if rng.gen_bool(0.23) {
        delay = (delay * rng.gen_range(0.75..=1.2)).clamp(min, max);
    }
    delay
}

fn should_pause_after(params: &TypoParams, done: usize, total: usize) -> bool {
    let every = params.backspace_pause_every_n as usize;
    every > 0 && total > every && done < total && done % every == 0
}
