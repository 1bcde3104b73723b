use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model::{ControlKey, PlannedUnit, SubEvent, TimedSubEvent, TypingJob, TypingMode, Unit};
use crate::timing::{CharContext, TimingModel, UnitDelay};
use crate::typo::{Injection, TypoSimulator};

pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Lazily plans a job one unit at a time.
///
/// All timing and typo draws come from one RNG in source order, so two planners
/// built from the same seeded job yield identical units.
pub struct UnitPlanner {
    lines: Vec<Vec<char>>,
    mode: TypingMode,
    timing: TimingModel,
    typos: TypoSimulator,
    rng: StdRng,
    total_chars: usize,
    line_index: usize,
    col: usize,
    chars_done: usize,
}

impl UnitPlanner {
    pub fn for_job(job: &TypingJob) -> Self {
        let text = job.source_text();
        let chars: Vec<char> = text.chars().collect();
        let lines: Vec<Vec<char>> = chars.split(|c| *c == '\n').map(<[char]>::to_vec).collect();
        let timing = TimingModel::new(&job.timing, job.mode == TypingMode::CharByChar);

        // mistakes only make sense on top of human-like pacing
        let typos = if timing.is_human_like() {
            TypoSimulator::new(&job.typo, &chars)
        } else {
            TypoSimulator::new(&Default::default(), &[])
        };

        Self {
            lines,
            mode: job.mode,
            timing,
            typos,
            rng: rng_from_seed(job.timing.seed),
            total_chars: chars.len(),
            line_index: 0,
            col: 0,
            chars_done: 0,
        }
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    fn next_line(&mut self) -> Option<PlannedUnit> {
        while self.line_index < self.lines.len() {
            let index = self.line_index;
            let line = &self.lines[index];
            let is_last = index + 1 == self.lines.len();
            self.line_index += 1;

            let mut events = Vec::new();
            if !line.is_empty() {
                events.push(TimedSubEvent {
                    delay_ms: 0,
                    event: SubEvent::TypeCorrect {
                        unit: Unit::Text(line.iter().collect()),
                    },
                });
            }
            if !is_last {
                events.push(TimedSubEvent {
                    delay_ms: 0,
                    event: SubEvent::TypeCorrect {
                        unit: Unit::Control(ControlKey::Enter),
                    },
                });
            }

            self.chars_done += line.len() + usize::from(!is_last);
            if events.is_empty() {
                continue;
            }

            let pause_after_ms = if is_last {
                0
            } else {
                self.timing.line_delay().after_ms
            };
            return Some(PlannedUnit {
                line_index: index,
                char_index: line.len(),
                chars_done: self.chars_done,
                events,
                pause_after_ms,
            });
        }
        None
    }

    fn next_char(&mut self) -> Option<PlannedUnit> {
        let Self {
            lines,
            timing,
            typos,
            rng,
            line_index,
            col,
            chars_done,
            ..
        } = self;

        let line = lines.get(*line_index)?;
        let is_last_line = *line_index + 1 == lines.len();
        if *col >= line.len() && is_last_line {
            return None;
        }

        let ctx = char_context(line, *line_index, *col, *chars_done);
        let delay = timing.char_delay(&ctx, rng);

        let injection = if typos.is_enabled() {
            typos.maybe_inject(&ctx, rng)
        } else {
            None
        };
        let unit = match injection {
            Some(injection) => {
                let (events, pause_after_ms) =
                    typo_group(&injection, delay, line, &ctx, timing, typos, rng);
                let covered = injection.awareness + 1;
                PlannedUnit {
                    line_index: *line_index,
                    char_index: *col + injection.awareness,
                    chars_done: *chars_done + covered,
                    events,
                    pause_after_ms,
                }
            }
            None => {
                typos.note_clean_char();
                PlannedUnit {
                    line_index: *line_index,
                    char_index: *col,
                    chars_done: *chars_done + 1,
                    events: vec![TimedSubEvent {
                        delay_ms: delay.before_ms,
                        event: SubEvent::correct_char(ctx.c),
                    }],
                    pause_after_ms: delay.after_ms,
                }
            }
        };

        let advanced = unit.chars_done - *chars_done;
        *chars_done = unit.chars_done;
        if ctx.c == '\n' {
            *line_index += 1;
            *col = 0;
        } else {
            *col += advanced;
        }

        Some(unit)
    }
}

impl Iterator for UnitPlanner {
    type Item = PlannedUnit;

    fn next(&mut self) -> Option<PlannedUnit> {
        match self.mode {
            TypingMode::CharByChar => self.next_char(),
            TypingMode::LineByLine => self.next_line(),
        }
    }
}

fn char_context(line: &[char], line_index: usize, col: usize, global: usize) -> CharContext<'_> {
    CharContext {
        c: line.get(col).copied().unwrap_or('\n'),
        line,
        line_index,
        col_index: col,
        global_index: global,
        prev: col.checked_sub(1).and_then(|p| line.get(p).copied()),
    }
}

/// Wrong key, the unnoticed keys after it, the backspace run and the retype.
fn typo_group(
    injection: &Injection,
    first: UnitDelay,
    line: &[char],
    start: &CharContext<'_>,
    timing: &mut TimingModel,
    typos: &mut TypoSimulator,
    rng: &mut StdRng,
) -> (Vec<TimedSubEvent>, u64) {
    let span = injection.awareness + 1;
    let mut events = Vec::with_capacity(span * 3 + 1);

    events.push(TimedSubEvent {
        delay_ms: first.before_ms,
        event: SubEvent::TypeWrong {
            wrong: injection.wrong,
            intended: injection.intended,
        },
    });
    let mut carry = first.after_ms;

    for offset in 1..span {
        let ctx = char_context(
            line,
            start.line_index,
            start.col_index + offset,
            start.global_index + offset,
        );
        let delay = timing.char_delay(&ctx, rng);
        events.push(TimedSubEvent {
            delay_ms: carry + delay.before_ms,
            event: SubEvent::correct_char(ctx.c),
        });
        carry = delay.after_ms;
    }

    let correction = typos.correction(injection, line, rng);
    events.push(TimedSubEvent {
        delay_ms: carry + correction.hesitation_ms,
        event: SubEvent::Backspace,
    });
    events.extend(correction.backspace_gaps_ms.iter().map(|gap| TimedSubEvent {
        delay_ms: *gap,
        event: SubEvent::Backspace,
    }));

    carry = correction.retype_lead_ms;
    for offset in 0..span {
        let ctx = char_context(
            line,
            start.line_index,
            start.col_index + offset,
            start.global_index + offset,
        );
        let delay = timing.char_delay(&ctx, rng);
        events.push(TimedSubEvent {
            delay_ms: carry + delay.before_ms,
            event: SubEvent::correct_char(ctx.c),
        });
        carry = delay.after_ms;
    }

    (events, carry + correction.cooldown_pause_ms)
}

/// Plans the whole job up front.
pub fn plan_job(job: &TypingJob) -> Vec<PlannedUnit> {
    UnitPlanner::for_job(job).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanStats {
    pub units: usize,
    pub keystrokes: usize,
    pub typos: usize,
    pub total_wait_ms: u64,
}

pub fn stats(units: &[PlannedUnit]) -> PlanStats {
    let mut stats = PlanStats {
        units: units.len(),
        ..Default::default()
    };
    for unit in units {
        stats.total_wait_ms = stats.total_wait_ms.saturating_add(unit.total_wait_ms());
        if unit.has_typo() {
            stats.typos += 1;
        }
        for e in &unit.events {
            stats.keystrokes += match &e.event {
                SubEvent::TypeCorrect {
                    unit: Unit::Text(text),
                } => text.chars().count(),
                _ => 1,
            };
        }
    }
    stats
}

/// Replays planned sub-events into plain text, as an editor would show them.
pub fn replay_text(units: &[PlannedUnit]) -> String {
    let mut out = String::new();
    for e in units.iter().flat_map(|u| &u.events) {
        match &e.event {
            SubEvent::TypeCorrect { unit } => match unit {
                Unit::Text(text) => out.push_str(text),
                Unit::Control(ControlKey::Enter) => out.push('\n'),
                Unit::Control(ControlKey::Tab) => out.push('\t'),
                Unit::Control(ControlKey::Backspace) => {
                    out.pop();
                }
            },
            SubEvent::TypeWrong { wrong, .. } => out.push(*wrong),
            SubEvent::Backspace => {
                out.pop();
            }
        }
    }
    out
}
