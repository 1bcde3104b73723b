use crate::model::{ControlKey, PlannedUnit, SubEvent, Unit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// The line is printed right before this unit is delivered.
    pub unit_index: usize,
    pub line: String,
}

fn unit_text(unit: &Unit) -> String {
    match unit {
        Unit::Text(text) => text.clone(),
        Unit::Control(ControlKey::Enter) => "\n".to_string(),
        Unit::Control(ControlKey::Tab) => "\t".to_string(),
        Unit::Control(ControlKey::Backspace) => String::new(),
    }
}

/// What a typo group typed before noticing, and what it retyped afterwards.
fn typo_summary(unit: &PlannedUnit) -> Option<(String, String)> {
    if !unit.has_typo() {
        return None;
    }

    let first_backspace = unit
        .events
        .iter()
        .position(|e| e.event == SubEvent::Backspace)?;
    let last_backspace = unit
        .events
        .iter()
        .rposition(|e| e.event == SubEvent::Backspace)?;

    let mut typed = String::new();
    for e in &unit.events[..first_backspace] {
        match &e.event {
            SubEvent::TypeWrong { wrong, .. } => typed.push(*wrong),
            SubEvent::TypeCorrect { unit } => typed.push_str(&unit_text(unit)),
            SubEvent::Backspace => {}
        }
    }

    let intended: String = unit.events[last_backspace + 1..]
        .iter()
        .filter_map(|e| match &e.event {
            SubEvent::TypeCorrect { unit } => Some(unit_text(unit)),
            _ => None,
        })
        .collect();

    Some((typed, intended))
}

/// Console lines for a planned job: one "Typing" line per clean run of units and
/// one "Replace" line per typo group.
pub fn job_console_trace(units: &[PlannedUnit]) -> Vec<TraceEvent> {
    let mut events = Vec::new();
    let mut run = String::new();
    let mut run_start: Option<usize> = None;

    let flush = |events: &mut Vec<TraceEvent>, run: &mut String, run_start: &mut Option<usize>| {
        if let Some(unit_index) = run_start.take() {
            if !run.is_empty() {
                events.push(TraceEvent {
                    unit_index,
                    line: format!("Typing \"{}\"...", escape_for_log(run)),
                });
            }
            run.clear();
        }
    };

    for (unit_index, unit) in units.iter().enumerate() {
        if let Some((typed, intended)) = typo_summary(unit) {
            flush(&mut events, &mut run, &mut run_start);
            events.push(TraceEvent {
                unit_index,
                line: format!(
                    "Replace \"{}\" with \"{}\"...",
                    escape_for_log(&typed),
                    escape_for_log(&intended)
                ),
            });
            continue;
        }

        run_start.get_or_insert(unit_index);
        for e in &unit.events {
            if let SubEvent::TypeCorrect { unit } = &e.event {
                run.push_str(&unit_text(unit));
            }
        }
    }
    flush(&mut events, &mut run, &mut run_start);

    events
}

pub fn print_trace_line(line: &str) {
    const RESET: &str = "\x1b[0m";
    const TYPING: &str = "\x1b[34m";
    const REPLACE: &str = "\x1b[33m";

    if let Some(rest) = line.strip_prefix("Typing") {
        eprintln!("{TYPING}Typing{RESET}{rest}");
    } else if let Some(rest) = line.strip_prefix("Replace") {
        eprintln!("{REPLACE}Replace{RESET}{rest}");
    } else {
        eprintln!("{line}");
    }
}

fn escape_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}
