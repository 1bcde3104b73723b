use pretty_assertions::assert_eq;

use autotyper::model::{PlannedUnit, SubEvent, TimedSubEvent, TypingJob, WindowHandle};
use autotyper::planner::plan_job;
use autotyper::timing::TimingConfig;
use autotyper::trace::job_console_trace;

fn timed(event: SubEvent) -> TimedSubEvent {
    TimedSubEvent { delay_ms: 0, event }
}

fn clean_unit(c: char, chars_done: usize) -> PlannedUnit {
    PlannedUnit {
        line_index: 0,
        char_index: chars_done - 1,
        chars_done,
        events: vec![timed(SubEvent::correct_char(c))],
        pause_after_ms: 0,
    }
}

fn trace_events(units: &[PlannedUnit]) -> Vec<(usize, String)> {
    job_console_trace(units)
        .into_iter()
        .map(|e| (e.unit_index, e.line))
        .collect()
}

#[test]
fn logs_one_typing_run_for_clean_text() {
    let mut job = TypingJob::new("a\nb", WindowHandle(1));
    job.timing = TimingConfig::fixed(0, 0);

    let events = trace_events(&plan_job(&job));

    assert_eq!(events, vec![(0, "Typing \"a\\nb\"...".to_string())]);
}

#[test]
fn logs_replace_at_the_typo_group() {
    let mut units: Vec<PlannedUnit> = "hello w"
        .chars()
        .enumerate()
        .map(|(i, c)| clean_unit(c, i + 1))
        .collect();

    // "u" typed for "o", noticed one char late
    units.push(PlannedUnit {
        line_index: 0,
        char_index: 8,
        chars_done: 9,
        events: vec![
            timed(SubEvent::TypeWrong {
                wrong: 'u',
                intended: 'o',
            }),
            timed(SubEvent::correct_char('r')),
            timed(SubEvent::Backspace),
            timed(SubEvent::Backspace),
            timed(SubEvent::correct_char('o')),
            timed(SubEvent::correct_char('r')),
        ],
        pause_after_ms: 0,
    });
    units.push(clean_unit('l', 10));
    units.push(clean_unit('d', 11));

    let events = trace_events(&units);

    assert_eq!(
        events,
        vec![
            (0, "Typing \"hello w\"...".to_string()),
            (7, "Replace \"ur\" with \"or\"...".to_string()),
            (8, "Typing \"ld\"...".to_string()),
        ]
    );
}

#[test]
fn escapes_quotes_and_tabs() {
    let mut job = TypingJob::new("\t\"x\"", WindowHandle(1));
    job.timing = TimingConfig::fixed(0, 0);

    let events = trace_events(&plan_job(&job));

    assert_eq!(events, vec![(0, "Typing \"\\t\\\"x\\\"\"...".to_string())]);
}

#[test]
fn empty_text_logs_nothing() {
    let job = TypingJob::new("", WindowHandle(1));
    assert!(trace_events(&plan_job(&job)).is_empty());
}
