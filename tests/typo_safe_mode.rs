use pretty_assertions::assert_eq;

use autotyper::model::{PlannedUnit, SubEvent, TypingJob, WindowHandle};
use autotyper::planner::{plan_job, replay_text, stats};
use autotyper::timing::{TimingConfig, TimingProfile};
use autotyper::typo::{CharSpan, TypoConfig, TypoProfile};

const SOURCE: &str = r#"fn greet(name: &str) -> String {
    let greeting = "hello there, friend";
    format!("{greeting} and welcome, {name}")
}

// plain comments and prose are fair game for mistakes
fn main() {
    let message = greet("world of typing");
    println!("{message}");
}
"#;

fn typo_job(text: &str, seed: u64, safe_mode: bool) -> TypingJob {
    let mut job = TypingJob::new(text, WindowHandle(1));
    job.timing = TimingConfig::human(TimingProfile::Smooth, Some(seed));
    job.typo = TypoConfig {
        safe_mode,
        probability: Some(0.3),
        ..TypoConfig::with_profile(TypoProfile::Messy)
    };
    job
}

/// Char index of the first source character each typo group replaced.
fn injection_points(units: &[PlannedUnit]) -> Vec<usize> {
    units
        .iter()
        .filter(|u| u.has_typo())
        .map(|u| {
            let last_backspace = u
                .events
                .iter()
                .rposition(|e| e.event == SubEvent::Backspace)
                .expect("typo group has backspaces");
            let retyped = u.events.len() - last_backspace - 1;
            u.chars_done - retyped
        })
        .collect()
}

/// Indices strictly between a pair of double quotes, per line.
fn quoted_indices(text: &str) -> Vec<usize> {
    let mut inside = Vec::new();
    let mut in_quotes = false;
    for (i, c) in text.chars().enumerate() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' => in_quotes = false,
            _ if in_quotes => inside.push(i),
            _ => {}
        }
    }
    inside
}

#[test]
fn safe_mode_keeps_typos_out_of_string_literals() {
    let quoted = quoted_indices(SOURCE);
    let chars: Vec<char> = SOURCE.chars().collect();
    let mut total = 0;

    for seed in 0..40 {
        let units = plan_job(&typo_job(SOURCE, seed, true));
        assert_eq!(replay_text(&units), SOURCE);

        for index in injection_points(&units) {
            assert!(
                !quoted.contains(&index),
                "seed {seed}: typo inside a literal at {index}"
            );
            assert!(chars[index].is_ascii_alphabetic());
            total += 1;
        }
    }
    assert!(total > 0, "expected some typos outside literals");
}

#[test]
fn without_safe_mode_literals_are_fair_game() {
    let quoted = quoted_indices(SOURCE);
    let hit_literal = (0..40).any(|seed| {
        let units = plan_job(&typo_job(SOURCE, seed, false));
        injection_points(&units).iter().any(|i| quoted.contains(i))
    });
    assert!(hit_literal);
}

#[test]
fn caller_spans_are_never_touched() {
    let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
    let span = CharSpan { start: 6, end: 22 };

    for seed in 0..40 {
        let mut job = typo_job(text, seed, false);
        job.typo.unsafe_spans = vec![span];
        let units = plan_job(&job);
        for index in injection_points(&units) {
            assert!(!span.contains(index), "seed {seed}: typo at {index}");
        }
    }
}

#[test]
fn typo_rate_tracks_the_configured_probability() {
    let text = "the quick brown fox jumps over the lazy dog ".repeat(200);
    let mut job = TypingJob::new(text.as_str(), WindowHandle(1));
    job.timing = TimingConfig::human(TimingProfile::Smooth, Some(7));
    job.typo = TypoConfig {
        probability: Some(0.02),
        ..TypoConfig::with_profile(TypoProfile::Subtle)
    };

    let units = plan_job(&job);
    let typos = stats(&units).typos as f64;
    let letters = text.chars().filter(char::is_ascii_alphabetic).count() as f64;
    let rate = typos / letters;

    // cooldowns after each typo keep the rate under the probability
    assert!(rate > 0.005 && rate <= 0.025, "rate {rate}");
    assert_eq!(replay_text(&units), text);
}
