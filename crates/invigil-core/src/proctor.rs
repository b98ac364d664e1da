//! Proctored quiz session — countdown, answers, tab-switch accounting.
//!
//! The session is a pure state machine: the owning engine drives it with one
//! [`tick`](QuizSession::tick) per second and with user events. Submission is
//! terminal and fires exactly once, whether triggered by expiry or by the
//! user; a manual submit racing the final tick yields a single submission.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuizError {
    #[error("question index {0} is out of range")]
    QuestionOutOfRange(usize),
    #[error("choice {0} is out of range for this question")]
    ChoiceOutOfRange(usize),
    #[error("session already submitted")]
    AlreadySubmitted,
}

/// One multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub choices: Vec<String>,
}

/// Result of one countdown tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_secs: u32 },
    /// The countdown hit zero on this tick; the session auto-submitted.
    Expired(Submission),
}

/// The terminal output of a session, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// Selected choice per question, by question index.
    pub answers: Vec<Option<usize>>,
    pub time_taken_secs: u32,
    pub tab_switches: u32,
    /// True when the countdown forced the submission.
    pub auto: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Submitted,
}

/// An in-progress timed assessment attempt.
pub struct QuizSession {
    questions: Vec<Question>,
    answers: Vec<Option<usize>>,
    current: usize,
    duration_secs: u32,
    remaining_secs: u32,
    tab_switches: u32,
    phase: Phase,
}

impl QuizSession {
    pub fn new(questions: Vec<Question>, duration_secs: u32) -> Self {
        let n = questions.len();
        Self {
            questions,
            answers: vec![None; n],
            current: 0,
            duration_secs,
            remaining_secs: duration_secs,
            tab_switches: 0,
            phase: Phase::Active,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn tab_switches(&self) -> u32 {
        self.tab_switches
    }

    pub fn current_question(&self) -> usize {
        self.current
    }

    /// How many questions have an answer recorded.
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    pub fn is_submitted(&self) -> bool {
        self.phase == Phase::Submitted
    }

    /// Advance the countdown by one second.
    ///
    /// Returns `None` once the session has been submitted — a tick arriving
    /// after teardown is inert. Remaining time never goes below zero, and
    /// the expiry submission is produced on exactly one tick.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        if self.phase == Phase::Submitted {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            let submission = self.finalize(true);
            return Some(TickOutcome::Expired(submission));
        }
        Some(TickOutcome::Running {
            remaining_secs: self.remaining_secs,
        })
    }

    /// Record (or overwrite) the answer for a question.
    pub fn record_answer(&mut self, question: usize, choice: usize) -> Result<(), QuizError> {
        if self.phase == Phase::Submitted {
            return Err(QuizError::AlreadySubmitted);
        }
        let q = self
            .questions
            .get(question)
            .ok_or(QuizError::QuestionOutOfRange(question))?;
        if choice >= q.choices.len() {
            return Err(QuizError::ChoiceOutOfRange(choice));
        }
        self.answers[question] = Some(choice);
        self.current = question;
        Ok(())
    }

    /// Note that the assessment page became hidden.
    ///
    /// Advisory only — surfaced to the user in real time, never enforced.
    /// Returns the new count. Counting stops once the session is submitted.
    pub fn mark_hidden(&mut self) -> u32 {
        if self.phase == Phase::Active {
            self.tab_switches += 1;
        }
        self.tab_switches
    }

    /// User-initiated submission.
    ///
    /// Returns `None` if the session was already submitted (for example by
    /// the final tick an instant earlier) — the caller must treat that as
    /// "already handled", not as an error to retry.
    pub fn submit(&mut self) -> Option<Submission> {
        if self.phase == Phase::Submitted {
            return None;
        }
        Some(self.finalize(false))
    }

    fn finalize(&mut self, auto: bool) -> Submission {
        self.phase = Phase::Submitted;
        Submission {
            answers: self.answers.clone(),
            time_taken_secs: self.duration_secs - self.remaining_secs,
            tab_switches: self.tab_switches,
            auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                prompt: format!("question {i}"),
                choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            })
            .collect()
    }

    #[test]
    fn test_countdown_600_ticks_submits_exactly_once() {
        let mut s = QuizSession::new(questions(5), 600);
        let mut submissions = 0;
        for _ in 0..600 {
            if let Some(TickOutcome::Expired(sub)) = s.tick() {
                submissions += 1;
                assert!(sub.auto);
                assert_eq!(sub.time_taken_secs, 600);
            }
        }
        assert_eq!(submissions, 1);
        // Ticks after submission are inert.
        assert_eq!(s.tick(), None);
        assert_eq!(s.remaining_secs(), 0);
    }

    #[test]
    fn test_tick_decrements_by_one() {
        let mut s = QuizSession::new(questions(1), 10);
        assert_eq!(
            s.tick(),
            Some(TickOutcome::Running { remaining_secs: 9 })
        );
        assert_eq!(
            s.tick(),
            Some(TickOutcome::Running { remaining_secs: 8 })
        );
    }

    #[test]
    fn test_manual_submit_racing_final_tick() {
        let mut s = QuizSession::new(questions(1), 1);
        let tick = s.tick();
        assert!(matches!(tick, Some(TickOutcome::Expired(_))));
        // The user pressed submit in the same tick: no second submission.
        assert_eq!(s.submit(), None);
    }

    #[test]
    fn test_expiry_racing_manual_submit() {
        let mut s = QuizSession::new(questions(1), 2);
        s.tick();
        let sub = s.submit().unwrap();
        assert!(!sub.auto);
        assert_eq!(sub.time_taken_secs, 1);
        // The tick that would have expired the session is discarded.
        assert_eq!(s.tick(), None);
    }

    #[test]
    fn test_answers_recorded_by_index() {
        let mut s = QuizSession::new(questions(3), 60);
        s.record_answer(1, 2).unwrap();
        s.record_answer(0, 3).unwrap();
        // Overwrite is allowed.
        s.record_answer(1, 0).unwrap();
        let sub = s.submit().unwrap();
        assert_eq!(sub.answers, vec![Some(3), Some(0), None]);
    }

    #[test]
    fn test_answer_bounds_checked() {
        let mut s = QuizSession::new(questions(2), 60);
        assert_eq!(
            s.record_answer(5, 0),
            Err(QuizError::QuestionOutOfRange(5))
        );
        assert_eq!(s.record_answer(0, 9), Err(QuizError::ChoiceOutOfRange(9)));
    }

    #[test]
    fn test_tab_switches_monotonic_and_frozen_after_submit() {
        let mut s = QuizSession::new(questions(1), 60);
        assert_eq!(s.mark_hidden(), 1);
        assert_eq!(s.mark_hidden(), 2);
        let sub = s.submit().unwrap();
        assert_eq!(sub.tab_switches, 2);
        assert_eq!(s.mark_hidden(), 2);
    }

    #[test]
    fn test_no_answers_after_submit() {
        let mut s = QuizSession::new(questions(1), 60);
        s.submit().unwrap();
        assert_eq!(s.record_answer(0, 0), Err(QuizError::AlreadySubmitted));
    }
}
