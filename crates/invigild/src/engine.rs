//! Session engine: owns every mutable enrollment and quiz session and
//! serializes all flows through one request loop.
//!
//! D-Bus handlers talk to the engine through a clone-safe [`EngineHandle`];
//! each request carries a oneshot reply channel. Quiz countdowns run as
//! separate ticker tasks that feed tick messages back into the same loop,
//! tagged with a session generation — a tick (or any late result) from a
//! superseded session is discarded instead of touching live state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use invigil_checkpoint::{BehaviorAnalysis, BehaviorReport, Checkpoint, CheckpointError, RosterEntry};
use invigil_core::enrollment::EnrollmentError;
use invigil_core::proctor::{Question, QuizError};
use invigil_core::{
    evaluate, AttendanceEvent, AttendanceOutcome, CaptureOutcome, EnrollmentRecord,
    EnrollmentSession, QuizSession, StepKind, Still, Submission, TickOutcome,
};
use invigil_hw::{CameraError, StillSource};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("verification service error: {0} — try again")]
    Checkpoint(#[from] CheckpointError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("enrollment error: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("quiz error: {0}")]
    Quiz(#[from] QuizError),
    #[error("no enrolled reference images — complete profile setup first")]
    NotEnrolled,
    #[error("attendance already marked for {0}")]
    AlreadyMarked(String),
    #[error("no active session for this user")]
    NoActiveSession,
    #[error("engine task exited")]
    ChannelClosed,
}

/// Which uniqueness window an attendance capture runs under.
#[derive(Debug, Clone)]
pub enum AttendanceScope {
    /// One accepted event per calendar day (teacher variant).
    Daily,
    /// One accepted event per explicit session id (student variant).
    Session(String),
}

impl AttendanceScope {
    fn session_key(&self) -> String {
        match self {
            AttendanceScope::Daily => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            AttendanceScope::Session(id) => id.clone(),
        }
    }
}

/// Reply to starting (or restarting) an enrollment walk-through.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollStarted {
    pub step: usize,
    pub label: String,
    /// True when a previous record exists; its images are shown for display
    /// but every step must be freshly captured to overwrite.
    pub already_enrolled: bool,
    pub existing_refs: Vec<String>,
}

/// Reply to one attendance capture attempt. A rejection is data, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum AttendReply {
    Marked { event: AttendanceEvent },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizStarted {
    pub quiz_id: String,
    pub questions: usize,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizStatus {
    pub remaining_secs: u32,
    pub tab_switches: u32,
    pub current_question: usize,
    pub answered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizSubmitted {
    pub submission: Submission,
    /// Missing when the analysis checkpoint failed; the submission itself is
    /// never blocked on it.
    pub analysis: Option<BehaviorAnalysis>,
}

enum EngineRequest {
    EnrollStart {
        user: String,
        reply: oneshot::Sender<Result<EnrollStarted, EngineError>>,
    },
    EnrollCapture {
        user: String,
        reply: oneshot::Sender<Result<CaptureOutcome, EngineError>>,
    },
    EnrollAdvance {
        user: String,
        reply: oneshot::Sender<Result<StepKind, EngineError>>,
    },
    EnrollSave {
        user: String,
        reply: oneshot::Sender<Result<EnrollmentRecord, EngineError>>,
    },
    EnrollCancel {
        user: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Attend {
        user: String,
        scope: AttendanceScope,
        reply: oneshot::Sender<Result<AttendReply, EngineError>>,
    },
    QuizStart {
        user: String,
        quiz_id: String,
        questions: Vec<Question>,
        duration_secs: u32,
        reply: oneshot::Sender<Result<QuizStarted, EngineError>>,
    },
    QuizAnswer {
        user: String,
        question: usize,
        choice: usize,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    QuizHidden {
        user: String,
        reply: oneshot::Sender<Result<u32, EngineError>>,
    },
    QuizNoteResource {
        user: String,
        resource: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    QuizStatus {
        user: String,
        reply: oneshot::Sender<Result<QuizStatus, EngineError>>,
    },
    QuizSubmit {
        user: String,
        reply: oneshot::Sender<Result<QuizSubmitted, EngineError>>,
    },
    /// Internal: one countdown second for the session with this generation.
    QuizTick { user: String, generation: u64 },
    ScanClassroom {
        roster: Vec<RosterEntry>,
        reply: oneshot::Sender<Result<Vec<String>, EngineError>>,
    },
    FeedbackQuestions {
        subject: String,
        reply: oneshot::Sender<Result<Vec<String>, EngineError>>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn enroll_start(&self, user: String) -> Result<EnrollStarted, EngineError> {
        self.request(|reply| EngineRequest::EnrollStart { user, reply })
            .await
    }

    pub async fn enroll_capture(&self, user: String) -> Result<CaptureOutcome, EngineError> {
        self.request(|reply| EngineRequest::EnrollCapture { user, reply })
            .await
    }

    pub async fn enroll_advance(&self, user: String) -> Result<StepKind, EngineError> {
        self.request(|reply| EngineRequest::EnrollAdvance { user, reply })
            .await
    }

    pub async fn enroll_save(&self, user: String) -> Result<EnrollmentRecord, EngineError> {
        self.request(|reply| EngineRequest::EnrollSave { user, reply })
            .await
    }

    pub async fn enroll_cancel(&self, user: String) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::EnrollCancel { user, reply })
            .await
    }

    pub async fn attend(
        &self,
        user: String,
        scope: AttendanceScope,
    ) -> Result<AttendReply, EngineError> {
        self.request(|reply| EngineRequest::Attend { user, scope, reply })
            .await
    }

    pub async fn quiz_start(
        &self,
        user: String,
        quiz_id: String,
        questions: Vec<Question>,
        duration_secs: u32,
    ) -> Result<QuizStarted, EngineError> {
        self.request(|reply| EngineRequest::QuizStart {
            user,
            quiz_id,
            questions,
            duration_secs,
            reply,
        })
        .await
    }

    pub async fn quiz_answer(
        &self,
        user: String,
        question: usize,
        choice: usize,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::QuizAnswer {
            user,
            question,
            choice,
            reply,
        })
        .await
    }

    pub async fn quiz_hidden(&self, user: String) -> Result<u32, EngineError> {
        self.request(|reply| EngineRequest::QuizHidden { user, reply })
            .await
    }

    pub async fn quiz_note_resource(
        &self,
        user: String,
        resource: String,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::QuizNoteResource {
            user,
            resource,
            reply,
        })
        .await
    }

    pub async fn quiz_status(&self, user: String) -> Result<QuizStatus, EngineError> {
        self.request(|reply| EngineRequest::QuizStatus { user, reply })
            .await
    }

    pub async fn quiz_submit(&self, user: String) -> Result<QuizSubmitted, EngineError> {
        self.request(|reply| EngineRequest::QuizSubmit { user, reply })
            .await
    }

    pub async fn scan_classroom(
        &self,
        roster: Vec<RosterEntry>,
    ) -> Result<Vec<String>, EngineError> {
        self.request(|reply| EngineRequest::ScanClassroom { roster, reply })
            .await
    }

    pub async fn feedback_questions(&self, subject: String) -> Result<Vec<String>, EngineError> {
        self.request(|reply| EngineRequest::FeedbackQuestions { subject, reply })
            .await
    }
}

struct QuizEntry {
    quiz_id: String,
    generation: u64,
    session: QuizSession,
    resources: Vec<String>,
    ticker: JoinHandle<()>,
}

struct Engine<C, S> {
    store: Store,
    // Arc so slow checkpoint calls can run in spawned tasks while the
    // request loop keeps processing ticks.
    checkpoint: Arc<C>,
    stills: S,
    threshold: f32,
    tx: mpsc::Sender<EngineRequest>,
    enrollments: HashMap<String, EnrollmentSession>,
    quizzes: HashMap<String, QuizEntry>,
    next_generation: u64,
}

/// Spawn the engine task and return a handle to it.
pub fn spawn_engine<C, S>(store: Store, checkpoint: C, stills: S, threshold: f32) -> EngineHandle
where
    C: Checkpoint,
    S: StillSource + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(16);
    let engine = Engine {
        store,
        checkpoint: Arc::new(checkpoint),
        stills,
        threshold,
        tx: tx.clone(),
        enrollments: HashMap::new(),
        quizzes: HashMap::new(),
        next_generation: 0,
    };
    tokio::spawn(engine.run(rx));
    EngineHandle { tx }
}

impl<C, S> Engine<C, S>
where
    C: Checkpoint,
    S: StillSource + 'static,
{
    async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine task started");
        while let Some(req) = rx.recv().await {
            match req {
                EngineRequest::EnrollStart { user, reply } => {
                    let _ = reply.send(self.enroll_start(user).await);
                }
                EngineRequest::EnrollCapture { user, reply } => {
                    let _ = reply.send(self.enroll_capture(&user).await);
                }
                EngineRequest::EnrollAdvance { user, reply } => {
                    let _ = reply.send(self.enroll_advance(&user));
                }
                EngineRequest::EnrollSave { user, reply } => {
                    let _ = reply.send(self.enroll_save(&user).await);
                }
                EngineRequest::EnrollCancel { user, reply } => {
                    let _ = reply.send(Ok(self.enroll_cancel(&user)));
                }
                EngineRequest::Attend { user, scope, reply } => {
                    self.attend(user, scope, reply).await;
                }
                EngineRequest::QuizStart {
                    user,
                    quiz_id,
                    questions,
                    duration_secs,
                    reply,
                } => {
                    let _ = reply.send(Ok(self.quiz_start(user, quiz_id, questions, duration_secs)));
                }
                EngineRequest::QuizAnswer {
                    user,
                    question,
                    choice,
                    reply,
                } => {
                    let _ = reply.send(self.with_quiz(&user, |s| {
                        s.record_answer(question, choice).map_err(EngineError::from)
                    }));
                }
                EngineRequest::QuizHidden { user, reply } => {
                    let _ = reply.send(self.with_quiz(&user, |s| Ok(s.mark_hidden())));
                }
                EngineRequest::QuizNoteResource {
                    user,
                    resource,
                    reply,
                } => {
                    let result = match self.quizzes.get_mut(&user) {
                        Some(entry) => {
                            entry.resources.push(resource);
                            Ok(())
                        }
                        None => Err(EngineError::NoActiveSession),
                    };
                    let _ = reply.send(result);
                }
                EngineRequest::QuizStatus { user, reply } => {
                    let _ = reply.send(self.quiz_status(&user));
                }
                EngineRequest::QuizSubmit { user, reply } => {
                    match self.take_submission(&user) {
                        Ok(submission) => self.finalize_quiz(&user, submission, Some(reply)),
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                EngineRequest::QuizTick { user, generation } => {
                    self.quiz_tick(&user, generation);
                }
                EngineRequest::ScanClassroom { roster, reply } => {
                    self.scan_classroom(roster, reply);
                }
                EngineRequest::FeedbackQuestions { subject, reply } => {
                    let checkpoint = Arc::clone(&self.checkpoint);
                    tokio::spawn(async move {
                        let result = checkpoint
                            .feedback_questions(&subject)
                            .await
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    });
                }
            }
        }
        tracing::info!("engine task exiting");
    }

    // --- enrollment ---

    async fn enroll_start(&mut self, user: String) -> Result<EnrollStarted, EngineError> {
        // A fresh start replaces any half-finished attempt and discards its
        // captures.
        if let Some(mut old) = self.enrollments.remove(&user) {
            old.cancel();
        }

        let existing = self.store.load_enrollment(&user).await?;
        let mut session = EnrollmentSession::new(user.clone());
        let first = session.start()?;
        self.enrollments.insert(user.clone(), session);

        tracing::info!(user = %user, already_enrolled = existing.is_some(), "enrollment started");
        Ok(EnrollStarted {
            step: first.index(),
            label: first.label().to_string(),
            already_enrolled: existing.is_some(),
            existing_refs: existing.map(|r| r.image_refs).unwrap_or_default(),
        })
    }

    async fn enroll_capture(&mut self, user: &str) -> Result<CaptureOutcome, EngineError> {
        if !self.enrollments.contains_key(user) {
            return Err(EngineError::NoActiveSession);
        }

        let still = self.stills.snapshot()?;
        let detection = self.checkpoint.detect(&still).await?;

        let session = self
            .enrollments
            .get_mut(user)
            .ok_or(EngineError::NoActiveSession)?;
        let outcome = session.offer_capture(still, detection.face_count, &detection.reason)?;
        Ok(outcome)
    }

    fn enroll_advance(&mut self, user: &str) -> Result<StepKind, EngineError> {
        let session = self
            .enrollments
            .get_mut(user)
            .ok_or(EngineError::NoActiveSession)?;
        Ok(session.advance()?)
    }

    async fn enroll_save(&mut self, user: &str) -> Result<EnrollmentRecord, EngineError> {
        let session = self
            .enrollments
            .get_mut(user)
            .ok_or(EngineError::NoActiveSession)?;
        let stills = session.finish()?;
        self.enrollments.remove(user);

        // A store failure here is surfaced as its own error class: the user
        // is verified but not saved, which must never read as success.
        let record = self.store.save_enrollment(user, stills).await?;
        Ok(record)
    }

    fn enroll_cancel(&mut self, user: &str) -> bool {
        match self.enrollments.remove(user) {
            Some(mut session) => {
                session.cancel();
                tracing::info!(user, "enrollment cancelled");
                true
            }
            None => false,
        }
    }

    // --- attendance ---

    /// Runs the cheap local part (store reads, snapshot) inline and hands
    /// the slow verification round trip to a spawned task, so quiz ticks
    /// keep flowing while the checkpoint call is in flight.
    async fn attend(
        &mut self,
        user: String,
        scope: AttendanceScope,
        reply: oneshot::Sender<Result<AttendReply, EngineError>>,
    ) {
        let (session_key, probe, references) = match self.attend_prepare(&user, &scope).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let checkpoint = Arc::clone(&self.checkpoint);
        let store = self.store.clone();
        let threshold = self.threshold;
        tokio::spawn(async move {
            let result =
                attend_verify(checkpoint, store, threshold, user, session_key, probe, references)
                    .await;
            let _ = reply.send(result);
        });
    }

    async fn attend_prepare(
        &mut self,
        user: &str,
        scope: &AttendanceScope,
    ) -> Result<(String, Still, Vec<Vec<u8>>), EngineError> {
        let record = self
            .store
            .load_enrollment(user)
            .await?
            .ok_or(EngineError::NotEnrolled)?;

        let session_key = scope.session_key();
        // Disable the capture attempt up front: no camera, no checkpoint
        // call when the event already exists.
        if self.store.attendance_exists(user, &session_key).await? {
            return Err(EngineError::AlreadyMarked(session_key));
        }

        let probe = self.stills.snapshot()?;
        let references = self.store.load_reference_images(&record).await?;
        Ok((session_key, probe, references))
    }

    // --- proctored quiz ---

    fn quiz_start(
        &mut self,
        user: String,
        quiz_id: String,
        questions: Vec<Question>,
        duration_secs: u32,
    ) -> QuizStarted {
        // A fresh mount supersedes any previous attempt; its ticker becomes
        // inert through both the abort and the generation bump.
        if let Some(old) = self.quizzes.remove(&user) {
            old.ticker.abort();
            tracing::warn!(user = %user, quiz = %old.quiz_id, "superseding active quiz session");
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let ticker = spawn_ticker(self.tx.clone(), user.clone(), generation);

        let started = QuizStarted {
            quiz_id: quiz_id.clone(),
            questions: questions.len(),
            duration_secs,
        };
        self.quizzes.insert(
            user.clone(),
            QuizEntry {
                quiz_id,
                generation,
                session: QuizSession::new(questions, duration_secs),
                resources: Vec::new(),
                ticker,
            },
        );
        tracing::info!(user = %user, duration_secs, "quiz session started");
        started
    }

    fn with_quiz<T>(
        &mut self,
        user: &str,
        f: impl FnOnce(&mut QuizSession) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let entry = self
            .quizzes
            .get_mut(user)
            .ok_or(EngineError::NoActiveSession)?;
        f(&mut entry.session)
    }

    fn quiz_status(&self, user: &str) -> Result<QuizStatus, EngineError> {
        let entry = self.quizzes.get(user).ok_or(EngineError::NoActiveSession)?;
        let s = &entry.session;
        Ok(QuizStatus {
            remaining_secs: s.remaining_secs(),
            tab_switches: s.tab_switches(),
            current_question: s.current_question(),
            answered: s.answered_count(),
        })
    }

    fn take_submission(&mut self, user: &str) -> Result<Submission, EngineError> {
        let entry = self
            .quizzes
            .get_mut(user)
            .ok_or(EngineError::NoActiveSession)?;
        // None means the final tick beat the user to it; the session is
        // gone either way.
        entry.session.submit().ok_or(EngineError::NoActiveSession)
    }

    fn quiz_tick(&mut self, user: &str, generation: u64) {
        let expired = match self.quizzes.get_mut(user) {
            Some(entry) if entry.generation == generation => match entry.session.tick() {
                Some(TickOutcome::Expired(submission)) => Some(submission),
                _ => None,
            },
            // Stale generation or no session: the tick is inert.
            _ => None,
        };
        if let Some(submission) = expired {
            tracing::info!(user, "countdown expired — auto-submitting");
            self.finalize_quiz(user, submission, None);
        }
    }

    /// Tear down the session, stop its ticker, and run the behavior-analysis
    /// checkpoint in a spawned task so the request loop is never blocked on
    /// it. Analysis failures are logged, never fatal — the submission
    /// already happened.
    fn finalize_quiz(
        &mut self,
        user: &str,
        submission: Submission,
        reply: Option<oneshot::Sender<Result<QuizSubmitted, EngineError>>>,
    ) {
        let Some(entry) = self.quizzes.remove(user) else {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(QuizSubmitted {
                    submission,
                    analysis: None,
                }));
            }
            return;
        };
        entry.ticker.abort();

        let report = BehaviorReport {
            student_id: user.to_string(),
            quiz_id: entry.quiz_id,
            tab_switch_count: submission.tab_switches,
            resource_access_log: entry.resources,
            time_taken_secs: submission.time_taken_secs,
        };
        let checkpoint = Arc::clone(&self.checkpoint);
        let user = user.to_string();
        tokio::spawn(async move {
            let analysis = match checkpoint.analyze_behavior(&report).await {
                Ok(analysis) => {
                    if analysis.is_suspicious {
                        tracing::warn!(
                            user,
                            reasons = ?analysis.suspicious_reasons,
                            "behavior analysis flagged attempt"
                        );
                    }
                    Some(analysis)
                }
                Err(e) => {
                    tracing::warn!(user, error = %e, "behavior analysis failed");
                    None
                }
            };
            if let Some(reply) = reply {
                let _ = reply.send(Ok(QuizSubmitted {
                    submission,
                    analysis,
                }));
            }
        });
    }

    // --- classroom scan ---

    fn scan_classroom(
        &mut self,
        roster: Vec<RosterEntry>,
        reply: oneshot::Sender<Result<Vec<String>, EngineError>>,
    ) {
        if roster.is_empty() {
            let _ = reply.send(Ok(Vec::new()));
            return;
        }
        let photo = match self.stills.snapshot() {
            Ok(photo) => photo,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        let checkpoint = Arc::clone(&self.checkpoint);
        tokio::spawn(async move {
            let result = checkpoint
                .scan_classroom(&photo, &roster)
                .await
                .map_err(EngineError::from);
            let _ = reply.send(result);
        });
    }
}

/// Verification half of an attendance attempt, run off the request loop.
async fn attend_verify<C: Checkpoint>(
    checkpoint: Arc<C>,
    store: Store,
    threshold: f32,
    user: String,
    session_key: String,
    probe: Still,
    references: Vec<Vec<u8>>,
) -> Result<AttendReply, EngineError> {
    let decision = checkpoint.verify(&probe, &references).await?;

    match evaluate(decision, threshold) {
        AttendanceOutcome::Accepted { confidence } => {
            let event = AttendanceEvent::for_session(user.clone(), session_key.clone(), confidence);
            if !store.insert_attendance(&event).await? {
                // A concurrent submission won the conditional insert.
                return Err(EngineError::AlreadyMarked(session_key));
            }
            tracing::info!(user, key = %event.session_key, confidence, "attendance marked");
            Ok(AttendReply::Marked { event })
        }
        AttendanceOutcome::LowConfidence { confidence } => Ok(AttendReply::Rejected {
            reason: format!("confidence {confidence:.2} below threshold — retry in better lighting"),
        }),
        AttendanceOutcome::NotVerified { reason } => Ok(AttendReply::Rejected { reason }),
    }
}

/// One message per second into the engine, tagged with the session
/// generation. The engine drops messages whose generation no longer matches.
pub(crate) fn spawn_ticker(
    tx: mpsc::Sender<EngineRequest>,
    user: String,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first interval tick completes immediately; the countdown
        // starts one second after mount.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx
                .send(EngineRequest::QuizTick {
                    user: user.clone(),
                    generation,
                })
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use invigil_checkpoint::Detection;
    use invigil_core::{Still, VerificationDecision};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("invigil-engine-test-{}", uuid::Uuid::new_v4()))
    }

    fn sample_still() -> Still {
        Still {
            jpeg: vec![0xff, 0xd8, 0xff, 0xd9],
            width: 640,
            height: 360,
        }
    }

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                prompt: format!("question {i}"),
                choices: vec!["a".into(), "b".into()],
            })
            .collect()
    }

    struct MockStills {
        calls: Arc<AtomicUsize>,
    }

    impl StillSource for MockStills {
        fn snapshot(&mut self) -> Result<Still, CameraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample_still())
        }
    }

    #[derive(Clone)]
    struct MockCheckpoint {
        face_count: u32,
        decision: VerificationDecision,
        verify_delay: Duration,
        detect_calls: Arc<AtomicUsize>,
        verify_calls: Arc<AtomicUsize>,
        behavior_calls: Arc<AtomicUsize>,
    }

    impl MockCheckpoint {
        fn new(face_count: u32, decision: VerificationDecision) -> Self {
            Self {
                face_count,
                decision,
                verify_delay: Duration::ZERO,
                detect_calls: Arc::new(AtomicUsize::new(0)),
                verify_calls: Arc::new(AtomicUsize::new(0)),
                behavior_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_verify_delay(mut self, delay: Duration) -> Self {
            self.verify_delay = delay;
            self
        }
    }

    fn decision(face_count: u32, is_verified: bool, confidence: f32) -> VerificationDecision {
        VerificationDecision {
            face_count,
            is_verified,
            confidence,
            reason: "mock reason".into(),
        }
    }

    impl Checkpoint for MockCheckpoint {
        async fn detect(&self, _still: &Still) -> Result<Detection, CheckpointError> {
            self.detect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Detection {
                face_count: self.face_count,
                reason: if self.face_count == 1 {
                    "ok".into()
                } else {
                    "face count must be exactly one".into()
                },
            })
        }

        async fn verify(
            &self,
            _probe: &Still,
            _references: &[Vec<u8>],
        ) -> Result<VerificationDecision, CheckpointError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if !self.verify_delay.is_zero() {
                tokio::time::sleep(self.verify_delay).await;
            }
            Ok(self.decision.clone().normalize())
        }

        async fn scan_classroom(
            &self,
            _photo: &Still,
            roster: &[RosterEntry],
        ) -> Result<Vec<String>, CheckpointError> {
            Ok(roster.iter().map(|r| r.id.clone()).collect())
        }

        async fn analyze_behavior(
            &self,
            report: &BehaviorReport,
        ) -> Result<BehaviorAnalysis, CheckpointError> {
            self.behavior_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BehaviorAnalysis {
                is_suspicious: report.tab_switch_count > 5,
                suspicious_reasons: vec![],
                recommendation: "none".into(),
            })
        }

        async fn feedback_questions(&self, subject: &str) -> Result<Vec<String>, CheckpointError> {
            Ok((0..5).map(|i| format!("{subject} question {i}")).collect())
        }
    }

    async fn engine_with(
        checkpoint: MockCheckpoint,
    ) -> (EngineHandle, Store, Arc<AtomicUsize>) {
        let store = Store::open_in_memory(temp_dir()).await.unwrap();
        let camera_calls = Arc::new(AtomicUsize::new(0));
        let stills = MockStills {
            calls: camera_calls.clone(),
        };
        let handle = spawn_engine(store.clone(), checkpoint, stills, 0.8);
        (handle, store, camera_calls)
    }

    async fn enroll_directly(store: &Store, user: &str) {
        store
            .save_enrollment(user, vec![sample_still(), sample_still(), sample_still()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enrollment_full_flow_persists_record() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let (handle, store, _) = engine_with(cp).await;

        let started = handle.enroll_start("alice".into()).await.unwrap();
        assert_eq!(started.step, 0);
        assert!(!started.already_enrolled);

        for step in 0..StepKind::COUNT {
            let outcome = handle.enroll_capture("alice".into()).await.unwrap();
            let complete = step + 1 == StepKind::COUNT;
            assert_eq!(
                outcome,
                CaptureOutcome::Accepted { step, complete }
            );
            if !complete {
                handle.enroll_advance("alice".into()).await.unwrap();
            }
        }

        let record = handle.enroll_save("alice".into()).await.unwrap();
        assert_eq!(record.image_refs.len(), StepKind::COUNT);
        assert!(store.load_enrollment("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_multi_face_capture_does_not_advance() {
        let cp = MockCheckpoint::new(2, decision(2, false, 0.0));
        let (handle, store, _) = engine_with(cp).await;

        handle.enroll_start("bob".into()).await.unwrap();
        let outcome = handle.enroll_capture("bob".into()).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Rejected { .. }));

        // Nothing accepted, so saving is impossible and nothing persists.
        let err = handle.enroll_save("bob".into()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Enrollment(EnrollmentError::NotComplete)
        ));
        assert!(store.load_enrollment("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restarting_enrollment_requires_full_fresh_capture() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let (handle, store, _) = engine_with(cp).await;
        enroll_directly(&store, "carol").await;

        let started = handle.enroll_start("carol".into()).await.unwrap();
        assert!(started.already_enrolled);
        assert_eq!(started.existing_refs.len(), StepKind::COUNT);
        // Existing images are display-only: the sequence restarts at step 0.
        assert_eq!(started.step, 0);
    }

    #[tokio::test]
    async fn test_attend_accepts_and_persists() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.95));
        let (handle, store, _) = engine_with(cp).await;
        enroll_directly(&store, "dave").await;

        let reply = handle
            .attend("dave".into(), AttendanceScope::Daily)
            .await
            .unwrap();
        match reply {
            AttendReply::Marked { event } => {
                assert!(event.present);
                assert!((event.confidence - 0.95).abs() < 1e-6);
                assert!(store
                    .attendance_exists("dave", &event.session_key)
                    .await
                    .unwrap());
            }
            AttendReply::Rejected { reason } => panic!("unexpected rejection: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_attend_low_confidence_rejected_without_persisting() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.5));
        let (handle, store, _) = engine_with(cp).await;
        enroll_directly(&store, "erin").await;

        let reply = handle
            .attend("erin".into(), AttendanceScope::Daily)
            .await
            .unwrap();
        match reply {
            AttendReply::Rejected { reason } => {
                assert!(reason.contains("below threshold"), "got: {reason}");
            }
            AttendReply::Marked { .. } => panic!("low confidence must not mark"),
        }
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(!store.attendance_exists("erin", &today).await.unwrap());
    }

    #[tokio::test]
    async fn test_attend_not_verified_uses_service_reason_verbatim() {
        let cp = MockCheckpoint::new(1, decision(1, false, 0.9));
        let (handle, store, _) = engine_with(cp).await;
        enroll_directly(&store, "frank").await;

        let reply = handle
            .attend("frank".into(), AttendanceScope::Daily)
            .await
            .unwrap();
        assert!(matches!(
            reply,
            AttendReply::Rejected { reason } if reason == "mock reason"
        ));
    }

    #[tokio::test]
    async fn test_attend_without_enrollment_blocked_before_camera() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.95));
        let verify_calls = cp.verify_calls.clone();
        let (handle, _, camera_calls) = engine_with(cp).await;

        let err = handle
            .attend("ghost".into(), AttendanceScope::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotEnrolled));
        assert_eq!(camera_calls.load(Ordering::SeqCst), 0);
        assert_eq!(verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attend_duplicate_day_disabled_without_camera() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.95));
        let verify_calls = cp.verify_calls.clone();
        let (handle, store, camera_calls) = engine_with(cp).await;
        enroll_directly(&store, "tina").await;

        let today = Utc::now().date_naive();
        store
            .insert_attendance(&AttendanceEvent::daily("tina", today, 0.9))
            .await
            .unwrap();

        let err = handle
            .attend("tina".into(), AttendanceScope::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyMarked(_)));
        assert_eq!(camera_calls.load(Ordering::SeqCst), 0);
        assert_eq!(verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_quiz_manual_submit_tears_down_session() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let behavior_calls = cp.behavior_calls.clone();
        let (handle, _, _) = engine_with(cp).await;

        handle
            .quiz_start("sam".into(), "quiz-7".into(), questions(3), 600)
            .await
            .unwrap();
        handle.quiz_answer("sam".into(), 0, 1).await.unwrap();
        assert_eq!(handle.quiz_hidden("sam".into()).await.unwrap(), 1);

        let submitted = handle.quiz_submit("sam".into()).await.unwrap();
        assert!(!submitted.submission.auto);
        assert_eq!(submitted.submission.answers[0], Some(1));
        assert_eq!(submitted.submission.tab_switches, 1);
        assert!(submitted.analysis.is_some());
        assert_eq!(behavior_calls.load(Ordering::SeqCst), 1);

        // Submission is terminal.
        let err = handle.quiz_submit("sam".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSession));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiz_countdown_auto_submits_once() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let behavior_calls = cp.behavior_calls.clone();
        let (handle, _, _) = engine_with(cp).await;

        handle
            .quiz_start("pat".into(), "quiz-1".into(), questions(1), 3)
            .await
            .unwrap();

        // Let the paused clock run well past expiry.
        tokio::time::sleep(Duration::from_secs(10)).await;

        let err = handle.quiz_status("pat".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSession));
        assert_eq!(behavior_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_runs_during_slow_verification() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.95))
            .with_verify_delay(Duration::from_secs(30));
        let (handle, store, _) = engine_with(cp).await;
        enroll_directly(&store, "kim").await;

        handle
            .quiz_start("kim".into(), "quiz-9".into(), questions(1), 3)
            .await
            .unwrap();

        // Attendance verification takes 30s; the 3s countdown must expire
        // on schedule while that call is in flight.
        let attend_handle = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.attend("kim".into(), AttendanceScope::Daily).await })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        let err = handle.quiz_status("kim".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSession));

        let reply = attend_handle.await.unwrap().unwrap();
        assert!(matches!(reply, AttendReply::Marked { .. }));
    }

    #[tokio::test]
    async fn test_stale_generation_tick_is_inert() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let (handle, _, _) = engine_with(cp).await;

        handle
            .quiz_start("lee".into(), "quiz-2".into(), questions(1), 100)
            .await
            .unwrap();

        // A tick from a superseded session generation must not decrement.
        handle
            .tx
            .send(EngineRequest::QuizTick {
                user: "lee".into(),
                generation: 0,
            })
            .await
            .unwrap();

        let status = handle.quiz_status("lee".into()).await.unwrap();
        assert_eq!(status.remaining_secs, 100);
    }

    #[tokio::test]
    async fn test_scan_classroom_empty_roster_skips_camera() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let (handle, _, camera_calls) = engine_with(cp).await;

        let ids = handle.scan_classroom(vec![]).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(camera_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_feedback_questions_pass_through() {
        let cp = MockCheckpoint::new(1, decision(1, true, 0.9));
        let (handle, _, _) = engine_with(cp).await;
        let qs = handle.feedback_questions("Physics".into()).await.unwrap();
        assert_eq!(qs.len(), 5);
        assert!(qs[0].contains("Physics"));
    }
}
