use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    AnswerOutcome, AnswerRecord, Domain, MasteryInfo, QuestionView, Summary,
};
use crate::scoring;

pub type SessionId = u64;

/// Sessions idle for longer than this are pruned.
const SESSION_TTL_MINUTES: i64 = 60;

/// Parameters for starting a quiz. `count` of `None` means the whole
/// filtered pool.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct QuizOptions {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub missed_only: bool,
}

/// One user's progress through a selected question set.
///
/// A session that is not in the registry has not started (or has expired);
/// once `current_index` reaches the end of `question_ids` it is complete and
/// only `summary` and `discard` apply.
struct QuizSession {
    question_ids: Vec<i64>,
    current_index: usize,
    score: usize,
    answers: Vec<AnswerRecord>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl QuizSession {
    fn is_complete(&self) -> bool {
        self.current_index >= self.question_ids.len()
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_activity) > Duration::minutes(SESSION_TTL_MINUTES)
    }
}

#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: SessionId,
    pub total: usize,
    pub question: QuestionView,
}

/// Registry of live quiz sessions keyed by explicit session id. All question
/// data flows through the `Database` handle passed into each call; the
/// manager itself only owns the ephemeral state.
pub struct SessionManager {
    sessions: DashMap<SessionId, QuizSession>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Selects a shuffled question set matching the filters and registers a
    /// new session for it.
    pub fn start_session(&self, db: &Database, opts: &QuizOptions) -> Result<StartedSession> {
        self.prune_expired();

        let mut pool = db.list_questions(opts.domain, opts.missed_only)?;
        pool.shuffle(&mut rand::thread_rng());
        if let Some(count) = opts.count {
            pool.truncate(count);
        }
        if pool.is_empty() {
            return Err(Error::EmptyPool);
        }

        let total = pool.len();
        let question = QuestionView::new(&pool[0], 1, total);
        let now = Utc::now();
        let session = QuizSession {
            question_ids: pool.iter().map(|q| q.id).collect(),
            current_index: 0,
            score: 0,
            answers: Vec::with_capacity(total),
            started_at: now,
            last_activity: now,
        };

        let session_id = loop {
            let id: SessionId = rand::random();
            if id != 0 && !self.sessions.contains_key(&id) {
                break id;
            }
        };
        self.sessions.insert(session_id, session);
        log::debug!("started session {:016x} with {} questions", session_id, total);

        Ok(StartedSession { session_id, total, question })
    }

    /// The question at the session's cursor, without answer or explanation.
    pub fn current_question(&self, db: &Database, sid: SessionId) -> Result<QuestionView> {
        self.prune_expired();

        let mut session = self.sessions.get_mut(&sid).ok_or(Error::SessionNotStarted)?;
        session.last_activity = Utc::now();
        if session.is_complete() {
            return Err(Error::SessionComplete);
        }

        let id = session.question_ids[session.current_index];
        let question = db.get_question(id)?;
        Ok(QuestionView::new(
            &question,
            session.current_index + 1,
            session.question_ids.len(),
        ))
    }

    /// Grades one answer against the current question, persists the result,
    /// and advances the cursor. An invalid label leaves both the counters and
    /// the cursor untouched so the question can be re-shown.
    pub fn submit_answer(
        &self,
        db: &Database,
        sid: SessionId,
        chosen: &str,
    ) -> Result<AnswerOutcome> {
        self.prune_expired();

        let mut session = self.sessions.get_mut(&sid).ok_or(Error::SessionNotStarted)?;
        session.last_activity = Utc::now();
        if session.is_complete() {
            return Err(Error::SessionComplete);
        }

        let id = session.question_ids[session.current_index];
        let question = db.get_question(id)?;
        if !question.has_choice(chosen) {
            return Err(Error::InvalidChoice(chosen.to_string()));
        }

        let correct = scoring::grade(&question, chosen);
        let updated = db.record_answer(id, correct)?;

        session.answers.push(AnswerRecord {
            question_id: id,
            domain: question.domain,
            chosen: chosen.to_string(),
            correct_choice: question.correct_choice.clone(),
            was_correct: correct,
        });
        session.current_index += 1;
        if correct {
            session.score += 1;
        }

        Ok(AnswerOutcome {
            correct,
            correct_choice: updated.correct_choice.clone(),
            explanation: updated.explanation.clone(),
            mastery: MasteryInfo::from(&updated),
            completed: session.is_complete(),
        })
    }

    /// Final results. Only valid once every question has been answered; the
    /// session stays around for review until discarded or expired.
    pub fn summary(&self, sid: SessionId) -> Result<Summary> {
        self.prune_expired();

        let session = self.sessions.get(&sid).ok_or(Error::SessionNotStarted)?;
        if !session.is_complete() {
            return Err(Error::SessionInProgress);
        }

        let summary = Summary::from_answers(session.answers.clone());
        debug_assert_eq!(summary.correct, session.score);
        Ok(summary)
    }

    /// Drops a session (abandoned or finished). Returns whether it existed.
    pub fn discard(&self, sid: SessionId) -> bool {
        self.sessions.remove(&sid).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn prune_expired(&self) {
        let now = Utc::now();
        self.sessions.retain(|sid, session| {
            let keep = !session.expired(now);
            if !keep {
                log::debug!(
                    "expiring session {:016x} started at {}",
                    sid,
                    session.started_at
                );
            }
            keep
        });
    }
}
