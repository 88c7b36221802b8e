use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{Choice, Domain, NewQuestion, Question, CHOICE_LETTERS, MASTERY_THRESHOLD};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                text TEXT NOT NULL,
                choices TEXT NOT NULL,
                correct_choice TEXT NOT NULL,
                explanation TEXT NOT NULL DEFAULT '',
                correct_count INTEGER NOT NULL DEFAULT 0,
                incorrect_count INTEGER NOT NULL DEFAULT 0,
                mastered INTEGER NOT NULL DEFAULT 0,
                last_answered TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_questions_domain ON questions(domain);
            CREATE INDEX IF NOT EXISTS idx_questions_mastered ON questions(mastered);
            "#,
        )?;

        Ok(())
    }

    // Question operations

    pub fn add_question(&self, new: &NewQuestion) -> Result<i64> {
        let (choices, correct_choice) = labelled_choices(new)?;
        let choices_json = serde_json::to_string(&choices)
            .map_err(|e| Error::InvalidQuestion(e.to_string()))?;

        self.conn.execute(
            r#"
            INSERT INTO questions (domain, text, choices, correct_choice, explanation)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                new.domain.as_str(),
                new.text,
                choices_json,
                correct_choice,
                new.explanation
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Bulk insert inside a single transaction; either every question lands
    /// or none do.
    pub fn import(&mut self, questions: &[NewQuestion]) -> Result<usize> {
        let tx = self.conn.transaction()?;

        for new in questions {
            let (choices, correct_choice) = labelled_choices(new)?;
            let choices_json = serde_json::to_string(&choices)
                .map_err(|e| Error::InvalidQuestion(e.to_string()))?;

            tx.execute(
                r#"
                INSERT INTO questions (domain, text, choices, correct_choice, explanation)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    new.domain.as_str(),
                    new.text,
                    choices_json,
                    correct_choice,
                    new.explanation
                ],
            )?;
        }

        tx.commit()?;
        Ok(questions.len())
    }

    pub fn get_question(&self, id: i64) -> Result<Question> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, domain, text, choices, correct_choice, explanation,
                   correct_count, incorrect_count, mastered, last_answered
            FROM questions
            WHERE id = ?1
            "#,
        )?;

        match stmt.query_row(params![id], row_to_question) {
            Ok(q) => Ok(q),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::QuestionNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// All questions matching the filter. `missed_only` restricts the pool to
    /// net-missed questions (more incorrect than correct answers).
    pub fn list_questions(
        &self,
        domain: Option<Domain>,
        missed_only: bool,
    ) -> Result<Vec<Question>> {
        let base = r#"
            SELECT id, domain, text, choices, correct_choice, explanation,
                   correct_count, incorrect_count, mastered, last_answered
            FROM questions
        "#;

        let mut clauses: Vec<&str> = Vec::new();
        if domain.is_some() {
            clauses.push("domain = ?1");
        }
        if missed_only {
            clauses.push("incorrect_count > correct_count");
        }

        let query = if clauses.is_empty() {
            format!("{} ORDER BY id", base)
        } else {
            format!("{} WHERE {} ORDER BY id", base, clauses.join(" AND "))
        };

        let mut stmt = self.conn.prepare(&query)?;
        let questions = if let Some(domain) = domain {
            let rows = stmt.query_map(params![domain.as_str()], row_to_question)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let rows = stmt.query_map([], row_to_question)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(questions)
    }

    /// Applies one graded answer: bumps exactly one counter, recomputes the
    /// mastered flag, and stamps the answer time. Counters only ever grow, so
    /// mastery is never revoked.
    pub fn record_answer(&self, id: i64, was_correct: bool) -> Result<Question> {
        let (correct_inc, incorrect_inc): (i64, i64) =
            if was_correct { (1, 0) } else { (0, 1) };
        let now = Utc::now().to_rfc3339();

        let updated = self.conn.execute(
            r#"
            UPDATE questions
            SET correct_count = correct_count + ?1,
                incorrect_count = incorrect_count + ?2,
                mastered = CASE WHEN correct_count + ?1 >= ?3 THEN 1 ELSE 0 END,
                last_answered = ?4
            WHERE id = ?5
            "#,
            params![correct_inc, incorrect_inc, MASTERY_THRESHOLD, now, id],
        )?;

        if updated == 0 {
            return Err(Error::QuestionNotFound(id));
        }

        self.get_question(id)
    }

    /// Question counts for the domains present in the store, busiest first.
    pub fn domain_counts(&self) -> Result<Vec<DomainCount>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT domain, COUNT(*) as count
            FROM questions
            GROUP BY domain
            ORDER BY count DESC, domain
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let domain: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((domain, count))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (domain_str, count) = row?;
            let domain = parse_domain(&domain_str, 0)?;
            counts.push(DomainCount { domain, count });
        }

        Ok(counts)
    }

    pub fn stats(&self) -> Result<Stats> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;

        let mastered: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM questions WHERE mastered = 1",
            [],
            |row| row.get(0),
        )?;

        // Answered at least once but not yet mastered.
        let needs_practice: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM questions
            WHERE mastered = 0 AND (correct_count > 0 OR incorrect_count > 0)
            "#,
            [],
            |row| row.get(0),
        )?;

        let missed: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM questions WHERE incorrect_count > correct_count",
            [],
            |row| row.get(0),
        )?;

        Ok(Stats {
            total,
            mastered,
            needs_practice,
            missed,
            domains: self.domain_counts()?,
        })
    }

    /// Resets every counter and mastery flag. Returns the number of rows
    /// touched.
    pub fn clear_progress(&self) -> Result<usize> {
        let rows = self.conn.execute(
            r#"
            UPDATE questions
            SET correct_count = 0, incorrect_count = 0, mastered = 0, last_answered = NULL
            "#,
            [],
        )?;
        Ok(rows)
    }
}

fn row_to_question(row: &Row) -> rusqlite::Result<Question> {
    let domain_str: String = row.get(1)?;
    let choices_json: String = row.get(3)?;
    let choices: Vec<Choice> = serde_json::from_str(&choices_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Question {
        id: row.get(0)?,
        domain: parse_domain(&domain_str, 1)?,
        text: row.get(2)?,
        choices,
        correct_choice: row.get(4)?,
        explanation: row.get(5)?,
        correct_count: row.get(6)?,
        incorrect_count: row.get(7)?,
        mastered: row.get::<_, i64>(8)? != 0,
        last_answered: row.get(9)?,
    })
}

fn parse_domain(s: &str, column: usize) -> rusqlite::Result<Domain> {
    Domain::from_str(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unknown domain '{}'", s).into(),
        )
    })
}

/// Validates an incoming question and assigns letter labels to its choices.
fn labelled_choices(new: &NewQuestion) -> Result<(Vec<Choice>, String)> {
    if new.text.trim().is_empty() {
        return Err(Error::InvalidQuestion("question text is empty".into()));
    }
    if new.choices.len() < 2 {
        return Err(Error::InvalidQuestion(
            "a question needs at least two choices".into(),
        ));
    }
    if new.choices.len() > CHOICE_LETTERS.len() {
        return Err(Error::InvalidQuestion(format!(
            "too many choices ({}, max {})",
            new.choices.len(),
            CHOICE_LETTERS.len()
        )));
    }
    if new.answer >= new.choices.len() {
        return Err(Error::InvalidQuestion(format!(
            "answer index {} is out of range for {} choices",
            new.answer,
            new.choices.len()
        )));
    }

    let choices: Vec<Choice> = new
        .choices
        .iter()
        .zip(CHOICE_LETTERS.chars())
        .map(|(text, letter)| Choice {
            label: letter.to_string(),
            text: text.clone(),
        })
        .collect();
    let correct_choice = choices[new.answer].label.clone();

    Ok((choices, correct_choice))
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainCount {
    pub domain: Domain,
    pub count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub total: i64,
    pub mastered: i64,
    pub needs_practice: i64,
    pub missed: i64,
    pub domains: Vec<DomainCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        db
    }

    fn sample(domain: Domain, text: &str) -> NewQuestion {
        NewQuestion {
            domain,
            text: text.to_string(),
            choices: vec![
                "First option".into(),
                "Second option".into(),
                "Third option".into(),
                "Fourth option".into(),
            ],
            answer: 1,
            explanation: "The second option is right.".into(),
        }
    }

    mod init_tests {
        use super::*;

        #[test]
        fn init_creates_questions_table() {
            let db = setup_db();
            let count: i64 = db
                .conn
                .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))
                .expect("questions table should exist");
            assert_eq!(count, 0);
        }

        #[test]
        fn init_is_idempotent() {
            let db = setup_db();
            db.add_question(&sample(Domain::CloudConcepts, "Q1")).unwrap();

            db.init().expect("Re-init should succeed");

            let questions = db.list_questions(None, false).unwrap();
            assert_eq!(questions.len(), 1);
        }
    }

    mod add_question_tests {
        use super::*;

        #[test]
        fn add_and_get_round_trip() {
            let db = setup_db();
            let id = db
                .add_question(&sample(Domain::BillingAndPricing, "What is the right option?"))
                .unwrap();
            assert!(id > 0);

            let q = db.get_question(id).unwrap();
            assert_eq!(q.domain, Domain::BillingAndPricing);
            assert_eq!(q.text, "What is the right option?");
            assert_eq!(q.explanation, "The second option is right.");
            assert_eq!(q.correct_count, 0);
            assert_eq!(q.incorrect_count, 0);
            assert!(!q.mastered);
            assert!(q.last_answered.is_none());
        }

        #[test]
        fn choices_get_letter_labels_in_order() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();

            let q = db.get_question(id).unwrap();
            let labels: Vec<&str> = q.choices.iter().map(|c| c.label.as_str()).collect();
            assert_eq!(labels, vec!["A", "B", "C", "D"]);
            assert_eq!(q.choices[0].text, "First option");
        }

        #[test]
        fn correct_choice_matches_answer_index() {
            let db = setup_db();
            let mut new = sample(Domain::CloudConcepts, "Q");
            new.answer = 2;
            let id = db.add_question(&new).unwrap();

            let q = db.get_question(id).unwrap();
            assert_eq!(q.correct_choice, "C");
            assert!(q.has_choice(&q.correct_choice));
        }

        #[test]
        fn rejects_empty_text() {
            let db = setup_db();
            let mut new = sample(Domain::CloudConcepts, "  ");
            new.text = "   ".into();
            let result = db.add_question(&new);
            assert!(matches!(result, Err(Error::InvalidQuestion(_))));
        }

        #[test]
        fn rejects_single_choice() {
            let db = setup_db();
            let mut new = sample(Domain::CloudConcepts, "Q");
            new.choices = vec!["Only option".into()];
            new.answer = 0;
            let result = db.add_question(&new);
            assert!(matches!(result, Err(Error::InvalidQuestion(_))));
        }

        #[test]
        fn rejects_answer_out_of_range() {
            let db = setup_db();
            let mut new = sample(Domain::CloudConcepts, "Q");
            new.answer = 4;
            let result = db.add_question(&new);
            assert!(matches!(result, Err(Error::InvalidQuestion(_))));
        }

        #[test]
        fn get_question_not_found() {
            let db = setup_db();
            let result = db.get_question(999);
            assert!(matches!(result, Err(Error::QuestionNotFound(999))));
        }
    }

    mod import_tests {
        use super::*;

        #[test]
        fn import_inserts_all_questions() {
            let mut db = setup_db();
            let batch = vec![
                sample(Domain::CloudConcepts, "Q1"),
                sample(Domain::BillingAndPricing, "Q2"),
                sample(Domain::SecurityAndCompliance, "Q3"),
            ];

            let inserted = db.import(&batch).unwrap();
            assert_eq!(inserted, 3);
            assert_eq!(db.list_questions(None, false).unwrap().len(), 3);
        }

        #[test]
        fn import_is_all_or_nothing() {
            let mut db = setup_db();
            let mut bad = sample(Domain::CloudConcepts, "Q2");
            bad.answer = 99;
            let batch = vec![sample(Domain::CloudConcepts, "Q1"), bad];

            let result = db.import(&batch);
            assert!(result.is_err());
            assert!(db.list_questions(None, false).unwrap().is_empty());
        }
    }

    mod list_tests {
        use super::*;

        #[test]
        fn list_empty_store() {
            let db = setup_db();
            assert!(db.list_questions(None, false).unwrap().is_empty());
        }

        #[test]
        fn list_filters_by_domain() {
            let db = setup_db();
            db.add_question(&sample(Domain::CloudConcepts, "Q1")).unwrap();
            db.add_question(&sample(Domain::CloudConcepts, "Q2")).unwrap();
            db.add_question(&sample(Domain::BillingAndPricing, "Q3")).unwrap();

            let cloud = db.list_questions(Some(Domain::CloudConcepts), false).unwrap();
            assert_eq!(cloud.len(), 2);
            assert!(cloud.iter().all(|q| q.domain == Domain::CloudConcepts));

            let tech = db
                .list_questions(Some(Domain::TechnologyAndServices), false)
                .unwrap();
            assert!(tech.is_empty());
        }

        #[test]
        fn missed_only_requires_net_incorrect() {
            let db = setup_db();
            let never = db.add_question(&sample(Domain::CloudConcepts, "Never answered")).unwrap();
            let even = db.add_question(&sample(Domain::CloudConcepts, "Even record")).unwrap();
            let missed = db.add_question(&sample(Domain::CloudConcepts, "Net missed")).unwrap();

            db.record_answer(even, true).unwrap();
            db.record_answer(even, false).unwrap();
            db.record_answer(missed, false).unwrap();

            let pool = db.list_questions(None, true).unwrap();
            assert_eq!(pool.len(), 1);
            assert_eq!(pool[0].id, missed);
            assert!(!pool.iter().any(|q| q.id == never || q.id == even));
        }

        #[test]
        fn missed_only_combines_with_domain_filter() {
            let db = setup_db();
            let cloud = db.add_question(&sample(Domain::CloudConcepts, "Q1")).unwrap();
            let billing = db.add_question(&sample(Domain::BillingAndPricing, "Q2")).unwrap();
            db.record_answer(cloud, false).unwrap();
            db.record_answer(billing, false).unwrap();

            let pool = db.list_questions(Some(Domain::CloudConcepts), true).unwrap();
            assert_eq!(pool.len(), 1);
            assert_eq!(pool[0].id, cloud);
        }
    }

    mod record_answer_tests {
        use super::*;

        #[test]
        fn correct_answer_bumps_correct_count() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();

            let q = db.record_answer(id, true).unwrap();
            assert_eq!(q.correct_count, 1);
            assert_eq!(q.incorrect_count, 0);
            assert!(!q.mastered);
            assert!(q.last_answered.is_some());
        }

        #[test]
        fn incorrect_answer_bumps_incorrect_count() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();

            let q = db.record_answer(id, false).unwrap();
            assert_eq!(q.correct_count, 0);
            assert_eq!(q.incorrect_count, 1);
            assert!(!q.mastered);
        }

        #[test]
        fn mastered_at_four_correct_answers() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();

            for _ in 0..3 {
                let q = db.record_answer(id, true).unwrap();
                assert!(!q.mastered);
            }

            let q = db.record_answer(id, true).unwrap();
            assert_eq!(q.correct_count, 4);
            assert!(q.mastered);
        }

        #[test]
        fn mastery_is_never_revoked() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();

            for _ in 0..4 {
                db.record_answer(id, true).unwrap();
            }
            let q = db.record_answer(id, false).unwrap();
            assert!(q.mastered);
            assert_eq!(q.correct_count, 4);
            assert_eq!(q.incorrect_count, 1);
        }

        #[test]
        fn counters_never_decrease() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();

            let (mut last_correct, mut last_incorrect) = (0, 0);
            for i in 0..10 {
                let q = db.record_answer(id, i % 3 == 0).unwrap();
                assert!(q.correct_count >= last_correct);
                assert!(q.incorrect_count >= last_incorrect);
                assert_eq!(q.mastered, q.correct_count >= MASTERY_THRESHOLD);
                last_correct = q.correct_count;
                last_incorrect = q.incorrect_count;
            }
        }

        #[test]
        fn unknown_question_is_not_found() {
            let db = setup_db();
            let result = db.record_answer(123, true);
            assert!(matches!(result, Err(Error::QuestionNotFound(123))));
        }
    }

    mod stats_tests {
        use super::*;

        #[test]
        fn stats_on_empty_store() {
            let db = setup_db();
            let stats = db.stats().unwrap();
            assert_eq!(stats.total, 0);
            assert_eq!(stats.mastered, 0);
            assert_eq!(stats.needs_practice, 0);
            assert_eq!(stats.missed, 0);
            assert!(stats.domains.is_empty());
        }

        #[test]
        fn stats_count_mastery_states() {
            let db = setup_db();
            let untouched = db.add_question(&sample(Domain::CloudConcepts, "Q1")).unwrap();
            let practicing = db.add_question(&sample(Domain::CloudConcepts, "Q2")).unwrap();
            let missed = db.add_question(&sample(Domain::BillingAndPricing, "Q3")).unwrap();
            let mastered = db.add_question(&sample(Domain::BillingAndPricing, "Q4")).unwrap();

            db.record_answer(practicing, true).unwrap();
            db.record_answer(missed, false).unwrap();
            for _ in 0..4 {
                db.record_answer(mastered, true).unwrap();
            }

            let stats = db.stats().unwrap();
            assert_eq!(stats.total, 4);
            assert_eq!(stats.mastered, 1);
            assert_eq!(stats.needs_practice, 2); // practicing + missed
            assert_eq!(stats.missed, 1);
            let _ = untouched;
        }

        #[test]
        fn domain_counts_order_busiest_first() {
            let db = setup_db();
            db.add_question(&sample(Domain::CloudConcepts, "Q1")).unwrap();
            db.add_question(&sample(Domain::BillingAndPricing, "Q2")).unwrap();
            db.add_question(&sample(Domain::BillingAndPricing, "Q3")).unwrap();

            let counts = db.domain_counts().unwrap();
            assert_eq!(counts.len(), 2);
            assert_eq!(counts[0].domain, Domain::BillingAndPricing);
            assert_eq!(counts[0].count, 2);
            assert_eq!(counts[1].domain, Domain::CloudConcepts);
            assert_eq!(counts[1].count, 1);
        }
    }

    mod clear_progress_tests {
        use super::*;

        #[test]
        fn clear_resets_counters_and_mastery() {
            let db = setup_db();
            let id = db.add_question(&sample(Domain::CloudConcepts, "Q")).unwrap();
            for _ in 0..4 {
                db.record_answer(id, true).unwrap();
            }
            db.record_answer(id, false).unwrap();

            let rows = db.clear_progress().unwrap();
            assert_eq!(rows, 1);

            let q = db.get_question(id).unwrap();
            assert_eq!(q.correct_count, 0);
            assert_eq!(q.incorrect_count, 0);
            assert!(!q.mastered);
            assert!(q.last_answered.is_none());
        }

        #[test]
        fn clear_keeps_the_questions() {
            let db = setup_db();
            db.add_question(&sample(Domain::CloudConcepts, "Q1")).unwrap();
            db.add_question(&sample(Domain::CloudConcepts, "Q2")).unwrap();

            db.clear_progress().unwrap();
            assert_eq!(db.list_questions(None, false).unwrap().len(), 2);
        }
    }
}
