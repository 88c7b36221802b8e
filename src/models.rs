use serde::{Deserialize, Serialize};

/// Correct answers needed before a question counts as mastered.
pub const MASTERY_THRESHOLD: i64 = 4;

/// Minimum session percentage that counts as a pass.
pub const PASS_PERCENTAGE: f64 = 70.0;

/// Letters assigned to choices in order.
pub const CHOICE_LETTERS: &str = "ABCDEFGHIJ";

// Exam content domains (CLF-C02)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "Cloud Concepts")]
    CloudConcepts,
    #[serde(rename = "Security and Compliance")]
    SecurityAndCompliance,
    #[serde(rename = "Technology and Services")]
    TechnologyAndServices,
    #[serde(rename = "Billing and Pricing")]
    BillingAndPricing,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::CloudConcepts,
        Domain::SecurityAndCompliance,
        Domain::TechnologyAndServices,
        Domain::BillingAndPricing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::CloudConcepts => "Cloud Concepts",
            Domain::SecurityAndCompliance => "Security and Compliance",
            Domain::TechnologyAndServices => "Technology and Services",
            Domain::BillingAndPricing => "Billing and Pricing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cloud concepts" | "cloud" => Some(Domain::CloudConcepts),
            "security and compliance" | "security" => Some(Domain::SecurityAndCompliance),
            "technology and services" | "technology" => Some(Domain::TechnologyAndServices),
            "billing and pricing" | "billing" => Some(Domain::BillingAndPricing),
            _ => None,
        }
    }
}

/// A single answer option with its display letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub text: String,
}

/// A stored question with its mastery counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub domain: Domain,
    pub text: String,
    pub choices: Vec<Choice>,
    pub correct_choice: String,
    pub explanation: String,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub mastered: bool,
    pub last_answered: Option<String>,
}

impl Question {
    pub fn has_choice(&self, label: &str) -> bool {
        self.choices.iter().any(|c| c.label == label)
    }

    // Net-missed: answered wrong more often than right.
    pub fn is_missed(&self) -> bool {
        self.incorrect_count > self.correct_count
    }
}

/// Input schema for imported questions. Labels are assigned on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    pub domain: Domain,
    pub text: String,
    pub choices: Vec<String>,
    pub answer: usize,
    #[serde(default)]
    pub explanation: String,
}

/// What a client is allowed to see before answering.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub domain: Domain,
    pub text: String,
    pub choices: Vec<Choice>,
    /// 1-based position within the session.
    pub position: usize,
    pub total: usize,
}

impl QuestionView {
    pub fn new(question: &Question, position: usize, total: usize) -> Self {
        Self {
            id: question.id,
            domain: question.domain,
            text: question.text.clone(),
            choices: question.choices.clone(),
            position,
            total,
        }
    }
}

/// Per-question result kept in the session for the review view.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    pub question_id: i64,
    pub domain: Domain,
    pub chosen: String,
    pub correct_choice: String,
    pub was_correct: bool,
}

/// Mastery counters echoed back after an answer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MasteryInfo {
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub mastered: bool,
}

impl From<&Question> for MasteryInfo {
    fn from(question: &Question) -> Self {
        Self {
            correct_count: question.correct_count,
            incorrect_count: question.incorrect_count,
            mastered: question.mastered,
        }
    }
}

/// Response to a graded answer.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_choice: String,
    pub explanation: String,
    pub mastery: MasteryInfo,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainScore {
    pub domain: Domain,
    pub correct: usize,
    pub total: usize,
}

/// Final results for a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub percentage: f64,
    pub passed: bool,
    pub domain_scores: Vec<DomainScore>,
    pub answers: Vec<AnswerRecord>,
}

impl Summary {
    pub fn from_answers(answers: Vec<AnswerRecord>) -> Self {
        let total = answers.len();
        let correct = answers.iter().filter(|a| a.was_correct).count();
        let percentage = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64 * 100.0
        };

        let mut domain_scores: Vec<DomainScore> = Vec::new();
        for answer in &answers {
            match domain_scores.iter_mut().find(|d| d.domain == answer.domain) {
                Some(entry) => {
                    entry.total += 1;
                    if answer.was_correct {
                        entry.correct += 1;
                    }
                }
                None => domain_scores.push(DomainScore {
                    domain: answer.domain,
                    correct: usize::from(answer.was_correct),
                    total: 1,
                }),
            }
        }

        Self {
            total,
            correct,
            incorrect: total - correct,
            percentage,
            passed: percentage >= PASS_PERCENTAGE,
            domain_scores,
            answers,
        }
    }
}
