use crate::models::Question;

/// Pure grading step: a submission is correct when the chosen label matches
/// the stored correct label exactly.
pub fn grade(question: &Question, chosen: &str) -> bool {
    question.correct_choice == chosen
}
