//! Quiz scoring.
//!
//! Pure functions only: the caller loads the questions, runs
//! [`check_submission`] and then [`score`].

use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::models::QuizQuestion;

/// Inclusive pass mark, in percent.
pub const PASS_THRESHOLD: f64 = 70.0;
pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuizVerdict {
    pub score: f64,
    pub passed: bool,
}

impl QuizVerdict {
    pub fn from_score(score: f64) -> Self {
        Self {
            score,
            passed: score >= PASS_THRESHOLD,
        }
    }
}

/// Rejects a submission that cannot be scored: no questions, a length
/// mismatch, an unanswered question or an option index out of range.
/// Returns the answers with the "unanswered" sentinel stripped.
pub fn check_submission(questions: &[QuizQuestion], answers: &[Option<u8>]) -> CoreResult<Vec<u8>> {
    if questions.is_empty() {
        return Err(CoreError::validation("quiz has no questions"));
    }
    if answers.len() != questions.len() {
        return Err(CoreError::validation(format!(
            "expected {} answers, got {}",
            questions.len(),
            answers.len()
        )));
    }
    let unanswered = answers.iter().filter(|a| a.is_none()).count();
    if unanswered > 0 {
        return Err(CoreError::validation(format!(
            "{unanswered} question(s) left unanswered"
        )));
    }
    let answers: Vec<u8> = answers.iter().flatten().copied().collect();
    if let Some((i, a)) = answers
        .iter()
        .enumerate()
        .find(|(_, a)| usize::from(**a) >= OPTIONS_PER_QUESTION)
    {
        return Err(CoreError::validation(format!(
            "answer {a} to question {} is not an option",
            i + 1
        )));
    }
    Ok(answers)
}

/// Percentage of correct answers. Expects input that passed
/// [`check_submission`].
pub fn score(questions: &[QuizQuestion], answers: &[u8]) -> CoreResult<QuizVerdict> {
    if questions.is_empty() {
        return Err(CoreError::validation("quiz has no questions"));
    }
    if answers.len() != questions.len() {
        return Err(CoreError::validation("answer count does not match question count"));
    }
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| q.correct_index == **a)
        .count();
    let pct = correct as f64 / questions.len() as f64 * 100.0;
    Ok(QuizVerdict::from_score(pct))
}

/// Shape check for externally generated quiz content.
pub fn validate_questions(questions: &[QuizQuestion]) -> CoreResult<()> {
    if questions.is_empty() {
        return Err(CoreError::validation("generated quiz is empty"));
    }
    for (i, q) in questions.iter().enumerate() {
        if q.options.len() != OPTIONS_PER_QUESTION {
            return Err(CoreError::validation(format!(
                "question {} has {} options, expected {OPTIONS_PER_QUESTION}",
                i + 1,
                q.options.len()
            )));
        }
        if usize::from(q.correct_index) >= q.options.len() {
            return Err(CoreError::validation(format!(
                "question {} marks a missing option as correct",
                i + 1
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::questions;

    fn answers_with_correct(key: &[u8], n_correct: usize) -> Vec<u8> {
        key.iter()
            .enumerate()
            .map(|(i, c)| if i < n_correct { *c } else { (c + 1) % 4 })
            .collect()
    }

    #[test]
    fn seven_of_ten_passes_on_the_threshold() {
        let key: [u8; 10] = [0, 1, 2, 3, 0, 1, 2, 3, 0, 1];
        let qs = questions(&key);
        let v = score(&qs, &answers_with_correct(&key, 7)).unwrap();
        assert_eq!(v.score, 70.0);
        assert!(v.passed);
        // same input, same verdict
        assert_eq!(v, score(&qs, &answers_with_correct(&key, 7)).unwrap());
    }

    #[test]
    fn below_threshold_fails() {
        let key = [0u8; 10];
        let qs = questions(&key);
        let v = score(&qs, &answers_with_correct(&key, 6)).unwrap();
        assert_eq!(v.score, 60.0);
        assert!(!v.passed);

        let key9 = [1u8; 9];
        let v = score(&questions(&key9), &answers_with_correct(&key9, 6)).unwrap();
        assert!((v.score - 66.666).abs() < 0.01);
        assert!(!v.passed);
    }

    #[test]
    fn empty_quiz_is_rejected() {
        let err = score(&[], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = check_submission(&[], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn unanswered_question_blocks_submission() {
        let qs = questions(&[0, 1, 2]);
        let err = check_submission(&qs, &[Some(0), None, Some(2)]).unwrap_err();
        assert_eq!(err.to_string(), "1 question(s) left unanswered");
    }

    #[test]
    fn length_mismatch_blocks_submission() {
        let qs = questions(&[0, 1, 2]);
        let err = check_submission(&qs, &[Some(0), Some(1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn out_of_range_option_blocks_submission() {
        let qs = questions(&[0, 1]);
        assert!(check_submission(&qs, &[Some(0), Some(4)]).is_err());
        assert_eq!(check_submission(&qs, &[Some(0), Some(3)]).unwrap(), vec![0, 3]);
    }

    #[test]
    fn generated_questions_need_four_options() {
        let mut qs = questions(&[0, 1]);
        assert!(validate_questions(&qs).is_ok());
        qs[1].options.pop();
        assert!(validate_questions(&qs).is_err());
        assert!(validate_questions(&[]).is_err());
    }
}
