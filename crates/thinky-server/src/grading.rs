//! Quiz grading.
//!
//! A pure function over a reviewer's stored questions and a submitted answer
//! map. Multiple choice is an exact index match, with the stored answer
//! coerced from numeric strings (admin tools were loose about "1" vs 1);
//! free-text answers earn full credit whenever non-empty. The breakdown
//! carries per-question correctness and points but never the correct answers
//! themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use thinky_store::{QuestionKind, ReviewerQuestion};

/// Submitted quiz: question index → answer, in whatever JSON shape the quiz
/// UI produced.
#[derive(Debug, Deserialize)]
pub struct GradeRequest {
    pub reviewer_id: String,
    #[serde(default)]
    pub answers: BTreeMap<u32, Value>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct QuestionResult {
    pub question_index: u32,
    pub correct: bool,
    pub earned_points: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ScoreBreakdown {
    pub total_points: u32,
    pub earned_points: u32,
    pub percentage: f64,
    pub results: Vec<QuestionResult>,
}

/// Grade a submission against the reviewer's questions.
///
/// An unanswered question is simply incorrect; it never fails the request.
pub fn grade(questions: &[ReviewerQuestion], answers: &BTreeMap<u32, Value>) -> ScoreBreakdown {
    let mut total_points = 0u32;
    let mut earned_points = 0u32;
    let mut results = Vec::with_capacity(questions.len());

    for question in questions {
        total_points += question.points;

        let correct = answers
            .get(&question.question_index)
            .is_some_and(|answer| answer_is_correct(question, answer));
        let earned = if correct { question.points } else { 0 };
        earned_points += earned;

        results.push(QuestionResult {
            question_index: question.question_index,
            correct,
            earned_points: earned,
        });
    }

    let percentage = if total_points == 0 {
        0.0
    } else {
        f64::from(earned_points) / f64::from(total_points) * 100.0
    };

    ScoreBreakdown {
        total_points,
        earned_points,
        percentage,
        results,
    }
}

fn answer_is_correct(question: &ReviewerQuestion, answer: &Value) -> bool {
    match question.kind {
        QuestionKind::MultipleChoice => {
            let Some(expected) = stored_index(&question.correct_answer) else {
                return false;
            };
            submitted_index(answer) == Some(expected)
        }
        // Free text is participation credit: any non-blank answer counts.
        QuestionKind::Text => match answer {
            Value::String(s) => !s.trim().is_empty(),
            Value::Null => false,
            other => !other.to_string().trim().is_empty(),
        },
    }
}

fn stored_index(stored: &str) -> Option<i64> {
    stored.trim().parse::<i64>().ok()
}

fn submitted_index(answer: &Value) -> Option<i64> {
    match answer {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
