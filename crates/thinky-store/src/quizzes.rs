//! Reviewer question storage.
//!
//! Questions are what the grading procedure consumes. The sanitized
//! [`QuestionView`] is the only shape handed to clients: options are
//! normalized to a plain string list and the correct answer is not a field,
//! so it cannot leak through serialization.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use thinky_shared::options;

use crate::database::Database;
use crate::error::Result;
use crate::models::{QuestionKind, ReviewerQuestion};

/// A question as served to quiz takers. No answer field, by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionView {
    pub reviewer_id: String,
    pub question_index: u32,
    pub kind: QuestionKind,
    pub prompt: String,
    pub options: Vec<String>,
    pub points: u32,
}

impl From<&ReviewerQuestion> for QuestionView {
    fn from(q: &ReviewerQuestion) -> Self {
        Self {
            reviewer_id: q.reviewer_id.clone(),
            question_index: q.question_index,
            kind: q.kind,
            prompt: q.prompt.clone(),
            options: options::normalize(&q.options),
            points: q.points,
        }
    }
}

impl Database {
    /// Insert or replace a question at `(reviewer_id, question_index)`.
    pub fn upsert_question(&self, question: &ReviewerQuestion) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO reviewer_questions
                 (reviewer_id, question_index, kind, prompt, options, correct_answer, points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                question.reviewer_id,
                question.question_index,
                question.kind.as_str(),
                question.prompt,
                serde_json::to_string(&question.options)?,
                question.correct_answer,
                question.points,
            ],
        )?;
        Ok(())
    }

    /// All questions for one reviewer, ordered by index. Grading-side only.
    pub fn questions_for_reviewer(&self, reviewer_id: &str) -> Result<Vec<ReviewerQuestion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT reviewer_id, question_index, kind, prompt, options, correct_answer, points
             FROM reviewer_questions
             WHERE reviewer_id = ?1
             ORDER BY question_index ASC",
        )?;

        let rows = stmt.query_map(params![reviewer_id], row_to_question)?;

        let mut questions = Vec::new();
        for row in rows {
            questions.push(row?);
        }
        Ok(questions)
    }

    /// The sanitized question list served to quiz takers.
    pub fn question_views(&self, reviewer_id: &str) -> Result<Vec<QuestionView>> {
        let questions = self.questions_for_reviewer(reviewer_id)?;
        Ok(questions.iter().map(QuestionView::from).collect())
    }
}

fn row_to_question(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewerQuestion> {
    let reviewer_id: String = row.get(0)?;
    let question_index: u32 = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let prompt: String = row.get(3)?;
    let options_json: String = row.get(4)?;
    let correct_answer: String = row.get(5)?;
    let points: u32 = row.get(6)?;

    let kind = QuestionKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown question kind: {kind_str}"),
            )),
        )
    })?;

    let options: serde_json::Value = serde_json::from_str(&options_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ReviewerQuestion {
        reviewer_id,
        question_index,
        kind,
        prompt,
        options,
        correct_answer,
        points,
    })
}
