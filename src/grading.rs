//! Quiz scoring and course completion.
//!
//! Only multiple-choice questions are scored; short answers are for
//! self-assessment.

use crate::output::QuizItem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResult {
    /// Correctly answered MCQs.
    pub score: usize,
    /// Number of MCQs in the quiz.
    pub total: usize,
    /// `score * 100 / total`, or 100 for a quiz without MCQs.
    pub percentage: u32,
}

/// Score submitted answers (question id → chosen option index).
pub fn grade_quiz(quiz: &[QuizItem], answers: &HashMap<String, usize>) -> QuizResult {
    let mut score = 0;
    let mut total = 0;
    for mcq in quiz.iter().filter_map(QuizItem::as_mcq) {
        total += 1;
        if answers.get(&mcq.id) == Some(&mcq.correct_answer) {
            score += 1;
        }
    }
    let percentage = if total == 0 {
        100
    } else {
        (score * 100 / total) as u32
    };
    QuizResult {
        score,
        total,
        percentage,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub completed_lessons: Vec<Uuid>,
    pub total_lessons: usize,
    pub percentage: f64,
}

/// Progress through a course given all its lessons and the completed ones.
pub fn course_progress(lesson_ids: &[Uuid], completed: &[Uuid]) -> CourseProgress {
    let completed_lessons: Vec<Uuid> = completed
        .iter()
        .copied()
        .filter(|id| lesson_ids.contains(id))
        .collect();
    let percentage = if lesson_ids.is_empty() {
        0.0
    } else {
        completed_lessons.len() as f64 * 100.0 / lesson_ids.len() as f64
    };
    CourseProgress {
        completed_lessons,
        total_lessons: lesson_ids.len(),
        percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{McqQuestion, ShortAnswerQuestion};

    fn mcq(id: &str, correct: usize) -> QuizItem {
        QuizItem::Mcq(McqQuestion {
            id: id.into(),
            question: "Which one is right?".into(),
            options: vec!["A".into(), "B".into(), "C".into()],
            correct_answer: correct,
            difficulty: None,
            question_type: None,
            explanation: None,
        })
    }

    #[test]
    fn scores_only_mcqs() {
        let quiz = vec![
            mcq("q1", 0),
            mcq("q2", 2),
            mcq("q3", 1),
            QuizItem::ShortAnswer(ShortAnswerQuestion {
                id: "sa1".into(),
                question: "Explain.".into(),
                sample_answer: "Because.".into(),
            }),
        ];
        let answers = HashMap::from([
            ("q1".to_string(), 0),
            ("q2".to_string(), 1),
            ("sa1".to_string(), 0),
        ]);
        let r = grade_quiz(&quiz, &answers);
        assert_eq!((r.score, r.total, r.percentage), (1, 3, 33));
    }

    #[test]
    fn empty_quiz_is_full_marks() {
        let r = grade_quiz(&[], &HashMap::new());
        assert_eq!((r.score, r.total, r.percentage), (0, 0, 100));
    }

    #[test]
    fn progress_ignores_foreign_lessons() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let other = Uuid::new_v4();
        let p = course_progress(&[a, b], &[b, other]);
        assert_eq!(p.completed_lessons, vec![b]);
        assert_eq!(p.total_lessons, 2);
        assert!((p.percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(course_progress(&[], &[a]).percentage, 0.0);
    }
}
