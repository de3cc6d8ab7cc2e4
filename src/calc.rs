use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Default pass mark used when the workspace has no override.
pub const DEFAULT_PASSING_THRESHOLD: f64 = 35.0;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Letter grade for a percentage. Bands are inclusive on their lower bound
/// (exactly 95.0 is "A+"). Anything below 35, including negative input,
/// is "F"; NaN never reaches this function because subject marks are
/// validated at the boundary.
pub fn classify_grade(percentage: f64) -> &'static str {
    if percentage >= 95.0 {
        "A+"
    } else if percentage >= 85.0 {
        "A"
    } else if percentage >= 75.0 {
        "B+"
    } else if percentage >= 65.0 {
        "B"
    } else if percentage >= 55.0 {
        "C+"
    } else if percentage >= 45.0 {
        "C"
    } else if percentage >= 35.0 {
        "D"
    } else {
        "F"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLedger {
    pub total_fees: f64,
    pub paid_fees: f64,
    pub discount_fees: f64,
    pub bus_fees: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeDerived {
    pub pending_fees: f64,
    pub turnover: f64,
}

/// Re-derive the ledger outputs from scratch. Called after every field
/// mutation instead of maintaining running totals, so repeated calls on the
/// same inputs cannot drift.
pub fn derive_fees(ledger: &FeeLedger) -> FeeDerived {
    let pending =
        ledger.total_fees + ledger.bus_fees - ledger.paid_fees - ledger.discount_fees;
    let turnover = ledger.total_fees - ledger.discount_fees;
    FeeDerived {
        pending_fees: pending.max(0.0),
        turnover: turnover.max(0.0),
    }
}

/// Record a payment against the ledger. The caller stamps the payment date.
pub fn apply_payment(ledger: &mut FeeLedger, amount: f64) -> Result<FeeDerived, CalcError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CalcError::new(
            "validation_error",
            "payment amount must be a positive number",
        ));
    }
    ledger.paid_fees += amount;
    Ok(derive_fees(ledger))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMark {
    pub subject_name: String,
    pub max_marks: f64,
    pub obtained_marks: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    pub id: String,
    pub student_id: String,
    pub exam_type: String,
    pub exam_date: Option<String>,
    pub subjects: Vec<SubjectMark>,
    pub total_marks: f64,
    pub obtained_marks: f64,
    pub percentage: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallPerformance {
    pub total_marks: f64,
    pub obtained_marks: f64,
    pub percentage: f64,
    pub grade: String,
    pub result: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentExamHistory {
    pub student_id: String,
    pub exams: Vec<ExamRecord>,
    pub overall: OverallPerformance,
}

/// Sum (obtained, total) over a subject list. The stored per-exam totals are
/// redundant; the subject rows are authoritative whenever we recompute.
pub fn exam_totals(subjects: &[SubjectMark]) -> (f64, f64) {
    let mut obtained = 0.0;
    let mut total = 0.0;
    for s in subjects {
        obtained += s.obtained_marks;
        total += s.max_marks;
    }
    (obtained, total)
}

pub fn percentage_of(obtained: f64, total: f64) -> f64 {
    if total > 0.0 {
        100.0 * obtained / total
    } else {
        0.0
    }
}

/// Reject malformed subject marks before they are persisted. A mark above
/// the subject maximum is an error, never silently clamped.
pub fn validate_subject_marks(subjects: &[SubjectMark]) -> Result<(), CalcError> {
    if subjects.is_empty() {
        return Err(CalcError::new(
            "validation_error",
            "an exam record needs at least one subject mark",
        ));
    }
    for s in subjects {
        if s.subject_name.trim().is_empty() {
            return Err(CalcError::new(
                "validation_error",
                "subject name must not be empty",
            ));
        }
        if !s.max_marks.is_finite() || s.max_marks <= 0.0 {
            return Err(CalcError::new(
                "validation_error",
                format!("{}: max marks must be a positive number", s.subject_name),
            ));
        }
        if !s.obtained_marks.is_finite() || s.obtained_marks < 0.0 {
            return Err(CalcError::new(
                "validation_error",
                format!("{}: obtained marks must be >= 0", s.subject_name),
            ));
        }
        if s.obtained_marks > s.max_marks {
            return Err(CalcError::new(
                "validation_error",
                format!(
                    "{}: obtained marks {} exceed max marks {}",
                    s.subject_name, s.obtained_marks, s.max_marks
                ),
            ));
        }
    }
    Ok(())
}

/// Partition a flat exam list into per-student histories, preserving the
/// order of first appearance, and compute each student's overall result.
pub fn group_by_student(
    records: Vec<ExamRecord>,
    passing_threshold: f64,
) -> Vec<StudentExamHistory> {
    let mut order: Vec<String> = Vec::new();
    let mut by_student: HashMap<String, Vec<ExamRecord>> = HashMap::new();
    for rec in records {
        if !by_student.contains_key(&rec.student_id) {
            order.push(rec.student_id.clone());
        }
        by_student
            .entry(rec.student_id.clone())
            .or_default()
            .push(rec);
    }

    order
        .into_iter()
        .map(|student_id| {
            let exams = by_student.remove(&student_id).unwrap_or_default();
            let mut obtained = 0.0;
            let mut total = 0.0;
            for exam in &exams {
                let (o, t) = exam_totals(&exam.subjects);
                obtained += o;
                total += t;
            }
            let percentage = percentage_of(obtained, total);
            let result = if percentage >= passing_threshold {
                "PASS"
            } else {
                "FAIL"
            };
            StudentExamHistory {
                student_id,
                exams,
                overall: OverallPerformance {
                    total_marks: total,
                    obtained_marks: obtained,
                    percentage,
                    grade: classify_grade(percentage).to_string(),
                    result: result.to_string(),
                },
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCell {
    pub obtained_marks: f64,
    pub max_marks: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPivotRow {
    pub subject_name: String,
    /// One slot per exam, in exam order. None marks a subject the student
    /// did not sit in that exam, as opposed to a scored zero.
    pub per_exam: Vec<Option<SubjectCell>>,
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    pub grade: String,
}

/// Per-subject cross-exam pivot for report-card rendering. Subjects appear
/// in first-seen order across the student's exams.
pub fn subject_pivot(exams: &[ExamRecord]) -> Vec<SubjectPivotRow> {
    let mut subject_order: Vec<String> = Vec::new();
    for exam in exams {
        for s in &exam.subjects {
            if !subject_order.iter().any(|n| n == &s.subject_name) {
                subject_order.push(s.subject_name.clone());
            }
        }
    }

    subject_order
        .into_iter()
        .map(|name| {
            let mut per_exam: Vec<Option<SubjectCell>> = Vec::with_capacity(exams.len());
            let mut total_obtained = 0.0;
            let mut total_max = 0.0;
            for exam in exams {
                let cell = exam
                    .subjects
                    .iter()
                    .find(|s| s.subject_name == name)
                    .map(|s| {
                        total_obtained += s.obtained_marks;
                        total_max += s.max_marks;
                        SubjectCell {
                            obtained_marks: s.obtained_marks,
                            max_marks: s.max_marks,
                            grade: s.grade.clone(),
                        }
                    });
                per_exam.push(cell);
            }
            let percentage = percentage_of(total_obtained, total_max);
            SubjectPivotRow {
                subject_name: name,
                per_exam,
                total_obtained,
                total_max,
                percentage,
                grade: classify_grade(percentage).to_string(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRankEntry {
    pub student_id: String,
    pub percentage: f64,
    pub rank: usize,
}

/// Standard competition ranking: equal percentages share a rank and the
/// sequence resumes at (ranked so far + 1), i.e. 1,2,2,4 and never 1,2,2,3.
/// Ties are ordered by student id so output is deterministic.
pub fn rank_by_percentage(entries: &[(String, f64)]) -> Vec<ClassRankEntry> {
    let mut sorted: Vec<(String, f64)> = entries.to_vec();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut out: Vec<ClassRankEntry> = Vec::with_capacity(sorted.len());
    for (i, (student_id, percentage)) in sorted.into_iter().enumerate() {
        let rank = match out.last() {
            Some(prev) if prev.percentage == percentage => prev.rank,
            _ => i + 1,
        };
        out.push(ClassRankEntry {
            student_id,
            percentage,
            rank,
        });
    }
    out
}

/// Display status of an assignment for one student. Dates are ISO
/// `YYYY-MM-DD`, which compare correctly as strings.
pub fn homework_status(
    due_date: &str,
    today: &str,
    submission_status: Option<&str>,
) -> &'static str {
    match submission_status {
        Some("graded") => "graded",
        Some(_) => "submitted",
        None => {
            if due_date < today {
                "overdue"
            } else {
                "pending"
            }
        }
    }
}

/// Indian-numbering rupee display: last three digits, then groups of two.
/// Cosmetic only; amounts are rounded to whole rupees.
pub fn format_inr(amount: f64) -> String {
    let negative = amount < 0.0;
    let whole = amount.abs().round() as u64;
    let digits = whole.to_string();

    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, tail) = digits.split_at(digits.len() - 3);
        let head_bytes = head.as_bytes();
        let mut parts: Vec<String> = Vec::new();
        let mut i = head_bytes.len();
        while i > 2 {
            parts.push(String::from_utf8_lossy(&head_bytes[i - 2..i]).to_string());
            i -= 2;
        }
        parts.push(String::from_utf8_lossy(&head_bytes[..i]).to_string());
        parts.reverse();
        format!("{},{}", parts.join(","), tail)
    };

    if negative {
        format!("-₹{}", grouped)
    } else {
        format!("₹{}", grouped)
    }
}
