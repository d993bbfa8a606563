use serde::{Deserialize, Serialize};
use serde_json::json;

/// Round to 2 decimals, half away from zero: `round(100*x) / 100`.
pub fn round_2_decimals(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let scaled = x * 100.0;
    if !scaled.is_finite() {
        // Beyond 2^53 an f64 has no fractional digits left to round.
        return x;
    }
    scaled.round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            _ => None,
        }
    }

    pub fn points(self) -> u32 {
        match self {
            Grade::A => 10,
            Grade::B => 8,
            Grade::C => 6,
            Grade::D => 4,
        }
    }
}

/// Upper-cases and trims a grade letter for storage and display.
pub fn normalize_grade(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradePolicy {
    /// Unknown letters count as 0 points.
    #[default]
    Lenient,
    Strict,
}

impl GradePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Some(GradePolicy::Lenient),
            "strict" => Some(GradePolicy::Strict),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradePolicy::Lenient => "lenient",
            GradePolicy::Strict => "strict",
        }
    }
}

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

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub name: String,
    pub score: f64,
    pub max: f64,
    pub grade: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRemark {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub final_grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student_id: String,
    pub term: i64,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub overall_grade: String,
    #[serde(default)]
    pub teacher_remark: TeacherRemark,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRatio {
    pub name: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub cgpa: f64,
    pub overall_percent: f64,
    pub subject_ratios: Vec<SubjectRatio>,
    pub subject_points: Vec<u32>,
}

fn grade_points_one(subject: &Subject, policy: GradePolicy) -> Result<u32, CalcError> {
    match Grade::parse(&subject.grade) {
        Some(g) => Ok(g.points()),
        None => match policy {
            GradePolicy::Lenient => Ok(0),
            GradePolicy::Strict => Err(CalcError::new(
                "unknown_grade",
                format!(
                    "subject '{}' has unknown grade '{}'",
                    subject.name, subject.grade
                ),
            )
            .with_details(json!({
                "subject": subject.name,
                "grade": subject.grade,
                "allowed": ["A", "B", "C", "D"],
            }))),
        },
    }
}

/// Grade points per subject, in input order.
pub fn compute_grade_points_with(
    subjects: &[Subject],
    policy: GradePolicy,
) -> Result<Vec<u32>, CalcError> {
    subjects
        .iter()
        .map(|s| grade_points_one(s, policy))
        .collect()
}

pub fn compute_grade_points(subjects: &[Subject]) -> Vec<u32> {
    subjects
        .iter()
        .map(|s| Grade::parse(&s.grade).map(Grade::points).unwrap_or(0))
        .collect()
}

fn cgpa_from_points(points: &[u32]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let total: u32 = points.iter().sum();
    round_2_decimals(f64::from(total) / points.len() as f64)
}

pub fn calculate_cgpa_with(subjects: &[Subject], policy: GradePolicy) -> Result<f64, CalcError> {
    let points = compute_grade_points_with(subjects, policy)?;
    Ok(cgpa_from_points(&points))
}

pub fn calculate_cgpa(subjects: &[Subject]) -> f64 {
    cgpa_from_points(&compute_grade_points(subjects))
}

pub fn calculate_overall_percentage(subjects: &[Subject]) -> f64 {
    if subjects.is_empty() {
        return 0.0;
    }
    let (total_score, total_max) = subjects
        .iter()
        .fold((0.0_f64, 0.0_f64), |(s, m), sub| (s + sub.score, m + sub.max));
    if total_max <= 0.0 || !total_max.is_finite() {
        return 0.0;
    }
    round_2_decimals(total_score / total_max * 100.0)
}

/// `score / max`, not clamped: a score above max yields a ratio above 1.
pub fn subject_ratio(subject: &Subject) -> f64 {
    if subject.max <= 0.0 || !subject.max.is_finite() {
        return 0.0;
    }
    let r = subject.score / subject.max;
    if r.is_finite() {
        r
    } else {
        0.0
    }
}

pub fn summarize_subjects(
    subjects: &[Subject],
    policy: GradePolicy,
) -> Result<ReportSummary, CalcError> {
    let cgpa = calculate_cgpa_with(subjects, policy)?;
    Ok(ReportSummary {
        cgpa,
        overall_percent: calculate_overall_percentage(subjects),
        subject_ratios: subjects
            .iter()
            .map(|s| SubjectRatio {
                name: s.name.clone(),
                ratio: subject_ratio(s),
            })
            .collect(),
        subject_points: compute_grade_points_with(subjects, policy)?,
    })
}

pub fn summarize_report_card(
    card: &ReportCard,
    policy: GradePolicy,
) -> Result<ReportSummary, CalcError> {
    summarize_subjects(&card.subjects, policy)
}

/// `present / (present + absent) * 100`, 0 when nothing is recorded.
pub fn attendance_percent(present: i64, absent: i64) -> f64 {
    if present < 0 || absent < 0 {
        return 0.0;
    }
    // Summed in f64: two large day counts must not overflow i64.
    let total = present as f64 + absent as f64;
    if total <= 0.0 {
        return 0.0;
    }
    round_2_decimals(present as f64 / total * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(name: &str, score: f64, max: f64, grade: &str) -> Subject {
        Subject {
            name: name.to_string(),
            score,
            max,
            grade: grade.to_string(),
            remark: String::new(),
        }
    }

    fn three_subjects() -> Vec<Subject> {
        vec![
            sub("Mathematics", 78.0, 100.0, "B"),
            sub("Arts", 82.0, 100.0, "A"),
            sub("History", 88.0, 100.0, "A"),
        ]
    }

    #[test]
    fn grade_table_is_fixed() {
        let subjects = vec![
            sub("a", 1.0, 1.0, "A"),
            sub("b", 1.0, 1.0, "b"),
            sub("c", 1.0, 1.0, " C "),
            sub("d", 1.0, 1.0, "d"),
        ];
        assert_eq!(compute_grade_points(&subjects), vec![10, 8, 6, 4]);
    }

    #[test]
    fn three_subject_scenario() {
        let subjects = three_subjects();
        assert_eq!(calculate_cgpa(&subjects), 9.33);
        assert_eq!(calculate_overall_percentage(&subjects), 82.67);
    }

    #[test]
    fn single_subject_scenario() {
        let subjects = vec![sub("Mathematics", 85.0, 100.0, "A")];
        assert_eq!(calculate_cgpa(&subjects), 10.0);
        assert_eq!(calculate_overall_percentage(&subjects), 85.0);
    }

    #[test]
    fn empty_subjects_resolve_to_zero() {
        assert_eq!(calculate_cgpa(&[]), 0.0);
        assert_eq!(calculate_overall_percentage(&[]), 0.0);
        let summary = summarize_subjects(&[], GradePolicy::Strict).expect("summary");
        assert_eq!(summary.cgpa, 0.0);
        assert_eq!(summary.overall_percent, 0.0);
        assert!(summary.subject_ratios.is_empty());
    }

    #[test]
    fn zero_max_never_yields_nan() {
        let subjects = vec![sub("Empty", 0.0, 0.0, "A")];
        assert_eq!(calculate_overall_percentage(&subjects), 0.0);
        assert_eq!(subject_ratio(&subjects[0]), 0.0);
    }

    #[test]
    fn huge_magnitudes_stay_finite() {
        let subjects = vec![sub("Huge", 1e306, 1.0, "A")];
        let pct = calculate_overall_percentage(&subjects);
        assert!(pct.is_finite() && pct > 1e307, "percent {}", pct);

        let overflowing = vec![sub("a", f64::MAX, 1.0, "A"), sub("b", f64::MAX, 1.0, "A")];
        assert_eq!(calculate_overall_percentage(&overflowing), 0.0);
        assert_eq!(subject_ratio(&sub("r", f64::MAX, 1e-300, "A")), 0.0);

        assert_eq!(round_2_decimals(1e307), 1e307);
        assert_eq!(round_2_decimals(f64::INFINITY), 0.0);
        assert_eq!(round_2_decimals(f64::NAN), 0.0);

        let summary = summarize_subjects(&subjects, GradePolicy::Strict).expect("summary");
        let json = serde_json::to_value(summary).expect("json");
        assert!(json["overallPercent"].is_f64());
    }

    #[test]
    fn percentage_of_valid_scores_stays_in_range() {
        let maxes = [1.0, 7.0, 20.0, 50.0, 100.0, 250.0];
        for n in 1..=5 {
            for step in 0..=10 {
                let subjects: Vec<Subject> = (0..n)
                    .map(|i| {
                        let max = maxes[(i + step) % maxes.len()];
                        let frac = ((step * 3 + i * 7) % 11) as f64 / 10.0;
                        sub("s", max * frac.min(1.0), max, "B")
                    })
                    .collect();
                let pct = calculate_overall_percentage(&subjects);
                assert!((0.0..=100.0).contains(&pct), "pct {} out of range", pct);
                for s in &subjects {
                    assert!((0.0..=1.0).contains(&subject_ratio(s)));
                }
            }
        }
        let full = vec![sub("m", 100.0, 100.0, "A"), sub("e", 37.5, 37.5, "A")];
        assert_eq!(calculate_overall_percentage(&full), 100.0);
    }

    #[test]
    fn unknown_grade_is_zero_points_when_lenient() {
        let subjects = vec![sub("x", 50.0, 100.0, "A"), sub("y", 50.0, 100.0, "E")];
        assert_eq!(compute_grade_points(&subjects), vec![10, 0]);
        assert_eq!(calculate_cgpa(&subjects), 5.0);
    }

    #[test]
    fn unknown_grade_is_rejected_when_strict() {
        let subjects = vec![sub("Science", 50.0, 100.0, "E")];
        let e = calculate_cgpa_with(&subjects, GradePolicy::Strict).expect_err("strict");
        assert_eq!(e.code, "unknown_grade");
        let d = e.details.expect("details");
        assert_eq!(d["subject"], "Science");
        assert_eq!(d["grade"], "E");
    }

    #[test]
    fn ratios_pass_through_above_one() {
        assert_eq!(subject_ratio(&sub("m", 90.0, 100.0, "A")), 0.9);
        assert_eq!(subject_ratio(&sub("m", 110.0, 100.0, "A")), 1.1);
    }

    #[test]
    fn results_do_not_depend_on_subject_order() {
        let subjects = three_subjects();
        let mut reversed = subjects.clone();
        reversed.reverse();
        assert_eq!(calculate_cgpa(&subjects), calculate_cgpa(&reversed));
        assert_eq!(
            calculate_overall_percentage(&subjects),
            calculate_overall_percentage(&reversed)
        );
    }

    #[test]
    fn cgpa_of_valid_grades_stays_in_range() {
        let letters = ["A", "B", "C", "D"];
        for n in 1..=6 {
            for start in 0..letters.len() {
                let subjects: Vec<Subject> = (0..n)
                    .map(|i| sub("s", 50.0, 100.0, letters[(start + i * 3) % 4]))
                    .collect();
                let cgpa = calculate_cgpa(&subjects);
                assert!((4.0..=10.0).contains(&cgpa), "cgpa {} out of range", cgpa);
            }
        }
    }

    #[test]
    fn summary_carries_points_and_ratios_in_order() {
        let card = ReportCard {
            student_id: "101".into(),
            term: 1,
            subjects: three_subjects(),
            overall_grade: "A".into(),
            teacher_remark: TeacherRemark::default(),
        };
        let s = summarize_report_card(&card, GradePolicy::Lenient).expect("summary");
        assert_eq!(s.subject_points, vec![8, 10, 10]);
        assert_eq!(s.subject_ratios[0].name, "Mathematics");
        assert_eq!(s.subject_ratios[2].ratio, 0.88);
    }

    #[test]
    fn attendance_percent_guards_empty() {
        assert_eq!(attendance_percent(0, 0), 0.0);
        assert_eq!(attendance_percent(120, 10), 92.31);
    }

    #[test]
    fn attendance_percent_survives_extreme_counts() {
        assert_eq!(attendance_percent(i64::MAX, 1), 100.0);
        assert_eq!(attendance_percent(1, i64::MAX), 0.0);
        assert_eq!(attendance_percent(i64::MAX, i64::MAX), 50.0);
        assert_eq!(attendance_percent(-5, 10), 0.0);
    }

    #[test]
    fn policy_parse_is_case_insensitive() {
        assert_eq!(GradePolicy::parse("STRICT"), Some(GradePolicy::Strict));
        assert_eq!(GradePolicy::parse("lenient"), Some(GradePolicy::Lenient));
        assert_eq!(GradePolicy::parse("other"), None);
    }
}
