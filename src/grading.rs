use serde::{Deserialize, Serialize};

/// Raw per-component marks for one student in one course.
///
/// Nominal maxima are mids 30, finals 50, sessional 10, assignment 5,
/// quiz 5, but no per-component bound is enforced: a mids mark of 35 is
/// summed as-is. Missing components default to 0.0 at the call boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMarks {
    #[serde(default)]
    pub mids_marks: f64,
    #[serde(default)]
    pub finals_marks: f64,
    #[serde(default)]
    pub sessional: f64,
    #[serde(default)]
    pub assignment: f64,
    #[serde(default)]
    pub quiz: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "F")]
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
            Grade::DMinus => "D-",
            Grade::F => "F",
        }
    }

    /// Parse a stored grade label. Unknown labels are `None`; callers
    /// decide what that means instead of inheriting a silent 0.0.
    #[allow(dead_code)]
    pub fn parse(label: &str) -> Option<Grade> {
        match label {
            "A+" => Some(Grade::APlus),
            "A" => Some(Grade::A),
            "A-" => Some(Grade::AMinus),
            "B+" => Some(Grade::BPlus),
            "B" => Some(Grade::B),
            "B-" => Some(Grade::BMinus),
            "C+" => Some(Grade::CPlus),
            "C" => Some(Grade::C),
            "C-" => Some(Grade::CMinus),
            "D" => Some(Grade::D),
            "D-" => Some(Grade::DMinus),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pass,
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "Pass",
            Status::Fail => "Fail",
        }
    }
}

/// One computed result record. Created fresh per invocation, never
/// mutated; persistence and merging belong to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComputedResult {
    pub percentage: f64,
    pub grade: Grade,
    pub gpa: f64,
    pub status: Status,
    pub total_marks: f64,
    pub components: RawMarks,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Sum of the five raw components, clamped to [0,100] and rounded to two
/// decimals. The clamp applies to the total only, never per component.
pub fn compute_percentage(
    mids_marks: f64,
    finals_marks: f64,
    sessional: f64,
    assignment: f64,
    quiz: f64,
) -> f64 {
    let sum = mids_marks + finals_marks + sessional + assignment + quiz;
    round2(sum.clamp(0.0, 100.0))
}

/// Descending threshold ladder, first match wins. The D band (>=35) sits
/// above D- (>=30) so D- covers [30,35) and F covers [0,30); this exact
/// ordering is load-bearing and must not be rearranged.
pub fn grade_from_percentage(percentage: f64) -> Grade {
    if percentage >= 85.0 {
        Grade::APlus
    } else if percentage >= 80.0 {
        Grade::A
    } else if percentage >= 75.0 {
        Grade::AMinus
    } else if percentage >= 70.0 {
        Grade::BPlus
    } else if percentage >= 65.0 {
        Grade::B
    } else if percentage >= 60.0 {
        Grade::BMinus
    } else if percentage >= 55.0 {
        Grade::CPlus
    } else if percentage >= 50.0 {
        Grade::C
    } else if percentage >= 45.0 {
        Grade::CMinus
    } else if percentage >= 35.0 {
        Grade::D
    } else if percentage >= 30.0 {
        Grade::DMinus
    } else {
        Grade::F
    }
}

/// Fixed grade-to-GPA table, no interpolation.
pub fn gpa_from_grade(grade: Grade) -> f64 {
    match grade {
        Grade::APlus => 4.0,
        Grade::A => 3.7,
        Grade::AMinus => 3.5,
        Grade::BPlus => 3.3,
        Grade::B => 3.0,
        Grade::BMinus => 2.7,
        Grade::CPlus => 2.5,
        Grade::C => 2.3,
        Grade::CMinus => 2.0,
        Grade::D => 1.7,
        Grade::DMinus => 1.5,
        Grade::F => 0.0,
    }
}

pub fn status_from_grade(grade: Grade) -> Status {
    if grade == Grade::F {
        Status::Fail
    } else {
        Status::Pass
    }
}

/// Single entry point: percentage -> grade -> gpa -> status, plus the
/// unclamped raw total and an echo of the inputs. `total_marks` is NOT
/// clamped and may exceed 100 or go negative while `percentage` stays in
/// [0,100].
pub fn compute_result(
    mids_marks: f64,
    finals_marks: f64,
    sessional: f64,
    assignment: f64,
    quiz: f64,
) -> ComputedResult {
    let percentage = compute_percentage(mids_marks, finals_marks, sessional, assignment, quiz);
    let grade = grade_from_percentage(percentage);
    let gpa = gpa_from_grade(grade);
    let status = status_from_grade(grade);
    let total_marks = mids_marks + finals_marks + sessional + assignment + quiz;

    ComputedResult {
        percentage,
        grade,
        gpa,
        status,
        total_marks,
        components: RawMarks {
            mids_marks,
            finals_marks,
            sessional,
            assignment,
            quiz,
        },
    }
}

pub fn compute_result_for(marks: &RawMarks) -> ComputedResult {
    compute_result(
        marks.mids_marks,
        marks.finals_marks,
        marks.sessional,
        marks.assignment,
        marks.quiz,
    )
}
