//! Small CSV helpers for roster/marks exchange files. Quoting follows the
//! usual double-quote escaping; parsing is line-oriented (embedded
//! newlines inside quoted fields are not supported by the exchange
//! formats we read).

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_quote(f))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

pub const ROSTER_COLUMNS: [&str; 6] = [
    "rollno",
    "name",
    "section",
    "batch",
    "department",
    "semester",
];

/// Map an uploaded roster header to its canonical column name, accepting
/// the spreadsheet variants teachers actually export.
pub fn canonical_roster_column(header: &str) -> Option<&'static str> {
    let t = header.trim();
    let lower = t.to_ascii_lowercase();
    match lower.as_str() {
        "rollno" | "roll_no" | "roll no" | "student id" => Some("rollno"),
        "name" | "student name" | "student_name" => Some("name"),
        "section" | "sec" => Some("section"),
        "batch" | "class" | "year" => Some("batch"),
        "department" | "dept" | "branch" => Some("department"),
        "semester" | "sem" => Some("semester"),
        _ => None,
    }
}

/// Map an uploaded marks header to one of the five component columns by
/// substring, mirroring how mixed exports name them (`mid_marks`,
/// `Final Marks`, `quiz_1`, ...). `final` wins over `mid` so that
/// "mid/final" compounds never land on mids.
pub fn canonical_marks_column(header: &str) -> Option<&'static str> {
    let lower = header.trim().to_ascii_lowercase();
    if lower.contains("final") {
        Some("finals_marks")
    } else if lower.contains("mid") {
        Some("mids_marks")
    } else if lower.contains("sessional") {
        Some("sessional")
    } else if lower.contains("assignment") {
        Some("assignment")
    } else if lower.contains("quiz") {
        Some("quiz")
    } else {
        None
    }
}

/// Coercion policy for bulk files: blank or unparseable cells become 0.0.
/// Returns whether the cell actually parsed so callers can surface a
/// warning for the ones that did not. Non-finite values ("NaN", "inf")
/// count as unparseable so they can never reach the grade math.
pub fn coerce_mark_cell(raw: &str) -> (f64, bool) {
    let t = raw.trim();
    if t.is_empty() {
        return (0.0, true);
    }
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() => (v, true),
        _ => (0.0, false),
    }
}

pub fn fmt_mark(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
