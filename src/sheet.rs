//! Spreadsheet source: turns a CSV sheet or an inline JSON table into the
//! typed rows the reconciler consumes. Column names match case-insensitively;
//! a sheet missing a required column is rejected before anything is stored.

use crate::error::{NotasError, Result};
use serde_json::Value;
use std::collections::HashMap;

pub const STUDENT_REQUIRED_COLUMNS: [&str; 2] = ["first_name", "last_name"];
pub const SUBJECT_REQUIRED_COLUMNS: [&str; 2] = ["code", "name"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Source line of each row (header is line 1).
    pub lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub line: usize,
    pub run: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

impl StudentRow {
    pub fn has_names(&self) -> bool {
        !self.first_name.is_empty() && !self.last_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRow {
    pub line: usize,
    pub code: String,
    pub name: String,
}

impl SubjectRow {
    pub fn is_complete(&self) -> bool {
        !self.code.is_empty() && !self.name.is_empty()
    }
}

/// Splits CSV text into records, each tagged with the line it starts on.
/// Quoted fields may contain commas, doubled quotes and line breaks.
fn parse_csv_records(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start_line = 1;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                if in_quotes {
                    buf.push('\n');
                } else {
                    fields.push(std::mem::take(&mut buf));
                    records.push((start_line, std::mem::take(&mut fields)));
                    start_line = line;
                }
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        records.push((start_line, fields));
    }
    records
}

fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl Table {
    /// Header row plus data rows; blank lines are ignored.
    pub fn from_csv(text: &str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut table = Table::default();
        let mut have_header = false;
        for (line, fields) in parse_csv_records(text) {
            if fields.len() == 1 && fields[0].trim().is_empty() {
                continue;
            }
            if !have_header {
                table.columns = fields;
                have_header = true;
            } else {
                table.rows.push(fields);
                table.lines.push(line);
            }
        }
        table
    }

    /// `{"columns": [...], "rows": [[...], ...]}`; cells may be strings,
    /// numbers or null.
    pub fn from_json(value: &Value, sheet: &str) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(NotasError::validation(format!(
                "{sheet} sheet must be an object with columns and rows"
            )));
        };
        let columns = obj
            .get("columns")
            .and_then(|v| v.as_array())
            .ok_or_else(|| NotasError::validation(format!("{sheet}.columns must be an array")))?
            .iter()
            .map(|c| {
                c.as_str().map(str::to_string).ok_or_else(|| {
                    NotasError::validation(format!("{sheet}.columns must contain strings"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::new();
        let mut lines = Vec::new();
        let raw_rows = match obj.get("rows") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(a)) => a.clone(),
            Some(_) => {
                return Err(NotasError::validation(format!(
                    "{sheet}.rows must be an array"
                )))
            }
        };
        for (i, row) in raw_rows.iter().enumerate() {
            let Some(cells) = row.as_array() else {
                return Err(NotasError::validation(format!(
                    "{sheet}.rows[{i}] must be an array"
                )));
            };
            let cells = cells
                .iter()
                .map(|c| match c {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            rows.push(cells);
            lines.push(i + 2);
        }
        Ok(Table {
            columns,
            rows,
            lines,
        })
    }

    fn column_index(&self) -> HashMap<String, usize> {
        let mut idx = HashMap::new();
        for (i, c) in self.columns.iter().enumerate() {
            idx.entry(c.trim().to_ascii_lowercase()).or_insert(i);
        }
        idx
    }

    fn require_columns(&self, sheet: &str, required: &[&str]) -> Result<HashMap<String, usize>> {
        let idx = self.column_index();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|c| !idx.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(NotasError::validation(format!(
                "{sheet} sheet is missing required columns: {}",
                missing.join(", ")
            )));
        }
        Ok(idx)
    }

    fn cell(&self, row: usize, col: Option<usize>) -> &str {
        col.and_then(|c| self.rows[row].get(c))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    fn line(&self, row: usize) -> usize {
        self.lines.get(row).copied().unwrap_or(row + 2)
    }
}

pub fn student_rows(table: &Table) -> Result<Vec<StudentRow>> {
    let idx = table.require_columns("students", &STUDENT_REQUIRED_COLUMNS)?;
    let run_col = idx.get("run").copied();
    let first_col = idx.get("first_name").copied();
    let last_col = idx.get("last_name").copied();
    let email_col = idx.get("email").copied();

    Ok((0..table.rows.len())
        .map(|i| StudentRow {
            line: table.line(i),
            run: non_empty_trimmed(table.cell(i, run_col)),
            first_name: table.cell(i, first_col).to_string(),
            last_name: table.cell(i, last_col).to_string(),
            email: non_empty_trimmed(table.cell(i, email_col)),
        })
        .collect())
}

pub fn subject_rows(table: &Table) -> Result<Vec<SubjectRow>> {
    let idx = table.require_columns("subjects", &SUBJECT_REQUIRED_COLUMNS)?;
    let code_col = idx.get("code").copied();
    let name_col = idx.get("name").copied();

    Ok((0..table.rows.len())
        .map(|i| SubjectRow {
            line: table.line(i),
            code: table.cell(i, code_col).to_string(),
            name: table.cell(i, name_col).to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_record_handles_quotes_and_escaped_quotes() {
        let expected: Vec<(usize, Vec<String>)> = vec![(
            1,
            ["1", "Pérez, Ana", r#"say "hi""#, "x"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )];
        assert_eq!(parse_csv_records(r#"1,"Pérez, Ana","say ""hi""",x"#), expected);
        assert!(parse_csv_records("").is_empty());
    }

    #[test]
    fn quoted_line_breaks_stay_inside_the_field() {
        let t = Table::from_csv("code,name\r\nMAT,\"Matemática\nAvanzada\"\r\nLEN,Lenguaje\r\n");
        let rows = subject_rows(&t).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "MAT");
        assert_eq!(rows[0].name, "Matemática\nAvanzada");
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].code, "LEN");
        assert_eq!(rows[1].name, "Lenguaje");
        assert_eq!(rows[1].line, 4);
    }

    #[test]
    fn headers_match_case_insensitively() {
        let t = Table::from_csv(
            "\u{feff}RUN, First_Name ,LAST_NAME,Email\n12.345.678-5,Ana,Rojas,ANA@colegio.cl\n\n,Luis,Soto,\n",
        );
        let rows = student_rows(&t).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].run.as_deref(), Some("12.345.678-5"));
        assert_eq!(rows[0].first_name, "Ana");
        assert_eq!(rows[0].email.as_deref(), Some("ANA@colegio.cl"));
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].run, None);
        assert_eq!(rows[1].email, None);
        assert_eq!(rows[1].line, 4);
    }

    #[test]
    fn optional_columns_may_be_absent() {
        let t = Table::from_csv("first_name,last_name\nAna,Rojas\n");
        let rows = student_rows(&t).expect("rows");
        assert_eq!(rows[0].run, None);
        assert!(rows[0].has_names());
    }

    #[test]
    fn missing_required_columns_are_named() {
        let t = Table::from_csv("run,first_name\n1,Ana\n");
        let e = student_rows(&t).expect_err("missing last_name");
        assert_eq!(e.code(), "bad_params");
        assert!(e.to_string().contains("last_name"));

        let t = Table::from_csv("");
        let e = subject_rows(&t).expect_err("empty sheet");
        assert!(e.to_string().contains("code, name"));
    }

    #[test]
    fn short_rows_read_as_empty_cells() {
        let t = Table::from_csv("first_name,last_name\nAna\n");
        let rows = student_rows(&t).expect("rows");
        assert_eq!(rows[0].last_name, "");
        assert!(!rows[0].has_names());
    }

    #[test]
    fn json_tables_accept_numbers_and_nulls() {
        let v = json!({
            "columns": ["Code", "Name"],
            "rows": [["MAT", "Matemática"], [101, null]]
        });
        let t = Table::from_json(&v, "subjects").expect("table");
        let rows = subject_rows(&t).expect("rows");
        assert_eq!(rows[0].code, "MAT");
        assert!(rows[0].is_complete());
        assert_eq!(rows[1].code, "101");
        assert!(!rows[1].is_complete());
    }

    #[test]
    fn json_tables_reject_bad_shapes() {
        assert!(Table::from_json(&json!([]), "students").is_err());
        assert!(Table::from_json(&json!({ "columns": "code" }), "subjects").is_err());
        assert!(Table::from_json(&json!({ "columns": ["code"], "rows": [1] }), "subjects").is_err());
    }
}
