use hostcare_core::record::StepRecord;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns sized to their widest cell, a dashed rule under the
/// header. Cells beyond the header count are dropped.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let width = |s: &str| s.chars().count();
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|r| r.get(col))
                .map(|c| width(c))
                .fold(width(headers[col]), usize::max)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .into_iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell:<w$}"))
            .collect();
        let mut out = padded.join("  ").trim_end().to_string();
        out.push('\n');
        out
    };

    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let mut out = line(headers.to_vec());
    out += &line(rule.iter().map(String::as_str).collect());
    for row in rows {
        out += &line(row.iter().map(String::as_str).collect());
    }
    out
}

/// One table row per step: index, operation, code, result, reason, detail.
pub fn step_rows(steps: &[StepRecord]) -> Vec<Vec<String>> {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let why = match (&s.matched_rule, &s.detail) {
                (Some(rule), _) => format!("{} ({rule})", s.reason.as_str()),
                (None, Some(detail)) => format!("{}: {detail}", s.reason.as_str()),
                (None, None) => s.reason.as_str().to_string(),
            };
            vec![
                (i + 1).to_string(),
                s.operation.clone(),
                s.code.to_string(),
                s.result.as_str().to_string(),
                why,
            ]
        })
        .collect()
}

pub const STEP_HEADERS: &[&str] = &["#", "OPERATION", "CODE", "RESULT", "REASON"];
