use std::{borrow::Cow, fmt::Write as _};

use crate::analyzer::{AnalyzeResult, ColumnStats};

const STATS_HEADERS: [&str; 5] = ["column", "sanitized", "min_len", "max_len", "sql_type"];

/// Column statistics as an aligned plain-text table.
pub fn render_column_stats(stats: &ColumnStats) -> String {
    let headers = STATS_HEADERS.map(str::to_string);
    let rows = stats
        .iter()
        .map(|stat| {
            vec![
                stat.name.clone(),
                stat.sanitized_name.clone(),
                stat.min_len.to_string(),
                stat.max_len.to_string(),
                stat.sql_type.clone(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn print_analysis(result: &AnalyzeResult) {
    print!("{}", render_column_stats(&result.column_stats));
    println!("{} record(s) analyzed", result.record_count);
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));

    let separator_cells = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator_cells, &widths));

    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = single_line(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn single_line(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ColumnStat;

    #[test]
    fn stats_table_aligns_by_character_width() {
        let stats = ColumnStats::new(vec![
            ColumnStat {
                name: "héllo".into(),
                max_len: 10,
                min_len: 0,
                sanitized_name: "HELLO".into(),
                sql_type: "VARCHAR2(1000)".into(),
            },
            ColumnStat {
                name: "n".into(),
                max_len: 3,
                min_len: 1,
                sanitized_name: "N".into(),
                sql_type: "CLOB".into(),
            },
        ]);
        let rendered = render_column_stats(&stats);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "column  sanitized  min_len  max_len  sql_type");
        assert_eq!(lines[1], "------  ---------  -------  -------  --------------");
        assert_eq!(lines[2], "héllo   HELLO      0        10       VARCHAR2(1000)");
        assert_eq!(lines[3], "n       N          1        3        CLOB");
    }

    #[test]
    fn multiline_cells_are_flattened() {
        let rendered = render_table(&["a".to_string()], &[vec!["x\ny".to_string()]]);
        assert!(rendered.ends_with("x y\n"));
    }
}
