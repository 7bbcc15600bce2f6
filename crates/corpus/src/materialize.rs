//! Table, CSV, and chart sinks over query results.

use std::io;

use crate::query::{AppGroups, Apps};

/// The shared table shape: full UTF-8 grid, headers as given.
pub fn new_table(headers: Vec<String>) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(headers);
    table
}

impl Apps {
    fn table_parts(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let apps = self.list();
        let mut headers = vec!["Env".to_owned(), "Org".to_owned(), "App".to_owned()];
        if let Some(first) = apps.first() {
            headers.extend(first.data().keys().cloned());
        }
        let rows = apps
            .iter()
            .map(|app| {
                let mut row = vec![
                    app.env().to_string(),
                    app.org().to_owned(),
                    app.name().to_owned(),
                ];
                row.extend(app.data().values().map(|value| value.to_string()));
                row
            })
            .collect();
        (headers, rows)
    }

    /// Render as a text table with a count footer.
    pub fn render_table(&self) -> String {
        let (headers, rows) = self.table_parts();
        if rows.is_empty() {
            return "Count: 0".to_owned();
        }
        let mut table = new_table(headers);
        for row in &rows {
            table.add_row(row.clone());
        }
        format!("{table}\nCount: {}", rows.len())
    }

    /// Write headers + rows as CSV.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> anyhow::Result<()> {
        let (headers, rows) = self.table_parts();
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&headers)?;
        for row in rows {
            csv.write_record(&row)?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn csv_string(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl AppGroups {
    fn table_parts(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let groups = self.list();
        let mut headers = Vec::new();
        if let Some(first) = groups.first() {
            headers.extend(first.group_keys());
            headers.extend(first.data_keys());
        }
        let rows = groups
            .iter()
            .map(|group| {
                let mut row: Vec<String> = group
                    .group_values()
                    .iter()
                    .map(|value| value.to_string())
                    .collect();
                row.extend(group.data_values().iter().map(|value| value.to_string()));
                row
            })
            .collect();
        (headers, rows)
    }

    pub fn render_table(&self) -> String {
        let (headers, rows) = self.table_parts();
        if rows.is_empty() {
            return "Count: 0".to_owned();
        }
        let mut table = new_table(headers);
        for row in &rows {
            table.add_row(row.clone());
        }
        format!("{table}\nCount: {}", rows.len())
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> anyhow::Result<()> {
        let (headers, rows) = self.table_parts();
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&headers)?;
        for row in rows {
            csv.write_record(&row)?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn csv_string(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Chart-ready labels and values. Labels come from the named column
    /// (or the full grouping tuple); values from the named column (or
    /// each group's size).
    pub fn chart_data(&self, x: Option<&str>, y: Option<&str>) -> ChartData {
        let groups = self.list();
        let labels = groups
            .iter()
            .map(|group| match x {
                Some(column) => group
                    .get(column)
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| "None".to_owned()),
                None => {
                    let mut parts: Vec<String> = group
                        .group_values()
                        .iter()
                        .map(|value| value.to_string())
                        .collect();
                    parts.extend(group.data_values().iter().map(|value| value.to_string()));
                    parts.join(", ")
                }
            })
            .collect();
        let values = groups
            .iter()
            .map(|group| match y {
                Some(column) => group
                    .get(column)
                    .and_then(|value| value.as_f64())
                    .unwrap_or(0.0),
                None => group.len() as f64,
            })
            .collect();
        ChartData { labels, values }
    }
}

/// A materialized series for an external chart surface.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl ChartData {
    /// A plain text bar chart, one row per label.
    pub fn render_bar(&self) -> String {
        const WIDTH: usize = 40;
        let max = self.values.iter().cloned().fold(0.0f64, f64::max);
        let label_width = self.labels.iter().map(String::len).max().unwrap_or(0);
        let mut out = String::new();
        for (label, value) in self.labels.iter().zip(&self.values) {
            let filled = if max > 0.0 {
                ((value / max) * WIDTH as f64).round() as usize
            } else {
                0
            };
            out.push_str(&format!(
                "{label:label_width$}  {} {value}\n",
                "█".repeat(filled)
            ));
        }
        out
    }
}
