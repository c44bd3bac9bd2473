//! Plain-text line chart shared by the live view and the history view.

use std::fmt::Write;

/// One plotted line.
pub struct ChartSeries<'a> {
    pub label: &'a str,
    pub glyph: char,
    pub values: &'a [f64],
}

#[derive(Debug, Clone, Copy)]
pub struct ChartSize {
    pub width: usize,
    pub height: usize,
}

impl Default for ChartSize {
    fn default() -> Self {
        Self {
            width: 60,
            height: 12,
        }
    }
}

/// Draws `series` into a `size.height` x `size.width` grid with the y axis
/// fixed to `[y_min, y_max]`. Values outside the axis are clamped to the edge
/// rows; later series overwrite earlier ones where they collide. When there
/// are more values than columns, each column shows the last value that maps
/// to it.
pub fn render_chart(series: &[ChartSeries<'_>], y_min: f64, y_max: f64, size: ChartSize) -> String {
    let width = size.width.max(1);
    let height = size.height.max(2);
    let span = if y_max > y_min { y_max - y_min } else { 1.0 };
    let mut grid = vec![vec![' '; width]; height];

    for line in series {
        let count = line.values.len();
        for (index, value) in line.values.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            let column = if count <= width {
                index
            } else {
                index * width / count
            };
            let ratio = ((value - y_min) / span).clamp(0.0, 1.0);
            let row = height - 1 - (ratio * (height - 1) as f64).round() as usize;
            grid[row][column] = line.glyph;
        }
    }

    let mut out = String::new();
    for (row, cells) in grid.iter().enumerate() {
        let level = y_max - span * row as f64 / (height - 1) as f64;
        let _ = writeln!(out, "{level:>7.1} |{}", cells.iter().collect::<String>());
    }
    let _ = writeln!(out, "{:>7} +{}", "", "-".repeat(width));

    let legend: Vec<String> = series
        .iter()
        .map(|line| format!("{} {}", line.glyph, line.label))
        .collect();
    let _ = write!(out, "{:>9}{}", "", legend.join("   "));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes_land_on_edge_rows() {
        let values = [0.0, 50.0, 25.0];
        let chart = render_chart(
            &[ChartSeries {
                label: "T1",
                glyph: '*',
                values: &values,
            }],
            0.0,
            50.0,
            ChartSize {
                width: 3,
                height: 3,
            },
        );
        let rows: Vec<&str> = chart.lines().collect();
        assert_eq!(rows[0], "   50.0 | * ");
        assert_eq!(rows[1], "   25.0 |  *");
        assert_eq!(rows[2], "    0.0 |*  ");
        assert!(rows[4].contains("* T1"));
    }

    #[test]
    fn out_of_range_values_are_clamped_and_columns_compressed() {
        let values: Vec<f64> = (0..10).map(|i| if i == 9 { 99.0 } else { -5.0 }).collect();
        let chart = render_chart(
            &[ChartSeries {
                label: "T2",
                glyph: 'o',
                values: &values,
            }],
            0.0,
            10.0,
            ChartSize {
                width: 5,
                height: 2,
            },
        );
        let rows: Vec<&str> = chart.lines().collect();
        assert_eq!(rows[0], "   10.0 |    o");
        assert_eq!(rows[1], "    0.0 |ooooo");
    }
}
