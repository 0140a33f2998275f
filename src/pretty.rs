//! # Terminal output
//!
//! Renders search hits, catalog rows and ingestion reports for the `imret` binary.
//! Output is colored with `crossterm` attributes; every renderer writes to any
//! [`Write`] so the layout can be checked against a byte buffer.
//!
//! ```text
//!  1. 000123.jpg  d=0.4210
//!     a dog running on a beach
//!  2. 000045.jpg  d=0.5002
//!     (no caption)
//! ```

use crossterm::{
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use std::io::{self, Write, stdout};

use crate::catalog::SearchHit;
use crate::metadata::MetadataRow;
use crate::pipeline::IngestReport;

const NO_CAPTION: &str = "(no caption)";

/// Write a ranked list of hits.
pub fn render_hits<W: Write>(out: &mut W, hits: &[SearchHit]) -> io::Result<()> {
    if hits.is_empty() {
        queue!(
            out,
            SetForegroundColor(Color::Yellow),
            Print("No matching images.\n"),
            ResetColor
        )?;
        return out.flush();
    }

    for (rank, hit) in hits.iter().enumerate() {
        queue!(
            out,
            SetAttribute(Attribute::Bold),
            Print(format!("{:>2}. ", rank + 1)),
            SetForegroundColor(Color::Cyan),
            Print(&hit.filename),
            ResetColor,
            SetAttribute(Attribute::Reset),
            SetForegroundColor(Color::DarkGrey),
            Print(format!("  d={:.4}  #{}\n", hit.distance, hit.position)),
            ResetColor,
            Print(format!(
                "    {}\n",
                hit.caption.as_deref().unwrap_or(NO_CAPTION)
            )),
        )?;
    }
    out.flush()
}

/// Write a single catalog row.
pub fn render_row<W: Write>(out: &mut W, row: &MetadataRow) -> io::Result<()> {
    queue!(
        out,
        SetAttribute(Attribute::Bold),
        Print(format!("#{} ", row.position)),
        SetForegroundColor(Color::Cyan),
        Print(&row.filename),
        ResetColor,
        SetAttribute(Attribute::Reset),
        Print(format!(
            "\n    caption: {}\n    vector: {} values\n",
            row.caption.as_deref().unwrap_or(NO_CAPTION),
            row.vector.len()
        )),
    )?;
    out.flush()
}

/// Write the counters of an ingestion run, followed by the failed files.
pub fn render_report<W: Write>(out: &mut W, report: &IngestReport) -> io::Result<()> {
    queue!(
        out,
        SetForegroundColor(Color::Green),
        Print(format!("{} succeeded", report.succeeded)),
        ResetColor,
        Print(format!(", {} skipped, ", report.skipped)),
        SetForegroundColor(if report.failed > 0 {
            Color::Red
        } else {
            Color::Reset
        }),
        Print(format!("{} failed", report.failed)),
        ResetColor,
        Print(format!(" ({} without caption)\n", report.uncaptioned)),
    )?;
    for failure in &report.failures {
        queue!(
            out,
            SetForegroundColor(Color::Red),
            Print(format!("  {}: ", failure.filename)),
            ResetColor,
            Print(format!("{}\n", failure.error)),
        )?;
    }
    out.flush()
}

pub fn print_hits(hits: &[SearchHit]) -> io::Result<()> {
    render_hits(&mut stdout().lock(), hits)
}

pub fn print_row(row: &MetadataRow) -> io::Result<()> {
    render_row(&mut stdout().lock(), row)
}

pub fn print_report(report: &IngestReport) -> io::Result<()> {
    render_report(&mut stdout().lock(), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ImageFailure;

    fn rendered(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_render_hits_lists_filenames_in_rank_order() {
        let hits = vec![
            SearchHit {
                position: 4,
                filename: "dog.jpg".into(),
                caption: Some("a dog on a beach".into()),
                distance: 0.125,
            },
            SearchHit {
                position: 1,
                filename: "car.jpg".into(),
                caption: None,
                distance: 0.5,
            },
        ];
        let text = rendered(|out| render_hits(out, &hits));
        let dog = text.find("dog.jpg").unwrap();
        let car = text.find("car.jpg").unwrap();
        assert!(dog < car);
        assert!(text.contains("a dog on a beach"));
        assert!(text.contains(NO_CAPTION));
        assert!(text.contains("d=0.1250"));
    }

    #[test]
    fn test_render_hits_empty() {
        let text = rendered(|out| render_hits(out, &[]));
        assert!(text.contains("No matching images."));
    }

    #[test]
    fn test_render_report_lists_failures() {
        let report = IngestReport {
            succeeded: 2,
            skipped: 1,
            failed: 1,
            uncaptioned: 0,
            failures: vec![ImageFailure {
                filename: "bad.jpg".into(),
                error: "HTTP 429".into(),
            }],
        };
        let text = rendered(|out| render_report(out, &report));
        assert!(text.contains("2 succeeded"));
        assert!(text.contains("1 skipped"));
        assert!(text.contains("bad.jpg"));
        assert!(text.contains("HTTP 429"));
    }

    #[test]
    fn test_render_row() {
        let row = MetadataRow {
            position: 7,
            filename: "x.png".into(),
            vector: vec![0.0; 3],
            caption: None,
        };
        let text = rendered(|out| render_row(out, &row));
        assert!(text.contains("#7"));
        assert!(text.contains("3 values"));
    }
}
