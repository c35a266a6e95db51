//! CSV output: `Pages,Latency_ns` then one `<pages>,<latency>` row per record.

use std::io::{self, Write};

use crate::sweep::Measurement;

pub const CSV_HEADER: &str = "Pages,Latency_ns";

pub struct CsvReport<W: Write> {
    out: W,
    rows: usize,
}

impl<W: Write> CsvReport<W> {
    /// Writes the header immediately.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{CSV_HEADER}")?;
        Ok(Self { out, rows: 0 })
    }

    /// Rows are flushed one by one so a long sweep can be followed live.
    pub fn record(&mut self, m: &Measurement) -> io::Result<()> {
        writeln!(self.out, "{},{}", m.pages, m.latency_ns)?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_layout() {
        let mut report = CsvReport::new(Vec::new()).unwrap();
        report
            .record(&Measurement {
                pages: 1,
                iterations: 20_000_000,
                latency_ns: 0.25,
            })
            .unwrap();
        report
            .record(&Measurement {
                pages: 136,
                iterations: 147_058,
                latency_ns: 3.0,
            })
            .unwrap();
        assert_eq!(report.rows(), 2);

        let text = String::from_utf8(report.finish().unwrap()).unwrap();
        assert_eq!(text, "Pages,Latency_ns\n1,0.25\n136,3\n");
    }

    #[test]
    fn test_header_only() {
        let out = CsvReport::new(Vec::new()).unwrap().finish().unwrap();
        assert_eq!(out, b"Pages,Latency_ns\n");
    }
}
