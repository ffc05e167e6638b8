//! Append-only trade log.
//!
//! One line per completed round-trip:
//! `ISO8601,SHAPE,MAKER_VENUE,MAKER_SIDE,TAKER_VENUE,TAKER_SIDE,MAKER_TOTAL,TAKER_TOTAL,PROFIT`
//! Decimal values render in plain notation, never scientific.

use crate::model::Side;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub ts: DateTime<Utc>,
    pub shape: &'static str,
    pub maker_venue: String,
    pub maker_side: Side,
    pub taker_venue: String,
    pub taker_side: Side,
    pub maker_total: Decimal,
    pub taker_total: Decimal,
    pub profit: Decimal,
}

impl TradeRecord {
    pub fn line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.shape,
            self.maker_venue,
            self.maker_side,
            self.taker_venue,
            self.taker_side,
            self.maker_total,
            self.taker_total,
            self.profit,
        )
    }
}

pub struct TradeLog {
    writer: BufWriter<File>,
}

impl TradeLog {
    /// Open (or create) the log for appending.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one record and flush; a crash must not lose completed trades.
    pub fn append(&mut self, record: &TradeRecord) -> std::io::Result<()> {
        writeln!(self.writer, "{}", record.line())?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record() -> TradeRecord {
        TradeRecord {
            ts: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap(),
            shape: "maker-bid-a",
            maker_venue: "coinbase".to_string(),
            maker_side: Side::Buy,
            taker_venue: "binance".to_string(),
            taker_side: Side::Sell,
            maker_total: dec!(50.05),
            taker_total: dec!(50.40),
            profit: dec!(0.148925),
        }
    }

    #[test]
    fn line_format() {
        assert_eq!(
            record().line(),
            "2024-03-01T12:30:45.000Z,maker-bid-a,coinbase,buy,binance,sell,50.05,50.40,0.148925"
        );
    }

    #[test]
    fn decimals_never_render_scientific() {
        let mut rec = record();
        rec.profit = dec!(0.000000001);
        rec.maker_total = Decimal::from(10_000_000) * dec!(1.5);
        let line = rec.line();
        assert!(line.ends_with("15000000.0,50.40,0.000000001"));
    }

    #[test]
    fn appends_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.log");

        let mut log = TradeLog::open(&path).unwrap();
        log.append(&record()).unwrap();
        drop(log);

        let mut log = TradeLog::open(&path).unwrap();
        let mut second = record();
        second.profit = dec!(-0.01);
        log.append(&second).unwrap();
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("0.148925"));
        assert!(lines[1].ends_with("-0.01"));
    }
}
