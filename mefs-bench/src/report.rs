//! Aggregation of worker outcomes into the final report.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::worker::{TransferRecord, WorkerOutcome};

/// Aggregate counters of a benchmark run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Number of simulated users.
    pub users_total: usize,
    /// Users whose bucket was created.
    pub users_provisioned: usize,
    /// Users that could not be created or never became ready.
    pub users_failed: usize,
    /// Uploads acknowledged by the daemon.
    pub uploads_succeeded: u64,
    /// Uploads that failed.
    pub uploads_failed: u64,
    /// Downloads that completed with matching contents.
    pub downloads_succeeded: u64,
    /// Downloads that failed, were skipped, or returned different contents.
    pub downloads_failed: u64,
    /// Downloads whose digest differs from the upload.
    pub checksum_mismatches: u64,
    /// Payload bytes of acknowledged uploads.
    pub bytes_uploaded: u64,
    /// Bytes received by downloads.
    pub bytes_downloaded: u64,
}

impl RunReport {
    /// Folds transfer records into a report without any user counts.
    pub fn fold<'a>(records: impl IntoIterator<Item = &'a TransferRecord>) -> Self {
        let mut report = Self::default();
        for record in records {
            report.add_record(record);
        }
        report
    }

    /// Counts a single transfer cycle.
    ///
    /// Every cycle counts as exactly one upload and one download, so a download that was skipped
    /// counts as failed.
    pub fn add_record(&mut self, record: &TransferRecord) {
        if record.upload_ok {
            self.uploads_succeeded += 1;
            self.bytes_uploaded += record.size;
        } else {
            self.uploads_failed += 1;
        }

        if record.download_ok {
            self.downloads_succeeded += 1;
        } else {
            self.downloads_failed += 1;
        }
        if record.checksum_match == Some(false) {
            self.checksum_mismatches += 1;
        }
        self.bytes_downloaded += record.downloaded_bytes;
    }

    /// The number of transfer cycles that ran.
    pub fn transfers(&self) -> u64 {
        self.uploads_succeeded + self.uploads_failed
    }
}

/// Collects one [`WorkerOutcome`] per user slot.
pub struct ResultAggregator {
    expected: usize,
    seen: HashSet<usize>,
    ignored: usize,
    report: RunReport,
    object_sizes: DDSketch,
    upload_timing: DDSketch,
    download_timing: DDSketch,
}

impl ResultAggregator {
    /// Creates an aggregator waiting for the outcomes of `users` slots.
    pub fn new(users: usize) -> Self {
        Self {
            expected: users,
            seen: HashSet::with_capacity(users),
            ignored: 0,
            report: RunReport {
                users_total: users,
                ..Default::default()
            },
            object_sizes: DDSketch::default(),
            upload_timing: DDSketch::default(),
            download_timing: DDSketch::default(),
        }
    }

    /// Folds the outcome of a worker into the report.
    ///
    /// Returns `false` and leaves the report untouched if the slot already signalled or does not
    /// exist.
    pub fn accept(&mut self, outcome: &WorkerOutcome) -> bool {
        if outcome.user_index >= self.expected {
            tracing::warn!(user_index = outcome.user_index, "ignoring outcome of unknown user");
            self.ignored += 1;
            return false;
        }
        if !self.seen.insert(outcome.user_index) {
            tracing::warn!(
                user_index = outcome.user_index,
                "ignoring duplicate completion signal"
            );
            self.ignored += 1;
            return false;
        }

        if outcome.is_provisioned() {
            self.report.users_provisioned += 1;
        } else {
            self.report.users_failed += 1;
        }

        for record in &outcome.records {
            self.report.add_record(record);
            if record.upload_ok {
                self.object_sizes.add(record.size as f64);
                self.upload_timing.add(record.upload_duration.as_secs_f64());
            }
            if let (true, Some(duration)) = (record.download_ok, record.download_duration) {
                self.download_timing.add(duration.as_secs_f64());
            }
        }

        true
    }

    /// Whether every user slot has signalled.
    pub fn is_complete(&self) -> bool {
        self.seen.len() >= self.expected
    }

    /// The number of user slots that have not signalled yet.
    pub fn pending(&self) -> usize {
        self.expected - self.seen.len()
    }

    /// The number of signals rejected as duplicate or unknown.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// The counters folded so far.
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Finalizes the report of a run that took `elapsed`.
    pub fn finish(self, elapsed: Duration) -> RunSummary {
        RunSummary {
            report: self.report,
            elapsed,
            ignored_signals: self.ignored,
            object_sizes: self.object_sizes,
            upload_timing: self.upload_timing,
            download_timing: self.download_timing,
        }
    }
}

impl fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultAggregator")
            .field("expected", &self.expected)
            .field("seen", &self.seen.len())
            .field("ignored", &self.ignored)
            .field("report", &self.report)
            .field("samples", &self.object_sizes.count())
            .finish_non_exhaustive()
    }
}

/// The final report along with latency distributions for display.
pub struct RunSummary {
    /// Aggregate counters.
    pub report: RunReport,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
    /// Completion signals rejected as duplicate or from unknown user slots.
    pub ignored_signals: usize,
    object_sizes: DDSketch,
    upload_timing: DDSketch,
    download_timing: DDSketch,
}

impl fmt::Debug for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunSummary")
            .field("report", &self.report)
            .field("elapsed", &self.elapsed)
            .field("ignored_signals", &self.ignored_signals)
            .field("upload_samples", &self.upload_timing.count())
            .field("download_samples", &self.download_timing.count())
            .finish_non_exhaustive()
    }
}

impl RunSummary {
    /// Prints the report to stdout.
    pub fn print(&self) {
        print!("{self}");
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = &self.report;

        writeln!(f)?;
        writeln!(f, "{} ({:.2?})", "## RESULTS".bold(), self.elapsed)?;

        write!(
            f,
            "{} {} total, {} provisioned",
            "USERS:".bold().green(),
            report.users_total.bold(),
            report.users_provisioned
        )?;
        if report.users_failed > 0 {
            write!(f, ", {}", format!("{} FAILED", report.users_failed).bold().red())?;
        }
        writeln!(f)?;

        write!(
            f,
            "{} ({} ops",
            "UPLOAD:".bold().green(),
            report.uploads_succeeded.bold()
        )?;
        write_failures(f, report.uploads_failed)?;
        writeln!(f, ")")?;
        if self.object_sizes.count() > 0 {
            let size = |q| ByteSize::b(quantile(&self.object_sizes, q) as u64);
            let avg = ByteSize::b(average(&self.object_sizes) as u64);
            writeln!(
                f,
                "  size avg: {}; p50: {}; p90: {}; p99: {}",
                avg.bold(),
                size(0.5),
                size(0.9),
                size(0.99)
            )?;
            writeln!(
                f,
                "  {} total, {}",
                ByteSize::b(report.bytes_uploaded).bold(),
                throughput(report.bytes_uploaded, self.elapsed).bold()
            )?;
            write_percentiles(f, &self.upload_timing)?;
        }

        write!(
            f,
            "{} ({} ops",
            "DOWNLOAD:".bold().green(),
            report.downloads_succeeded.bold()
        )?;
        write_failures(f, report.downloads_failed)?;
        writeln!(f, ")")?;
        if self.download_timing.count() > 0 {
            writeln!(
                f,
                "  {} total, {}",
                ByteSize::b(report.bytes_downloaded).bold(),
                throughput(report.bytes_downloaded, self.elapsed).bold()
            )?;
            write_percentiles(f, &self.download_timing)?;
        }

        if report.checksum_mismatches > 0 {
            writeln!(
                f,
                "{}",
                format!("{} CHECKSUM MISMATCHES", report.checksum_mismatches)
                    .bold()
                    .red()
            )?;
        }
        if self.ignored_signals > 0 {
            writeln!(f, "{} ignored completion signals", self.ignored_signals.bold().yellow())?;
        }

        Ok(())
    }
}

/// Formats the rate of moving `bytes` in `elapsed` for display.
///
/// Transfers too fast to measure yield `inf`.
pub fn throughput(bytes: u64, elapsed: Duration) -> String {
    if elapsed.is_zero() {
        return "inf".to_owned();
    }
    let per_second = (bytes as f64 / elapsed.as_secs_f64()) as u64;
    format!("{}/s", ByteSize::b(per_second))
}

fn write_failures(f: &mut fmt::Formatter<'_>, failures: u64) -> fmt::Result {
    if failures > 0 {
        write!(f, ", {}", format!("{failures} FAILURES").bold().red())?;
    }
    Ok(())
}

fn write_percentiles(f: &mut fmt::Formatter<'_>, sketch: &DDSketch) -> fmt::Result {
    let avg = Duration::from_secs_f64(average(sketch));
    let p = |q| Duration::from_secs_f64(quantile(sketch, q));
    writeln!(
        f,
        "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
        avg.bold(),
        p(0.5),
        p(0.9),
        p(0.99)
    )
}

fn average(sketch: &DDSketch) -> f64 {
    match (sketch.sum(), sketch.count()) {
        (Some(sum), count) if count > 0 => (sum / count as f64).max(0.0),
        _ => 0.0,
    }
}

fn quantile(sketch: &DDSketch, q: f64) -> f64 {
    sketch
        .quantile(q)
        .ok()
        .flatten()
        .unwrap_or_default()
        .max(0.0)
}
