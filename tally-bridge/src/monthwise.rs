//! Month-wise balances: bulk query with anomaly detection and a per-month
//! fallback
//!
//! The bulk query asks Tally to evaluate one `$$ToValue` formula per month.
//! Some installations return the formulas missing, zero, or identical to the
//! closing balance for every month. When the bulk result looks like that,
//! the fetcher re-runs the export once per month with `SVCURRENTDATE` set to
//! the month end and merges the snapshots.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AnomalyConfig;
use crate::metrics::MONTH_WISE_FALLBACKS;
use crate::parser::{self, LedgerSnapshot, MonthWiseParse};
use crate::query::{self, MonthEnd};
use crate::transport::{Delivery, RequestTransport};
use crate::types::{FiscalMonth, MonthWiseLedgerRecord, MonthWiseReport, MonthWiseSource};
use crate::{Error, Result};

/// Why a bulk month-wise result was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// No ledger with activity in the response
    NoLedgers,
    /// Response could not be parsed even after sanitizing
    Unparseable,
    /// None of the month fields appeared anywhere
    NoMonthTags,
    /// Month fields present but all zero while openings are not
    AllMonthsZero,
    /// Most sampled ledgers carry one value for every month
    ConstantAcrossMonths,
}

impl Anomaly {
    /// Metrics label
    pub fn as_str(self) -> &'static str {
        match self {
            Anomaly::NoLedgers => "no_ledgers",
            Anomaly::Unparseable => "unparseable",
            Anomaly::NoMonthTags => "no_month_tags",
            Anomaly::AllMonthsZero => "all_months_zero",
            Anomaly::ConstantAcrossMonths => "constant_across_months",
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judge whether a parsed bulk result can be trusted
pub fn detect_anomaly(
    parsed: &MonthWiseParse,
    months: &[FiscalMonth],
    config: &AnomalyConfig,
) -> Option<Anomaly> {
    if parsed.lines.is_empty() {
        return Some(Anomaly::NoLedgers);
    }
    if !parsed.month_tag_found {
        return Some(Anomaly::NoMonthTags);
    }
    if !parsed.nonzero_month_found {
        return Some(Anomaly::AllMonthsZero);
    }
    if looks_constant(&parsed.lines, months, config) {
        return Some(Anomaly::ConstantAcrossMonths);
    }
    None
}

fn looks_constant(
    lines: &[MonthWiseLedgerRecord],
    months: &[FiscalMonth],
    config: &AnomalyConfig,
) -> bool {
    if months.len() < 2 {
        return false;
    }

    let sample: Vec<Vec<Decimal>> = lines
        .iter()
        .take(config.sample_size)
        .map(|line| months.iter().map(|m| line.balance(*m)).collect::<Vec<_>>())
        .filter(|values| values.iter().any(|v| !v.is_zero()))
        .collect();

    if sample.len() < config.min_sample {
        return false;
    }

    let constant = sample
        .iter()
        .filter(|values| values.iter().all(|v| *v == values[0]))
        .count();

    constant as f64 / sample.len() as f64 >= config.constant_ratio
}

/// Accumulates per-month snapshots into month-wise records, keeping the
/// order in which ledgers were first seen
#[derive(Debug, Default)]
struct MonthMerge {
    records: Vec<MonthWiseLedgerRecord>,
    index: HashMap<String, usize>,
}

impl MonthMerge {
    fn absorb(&mut self, month: FiscalMonth, snapshots: Vec<LedgerSnapshot>) {
        for snapshot in snapshots {
            let slot = match self.index.get(&snapshot.name) {
                Some(slot) => *slot,
                None => {
                    self.index.insert(snapshot.name.clone(), self.records.len());
                    self.records.push(MonthWiseLedgerRecord {
                        account_name: snapshot.name,
                        primary_group: snapshot.primary_group,
                        opening_balance: snapshot.opening,
                        monthly_balances: BTreeMap::new(),
                        is_revenue: snapshot.is_revenue,
                    });
                    self.records.len() - 1
                }
            };
            self.records[slot]
                .monthly_balances
                .insert(month, snapshot.closing);
        }
    }

    /// Zero-fill months a ledger was absent from and drop inactive ledgers
    fn finish(self, months: &[FiscalMonth]) -> Vec<MonthWiseLedgerRecord> {
        self.records
            .into_iter()
            .map(|mut record| {
                for month in months {
                    record.monthly_balances.entry(*month).or_insert(Decimal::ZERO);
                }
                record
            })
            .filter(MonthWiseLedgerRecord::has_activity)
            .collect()
    }
}

/// Runs the bulk query and, when it looks broken, the per-month fallback
#[derive(Clone)]
pub struct MonthWiseFetcher {
    transport: RequestTransport,
    anomaly: AnomalyConfig,
}

impl MonthWiseFetcher {
    /// Create new fetcher
    pub fn new(transport: RequestTransport, anomaly: AnomalyConfig) -> Self {
        Self { transport, anomaly }
    }

    /// Fetch balances for April through `target` of the financial year
    /// starting in `fy_start_year`.
    ///
    /// Transport failures of the bulk query are returned as is; only a bulk
    /// result judged anomalous triggers the fallback.
    pub async fn fetch(
        &self,
        session_code: &str,
        cancel: &CancellationToken,
        fy_start_year: i32,
        target: FiscalMonth,
    ) -> Result<MonthWiseReport> {
        let months = target.through().to_vec();
        let request = query::month_wise_request(fy_start_year, target)?;

        let xml = match self.transport.send(session_code, &request, cancel).await? {
            Delivery::Response(xml) => xml,
            Delivery::Cancelled => return Err(Error::Cancelled),
        };

        let anomaly = match parser::parse_month_wise(&xml, &months) {
            Ok(parsed) => match detect_anomaly(&parsed, &months, &self.anomaly) {
                None => {
                    info!(
                        ledgers = parsed.lines.len(),
                        months = months.len(),
                        "Month-wise data fetched"
                    );
                    return Ok(MonthWiseReport {
                        fy_start_year,
                        target_month: target,
                        months,
                        lines: parsed.lines,
                        source: MonthWiseSource::Bulk,
                    });
                }
                Some(anomaly) => {
                    debug!(
                        ledgers = parsed.ledger_count,
                        active = parsed.lines.len(),
                        month_tag_found = parsed.month_tag_found,
                        nonzero_month_found = parsed.nonzero_month_found,
                        "Bulk month-wise result rejected"
                    );
                    anomaly
                }
            },
            Err(e) => {
                warn!(error = %e, "Bulk month-wise response unparseable");
                Anomaly::Unparseable
            }
        };

        MONTH_WISE_FALLBACKS
            .with_label_values(&[anomaly.as_str()])
            .inc();
        info!(%anomaly, "Using per-month fallback for month-wise data");

        let lines = self
            .fallback(session_code, cancel, &query::month_schedule(fy_start_year, target))
            .await?;
        if lines.is_empty() {
            return Err(Error::Transport(
                "No ledgers returned for month-wise period".to_string(),
            ));
        }

        info!(ledgers = lines.len(), months = months.len(), "Month-wise fallback complete");
        Ok(MonthWiseReport {
            fy_start_year,
            target_month: target,
            months,
            lines,
            source: MonthWiseSource::Fallback,
        })
    }

    async fn fallback(
        &self,
        session_code: &str,
        cancel: &CancellationToken,
        schedule: &[MonthEnd],
    ) -> Result<Vec<MonthWiseLedgerRecord>> {
        let mut merge = MonthMerge::default();

        for month_end in schedule {
            let request = query::ledger_balance_request(month_end)?;
            let xml = match self.transport.send(session_code, &request, cancel).await? {
                Delivery::Response(xml) => xml,
                Delivery::Cancelled => return Err(Error::Cancelled),
            };

            match parser::parse_ledger_snapshots(&xml) {
                Ok(snapshots) => {
                    debug!(
                        month = %month_end.month,
                        date = %month_end.compact_date(),
                        ledgers = snapshots.len(),
                        "Month snapshot merged"
                    );
                    merge.absorb(month_end.month, snapshots);
                }
                Err(e) => warn!(month = %month_end.month, error = %e, "Skipping unreadable month snapshot"),
            }
        }

        let months: Vec<FiscalMonth> = schedule.iter().map(|m| m.month).collect();
        Ok(merge.finish(&months))
    }
}
