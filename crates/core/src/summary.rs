//! Aggregate counts over a set of issues for the admin overview.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::category::IssueCategory;
use crate::issue::Issue;
use crate::scoring::CriticalityLevel;
use crate::status::IssueStatus;

/// Open-issue counts by criticality bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CriticalityBreakdown {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

/// Overview of the issue set.
///
/// `by_criticality` and `by_category` only count open issues; `by_status`
/// counts every issue so resolved work stays visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueSummary {
    pub total: usize,
    pub total_active: usize,
    pub by_criticality: CriticalityBreakdown,
    pub by_status: BTreeMap<IssueStatus, usize>,
    pub by_category: BTreeMap<IssueCategory, usize>,
}

/// Build an [`IssueSummary`]. Every status and category appears as a key,
/// with zero when absent.
pub fn summarize(issues: &[Issue]) -> IssueSummary {
    let mut summary = IssueSummary {
        total: issues.len(),
        by_status: IssueStatus::ALL.iter().map(|s| (*s, 0)).collect(),
        by_category: IssueCategory::ALL.iter().map(|c| (*c, 0)).collect(),
        ..Default::default()
    };

    for issue in issues {
        *summary.by_status.entry(issue.status).or_default() += 1;
        if !issue.is_open() {
            continue;
        }
        summary.total_active += 1;
        *summary.by_category.entry(issue.category).or_default() += 1;
        match CriticalityLevel::of(issue.criticality) {
            CriticalityLevel::Low => summary.by_criticality.low += 1,
            CriticalityLevel::Medium => summary.by_criticality.medium += 1,
            CriticalityLevel::High => summary.by_criticality.high += 1,
        }
    }

    summary
}
