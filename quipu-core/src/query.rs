//! Listing helpers for scans and jobs: filtering, ordering and pagination.
//!
//! Query parameters arrive as loose strings. Unknown status filters are
//! dropped and unknown ordering fields fall back to the default ordering,
//! so a listing never fails because of a bad parameter.

use std::cmp::Ordering;

use quipu_model::{Scan, ScanJob, ScanStatus, ScanType};
use serde::Serialize;

/// Page size used when none is requested.
pub const DEFAULT_PAGE_SIZE: usize = 10;
/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Requested page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page number.
    pub page: usize,
    /// Items per page.
    pub page_size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Clamps the page to at least 1 and the size into `1..=MAX_PAGE_SIZE`.
    ///
    /// ```
    /// use quipu_core::query::{MAX_PAGE_SIZE, Pagination};
    ///
    /// let pagination = Pagination::new(Some(0), Some(5_000));
    /// assert_eq!(pagination.page, 1);
    /// assert_eq!(pagination.page_size, MAX_PAGE_SIZE);
    ///
    /// let page = pagination.paginate(vec!["a", "b"]);
    /// assert_eq!(page.count, 2);
    /// assert_eq!(page.results, ["a", "b"]);
    /// ```
    pub fn new(page: Option<usize>, page_size: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Slices an already ordered list. A page past the end is empty.
    pub fn paginate<T>(&self, items: Vec<T>) -> Page<T> {
        let count = items.len();
        let skip = (self.page - 1).saturating_mul(self.page_size);
        let results = items.into_iter().skip(skip).take(self.page_size).collect();
        Page {
            count,
            results,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Total number of matching items across all pages.
    pub count: usize,
    /// Items on this page.
    pub results: Vec<T>,
    /// 1-based page number.
    pub page: usize,
    /// Items per page.
    pub page_size: usize,
}

impl<T> Page<T> {
    /// Converts the items while keeping the paging figures.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            results: self.results.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// A field plus direction, parsed from `field` or `-field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey<F> {
    /// Field to order by.
    pub field: F,
    /// Whether the order is reversed.
    pub descending: bool,
}

impl<F: Copy> SortKey<F> {
    fn parse(raw: Option<&str>, default: F, lookup: fn(&str) -> Option<F>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self {
                field: default,
                descending: false,
            };
        };
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        match lookup(name) {
            Some(field) => Self { field, descending },
            None => Self {
                field: default,
                descending: false,
            },
        }
    }

    fn direct(&self, ordering: Ordering) -> Ordering {
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Fields a job listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrderField {
    /// Job id.
    Id,
    /// Scan type name.
    ScanType,
    /// Status name.
    Status,
    /// Start time; unstarted jobs first.
    StartTime,
    /// End time; unfinished jobs first.
    EndTime,
}

impl JobOrderField {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "scan_type" => Some(Self::ScanType),
            "status" => Some(Self::Status),
            "start_time" => Some(Self::StartTime),
            "end_time" => Some(Self::EndTime),
            _ => None,
        }
    }
}

/// Filter, order and page for listing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobQuery {
    /// Only jobs in this status.
    pub status: Option<ScanStatus>,
    /// Sort order; ties break on id.
    pub ordering: SortKey<JobOrderField>,
    /// Page to return.
    pub pagination: Pagination,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self::from_params(None, None, Pagination::default())
    }
}

impl JobQuery {
    /// Builds a query from raw parameters. Unknown values are ignored.
    pub fn from_params(
        status: Option<&str>,
        ordering: Option<&str>,
        pagination: Pagination,
    ) -> Self {
        Self {
            status: status.and_then(|raw| raw.parse().ok()),
            ordering: SortKey::parse(ordering, JobOrderField::Id, JobOrderField::lookup),
            pagination,
        }
    }

    /// Filters, orders and pages `jobs`.
    pub fn apply(&self, jobs: Vec<ScanJob>) -> Page<ScanJob> {
        let mut jobs: Vec<ScanJob> = jobs
            .into_iter()
            .filter(|job| self.status.is_none_or(|status| job.status == status))
            .collect();

        let key = self.ordering;
        jobs.sort_by(|a, b| {
            let primary = match key.field {
                JobOrderField::Id => Ordering::Equal,
                JobOrderField::ScanType => a.scan_type.as_str().cmp(b.scan_type.as_str()),
                JobOrderField::Status => a.status.as_str().cmp(b.status.as_str()),
                JobOrderField::StartTime => a.start_time.cmp(&b.start_time),
                JobOrderField::EndTime => a.end_time.cmp(&b.end_time),
            };
            match primary {
                Ordering::Equal if key.field == JobOrderField::Id => key.direct(a.id.cmp(&b.id)),
                Ordering::Equal => a.id.cmp(&b.id),
                other => key.direct(other),
            }
        });

        self.pagination.paginate(jobs)
    }
}

/// Fields a scan listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrderField {
    /// Scan id.
    Id,
    /// Scan name.
    Name,
    /// Scan type name.
    ScanType,
}

impl ScanOrderField {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "scan_type" => Some(Self::ScanType),
            _ => None,
        }
    }
}

/// Filter, order and page for listing scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanQuery {
    /// Only scans of this type.
    pub scan_type: Option<ScanType>,
    /// Sort order. Defaults to name.
    pub ordering: SortKey<ScanOrderField>,
    /// Page to return.
    pub pagination: Pagination,
}

impl Default for ScanQuery {
    fn default() -> Self {
        Self::from_params(None, None, Pagination::default())
    }
}

impl ScanQuery {
    /// Builds a query from raw parameters. Unknown values are ignored.
    pub fn from_params(
        scan_type: Option<&str>,
        ordering: Option<&str>,
        pagination: Pagination,
    ) -> Self {
        Self {
            scan_type: scan_type.and_then(|raw| raw.parse().ok()),
            ordering: SortKey::parse(ordering, ScanOrderField::Name, ScanOrderField::lookup),
            pagination,
        }
    }

    /// Filters, orders and pages `scans`.
    pub fn apply(&self, scans: Vec<Scan>) -> Page<Scan> {
        let mut scans: Vec<Scan> = scans
            .into_iter()
            .filter(|scan| self.scan_type.is_none_or(|kind| scan.scan_type == kind))
            .collect();

        let key = self.ordering;
        scans.sort_by(|a, b| {
            let primary = match key.field {
                ScanOrderField::Id => a.id.cmp(&b.id),
                ScanOrderField::Name => a.name.cmp(&b.name),
                ScanOrderField::ScanType => a.scan_type.as_str().cmp(b.scan_type.as_str()),
            };
            key.direct(primary).then_with(|| a.id.cmp(&b.id))
        });

        self.pagination.paginate(scans)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use quipu_model::{ScanId, ScanJobId};

    use super::*;

    fn job(id: u64, status: ScanStatus, started: Option<i64>) -> ScanJob {
        ScanJob {
            id: ScanJobId(id),
            scan_id: ScanId(1),
            scan_type: ScanType::Inspect,
            status,
            status_message: None,
            max_concurrency: 5,
            disabled_optional_products: BTreeSet::new(),
            sources: Vec::new(),
            tasks: Vec::new(),
            start_time: started.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            end_time: None,
            connection_results: None,
        }
    }

    fn ids(page: &Page<ScanJob>) -> Vec<u64> {
        page.results.iter().map(|job| job.id.get()).collect()
    }

    #[test]
    fn status_filter_is_case_insensitive_and_ignores_garbage() {
        let jobs = vec![
            job(1, ScanStatus::Completed, None),
            job(2, ScanStatus::Running, None),
            job(3, ScanStatus::Completed, None),
        ];

        let query = JobQuery::from_params(Some("COMPLETED"), None, Pagination::default());
        assert_eq!(ids(&query.apply(jobs.clone())), [1, 3]);

        let query = JobQuery::from_params(Some("bogus"), None, Pagination::default());
        assert_eq!(query.status, None);
        assert_eq!(ids(&query.apply(jobs)), [1, 2, 3]);
    }

    #[test]
    fn descending_start_time_breaks_ties_by_id() {
        let jobs = vec![
            job(1, ScanStatus::Completed, Some(100)),
            job(2, ScanStatus::Completed, Some(300)),
            job(3, ScanStatus::Completed, Some(300)),
            job(4, ScanStatus::Created, None),
        ];

        let query = JobQuery::from_params(None, Some("-start_time"), Pagination::default());
        assert_eq!(ids(&query.apply(jobs)), [2, 3, 1, 4]);
    }

    #[test]
    fn unknown_ordering_falls_back_to_id() {
        let query = JobQuery::from_params(None, Some("-colour"), Pagination::default());
        assert_eq!(query.ordering.field, JobOrderField::Id);
        assert!(!query.ordering.descending);

        let jobs = vec![job(3, ScanStatus::Created, None), job(1, ScanStatus::Created, None)];
        assert_eq!(ids(&query.apply(jobs)), [1, 3]);
    }

    #[test]
    fn pagination_counts_everything_and_slices_one_page() {
        let jobs: Vec<ScanJob> = (1..=25).map(|id| job(id, ScanStatus::Completed, None)).collect();
        let query = JobQuery::from_params(None, Some("-id"), Pagination::new(Some(3), None));

        let page = query.apply(jobs);
        assert_eq!(page.count, 25);
        assert_eq!(page.page, 3);
        assert_eq!(ids(&page), [5, 4, 3, 2, 1]);
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(Pagination::new(Some(0), Some(0)), Pagination { page: 1, page_size: 1 });
        assert_eq!(Pagination::new(None, Some(5000)).page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn scans_default_to_name_order_and_filter_by_type() {
        let scan = |id: u64, name: &str, scan_type| Scan {
            id: ScanId(id),
            name: name.to_string(),
            scan_type,
            sources: Vec::new(),
            max_concurrency: 1,
            disabled_optional_products: BTreeSet::new(),
        };
        let scans = vec![
            scan(1, "zeta", ScanType::Inspect),
            scan(2, "alpha", ScanType::Connect),
            scan(3, "mid", ScanType::Inspect),
        ];

        let names = |page: Page<Scan>| page.results.into_iter().map(|s| s.name).collect::<Vec<_>>();

        assert_eq!(names(ScanQuery::default().apply(scans.clone())), ["alpha", "mid", "zeta"]);
        let inspect = ScanQuery::from_params(Some("inspect"), Some("-id"), Pagination::default());
        assert_eq!(names(inspect.apply(scans)), ["mid", "zeta"]);
    }
}
