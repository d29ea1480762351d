//! Attendance reports: per-section month overview and per-student summary.

use std::collections::BTreeMap;

use bson::{doc, Document};
use chrono::{Datelike, NaiveDate};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::find_all;
use crate::data::section::db::{self as section_db, SectionDbExt};
use crate::data::section::SectionSummary;
use crate::resp::problem::{problems, Problem};
use crate::util::{bson_uuid, date_key};

use super::db::AttendanceDbExt;
use super::AttendanceStatus;

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, ToSchema)]
pub struct StatusCounts {
    pub present: u64,
    pub absent: u64,
    pub late: u64,
    pub justified: u64,
    pub total: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus, n: u64) {
        match status {
            AttendanceStatus::Present => self.present += n,
            AttendanceStatus::Absent => self.absent += n,
            AttendanceStatus::Late => self.late += n,
            AttendanceStatus::Justified => self.justified += n,
        }
        self.total += n;
    }

    /// Percentage of records counted as attended, rounded to two decimals.
    pub fn attendance_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rate = (self.present + self.late) as f64 * 100.0 / self.total as f64;
        (rate * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DayReport {
    pub date: String,
    pub counts: StatusCounts,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MonthlyReport {
    pub section: SectionSummary,
    pub year: i32,
    pub month: u32,
    pub days: Vec<DayReport>,
    pub totals: StatusCounts,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportKey {
    pub date: String,
    pub status: AttendanceStatus,
}

/// One `$group` output row.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "_id")]
    pub key: ReportKey,
    pub count: i64,
}

/// `[first day of month, first day of next month)`.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), Problem> {
    let invalid = || problems::bad_request("Invalid month.").field("month", "must be between 1 and 12");
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    Ok((start, next.ok_or_else(invalid)?))
}

pub fn monthly_pipeline(section: Uuid, start: NaiveDate, end: NaiveDate) -> Vec<Document> {
    grouped_pipeline(doc! {
        "section": bson_uuid(section),
        "date": { "$gte": date_key(start), "$lt": date_key(end) },
    })
}

/// Detail counts per (date, status) over the matching documents.
pub fn grouped_pipeline(matching: Document) -> Vec<Document> {
    vec![
        doc! { "$match": matching },
        doc! { "$unwind": "$details" },
        doc! { "$group": {
            "_id": { "date": "$date", "status": "$details.status" },
            "count": { "$sum": 1 },
        } },
    ]
}

/// Folds grouped rows into per-day counts ordered by date, plus totals.
pub fn fold_rows(rows: impl IntoIterator<Item = ReportRow>) -> (Vec<DayReport>, StatusCounts) {
    let mut by_day: BTreeMap<String, StatusCounts> = BTreeMap::new();
    let mut totals = StatusCounts::default();

    for row in rows {
        let n = row.count.max(0) as u64;
        by_day.entry(row.key.date).or_default().add(row.key.status, n);
        totals.add(row.key.status, n);
    }

    let days = by_day
        .into_iter()
        .map(|(date, counts)| DayReport {
            date,
            attendance_rate: counts.attendance_rate(),
            counts,
        })
        .collect();
    (days, totals)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudentRecord {
    pub date: NaiveDate,
    pub section: Uuid,
    pub course_schedule: Uuid,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudentSummary {
    pub student: Uuid,
    pub counts: StatusCounts,
    pub attendance_rate: f64,
    pub records: Vec<StudentRecord>,
}

pub trait AttendanceReportExt {
    async fn monthly_report(&self, section: Uuid, year: i32, month: u32) -> Result<MonthlyReport, Problem>;
    async fn student_summary(&self, student: Uuid, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<StudentSummary, Problem>;
    /// Counts over every section for a single date.
    async fn day_counts(&self, date: NaiveDate) -> Result<StatusCounts, Problem>;
}

async fn grouped_rows(db: &Database, pipeline: Vec<Document>) -> Result<Vec<ReportRow>, Problem> {
    let rows: Vec<Document> = db.attendance().aggregate(pipeline, None).await?.try_collect().await?;
    Ok(rows
        .into_iter()
        .map(bson::from_document::<ReportRow>)
        .collect::<Result<Vec<_>, _>>()?)
}

impl AttendanceReportExt for Database {
    async fn monthly_report(&self, section: Uuid, year: i32, month: u32) -> Result<MonthlyReport, Problem> {
        let section = self
            .get_section(section)
            .await?
            .ok_or_else(|| section_db::problem::not_found(section))?;
        let (start, end) = month_bounds(year, month)?;

        let rows = grouped_rows(self, monthly_pipeline(section.id, start, end)).await?;
        let (days, totals) = fold_rows(rows);
        Ok(MonthlyReport {
            section: SectionSummary::from(&section),
            year: start.year(),
            month: start.month(),
            days,
            attendance_rate: totals.attendance_rate(),
            totals,
        })
    }

    async fn student_summary(&self, student: Uuid, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<StudentSummary, Problem> {
        let mut filter = doc! { "details.student": bson_uuid(student) };
        if let Some(range) = crate::data::filter::string_range(from.map(date_key), to.map(date_key), true) {
            filter.insert("date", range);
        }

        let records = find_all(&self.attendance(), filter, doc! { "date": 1 }).await?;
        let mut counts = StatusCounts::default();
        let records: Vec<StudentRecord> = records
            .into_iter()
            .filter_map(|attendance| {
                let detail = attendance.detail_of(student)?.clone();
                counts.add(detail.status, 1);
                Some(StudentRecord {
                    date: attendance.date,
                    section: attendance.section,
                    course_schedule: attendance.course_schedule,
                    status: detail.status,
                    notes: detail.notes,
                })
            })
            .collect();

        Ok(StudentSummary {
            student,
            attendance_rate: counts.attendance_rate(),
            counts,
            records,
        })
    }

    async fn day_counts(&self, date: NaiveDate) -> Result<StatusCounts, Problem> {
        let rows = grouped_rows(self, grouped_pipeline(doc! { "date": date_key(date) })).await?;
        Ok(fold_rows(rows).1)
    }
}
