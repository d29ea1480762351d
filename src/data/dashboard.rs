use bson::doc;
use chrono::{NaiveDate, Utc};
use mongodb::Database;
use utoipa::ToSchema;

use crate::data::attendance::report::{AttendanceReportExt, StatusCounts};
use crate::data::enrollment::EnrollmentStatus;
use crate::data::incident::IncidentStatus;
use crate::data::school_year::db::SchoolYearDbExt;
use crate::data::school_year::SchoolYear;
use crate::data::{count, course, enrollment, incident, section, staff, user, RecordStatus};
use crate::resp::problem::Problem;
use crate::role::Role;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardStats {
    pub students: u64,
    pub teachers: u64,
    pub staff: u64,
    pub sections: u64,
    pub courses: u64,
    pub active_enrollments: u64,
    pub open_incidents: u64,
    pub school_year: Option<SchoolYear>,
    pub date: NaiveDate,
    pub attendance_today: StatusCounts,
    pub attendance_rate_today: f64,
}

pub async fn dashboard_stats(db: &Database) -> Result<DashboardStats, Problem> {
    let active = RecordStatus::Active;
    let today = Utc::now().date_naive();

    let students = count(db, user::USER_COLLECTION_NAME, doc! { "role": Role::Student, "status": active }).await?;
    let teachers = count(db, user::USER_COLLECTION_NAME, doc! { "role": Role::Teacher, "status": active }).await?;
    let staff = count(db, staff::STAFF_COLLECTION_NAME, doc! { "status": active }).await?;
    let sections = count(db, section::SECTION_COLLECTION_NAME, doc! { "status": active }).await?;
    let courses = count(db, course::COURSE_COLLECTION_NAME, doc! { "status": active }).await?;
    let active_enrollments = count(
        db,
        enrollment::ENROLLMENT_COLLECTION_NAME,
        doc! { "status": EnrollmentStatus::Active },
    )
    .await?;
    let open_incidents = count(
        db,
        incident::INCIDENT_COLLECTION_NAME,
        doc! { "status": { "$ne": IncidentStatus::Closed } },
    )
    .await?;
    let attendance_today = db.day_counts(today).await?;

    Ok(DashboardStats {
        students,
        teachers,
        staff,
        sections,
        courses,
        active_enrollments,
        open_incidents,
        school_year: db.active_school_year().await?,
        date: today,
        attendance_rate_today: attendance_today.attendance_rate(),
        attendance_today,
    })
}
