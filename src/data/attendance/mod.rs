use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;
pub mod report;

use crate::data::section::SectionSummary;
use crate::data::user::UserSummary;
use crate::data::Populated;

pub static ATTENDANCE_COLLECTION_NAME: &str = "attendance";

string_enum! {
    pub enum AttendanceStatus {
        Present => "present",
        Absent => "absent",
        Late => "late",
        Justified => "justified",
    }
}

impl AttendanceStatus {
    /// Late arrivals still count as attended.
    pub fn attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceDetail {
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student: Uuid,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Attendance taken for one course schedule on one date.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Attendance {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub section: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub course_schedule: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub teacher: Uuid,
    #[serde(default)]
    pub details: Vec<AttendanceDetail>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DetailChange {
    Created,
    Added,
    Updated,
}

impl Attendance {
    pub fn new(date: NaiveDate, section: Uuid, course_schedule: Uuid, teacher: Uuid) -> Attendance {
        let now = Utc::now();
        Attendance {
            id: Uuid::new_v4(),
            date,
            section,
            course_schedule,
            teacher,
            details: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the student's entry or appends a new one.
    pub fn upsert_detail(&mut self, detail: AttendanceDetail) -> DetailChange {
        self.updated_at = Utc::now();
        match self.details.iter_mut().find(|d| d.student == detail.student) {
            Some(existing) => {
                *existing = detail;
                DetailChange::Updated
            }
            None => {
                self.details.push(detail);
                DetailChange::Added
            }
        }
    }

    pub fn detail_of(&self, student: Uuid) -> Option<&AttendanceDetail> {
        self.details.iter().find(|d| d.student == student)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DetailView {
    #[schema(value_type = Object)]
    pub student: Populated<UserSummary>,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttendanceView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub date: NaiveDate,
    #[schema(value_type = Object)]
    pub section: Populated<SectionSummary>,
    pub course_schedule: Uuid,
    #[schema(value_type = Object)]
    pub teacher: Populated<UserSummary>,
    pub details: Vec<DetailView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(student: Uuid, status: AttendanceStatus) -> AttendanceDetail {
        AttendanceDetail {
            student,
            status,
            notes: None,
        }
    }

    #[test]
    fn upsert_replaces_existing_student_entry() {
        let date = NaiveDate::from_ymd_opt(2024, 4, 8).unwrap();
        let mut attendance = Attendance::new(date, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let ana = Uuid::new_v4();
        let luis = Uuid::new_v4();

        assert_eq!(attendance.upsert_detail(detail(ana, AttendanceStatus::Absent)), DetailChange::Added);
        assert_eq!(attendance.upsert_detail(detail(luis, AttendanceStatus::Present)), DetailChange::Added);
        assert_eq!(attendance.upsert_detail(detail(ana, AttendanceStatus::Late)), DetailChange::Updated);

        assert_eq!(attendance.details.len(), 2);
        assert_eq!(attendance.detail_of(ana).unwrap().status, AttendanceStatus::Late);
    }

    #[test]
    fn late_counts_as_attended() {
        assert!(AttendanceStatus::Late.attended());
        assert!(AttendanceStatus::Present.attended());
        assert!(!AttendanceStatus::Justified.attended());
    }

    #[test]
    fn dates_are_stored_as_plain_strings() {
        let date = NaiveDate::from_ymd_opt(2024, 4, 8).unwrap();
        let attendance = Attendance::new(date, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let doc = bson::to_document(&attendance).unwrap();
        assert_eq!(doc.get_str("date").unwrap(), "2024-04-08");
    }
}
