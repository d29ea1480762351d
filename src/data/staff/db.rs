use bson::{doc, Document};
use chrono::{NaiveDate, Utc};
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::user::db::UserDbExt;
use crate::data::validation::{normalize_email, Validator, DOCUMENT_NUMBER};
use crate::data::{filter, find_page, RecordStatus};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::util::{bson_uuid, contains_ci};

use super::{Staff, StaffLevel, StaffRole, STAFF_COLLECTION_NAME};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StaffInput {
    pub first_name: String,
    pub last_name: String,
    pub document_number: String,
    #[schema(format = "email")]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: StaffRole,
    pub level: StaffLevel,
    #[serde(default)]
    pub status: Option<RecordStatus>,
    #[serde(default)]
    pub user: Option<Uuid>,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
}

impl StaffInput {
    pub fn validate(&self) -> Result<(), Problem> {
        Validator::new()
            .length("first_name", &self.first_name, 2, 60)
            .length("last_name", &self.last_name, 2, 60)
            .pattern(
                "document_number",
                self.document_number.trim(),
                &DOCUMENT_NUMBER,
                "must be 6 to 15 digits or upper case letters",
            )
            .email("email", &self.email)
            .optional_phone("phone", self.phone.as_deref())
            .finish()
    }

    fn into_staff(self, id: Uuid, created_at: chrono::DateTime<Utc>) -> Staff {
        Staff {
            id,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            document_number: self.document_number.trim().to_string(),
            email: normalize_email(&self.email),
            phone: self.phone,
            role: self.role,
            level: self.level,
            status: self.status.unwrap_or_default(),
            user: self.user,
            hire_date: self.hire_date,
            created_at,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaffFilter {
    pub role: Option<StaffRole>,
    pub level: Option<StaffLevel>,
    pub status: Option<RecordStatus>,
    pub search: Option<String>,
}

impl StaffFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(role) = self.role {
            filter.insert("role", role);
        }
        if let Some(level) = self.level {
            filter.insert("level", level);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        if let Some(search) = &self.search {
            filter.insert(
                "$or",
                vec![
                    doc! { "first_name": contains_ci(search) },
                    doc! { "last_name": contains_ci(search) },
                    doc! { "document_number": contains_ci(search) },
                    doc! { "email": contains_ci(search) },
                ],
            );
        }
        filter
    }
}

pub trait StaffDbExt {
    fn staff(&self) -> Collection<Staff>;

    async fn list_staff(&self, filter: &StaffFilter, page: &PageState) -> Result<(Vec<Staff>, u64), Problem>;
    async fn get_staff(&self, id: Uuid) -> Result<Option<Staff>, Problem>;
    async fn create_staff(&self, input: StaffInput) -> Result<Staff, Problem>;
    async fn update_staff(&self, id: Uuid, input: StaffInput) -> Result<Staff, Problem>;
    async fn delete_staff(&self, id: Uuid) -> Result<Staff, Problem>;
}

impl StaffDbExt for Database {
    fn staff(&self) -> Collection<Staff> {
        self.collection(STAFF_COLLECTION_NAME)
    }

    async fn list_staff(&self, filter: &StaffFilter, page: &PageState) -> Result<(Vec<Staff>, u64), Problem> {
        find_page(
            &self.staff(),
            filter.document(),
            page,
            doc! { "last_name": 1, "first_name": 1 },
        )
        .await
    }

    async fn get_staff(&self, id: Uuid) -> Result<Option<Staff>, Problem> {
        Ok(self.staff().find_one(filter::by_id(id), None).await?)
    }

    async fn create_staff(&self, input: StaffInput) -> Result<Staff, Problem> {
        check_unique(self, &input, None).await?;
        let staff = input.into_staff(Uuid::new_v4(), Utc::now());

        self.staff().insert_one(&staff, None).await?;
        tracing::info!("Created staff record {}", staff.id);

        Ok(staff)
    }

    async fn update_staff(&self, id: Uuid, input: StaffInput) -> Result<Staff, Problem> {
        let existing = self
            .get_staff(id)
            .await?
            .ok_or_else(|| problems::not_found("Staff member", id))?;

        check_unique(self, &input, Some(id)).await?;
        let staff = input.into_staff(id, existing.created_at);

        self.staff().replace_one(filter::by_id(id), &staff, None).await?;
        Ok(staff)
    }

    async fn delete_staff(&self, id: Uuid) -> Result<Staff, Problem> {
        self.staff()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problems::not_found("Staff member", id))
    }
}

async fn check_unique(db: &Database, input: &StaffInput, id: Option<Uuid>) -> Result<(), Problem> {
    let mut v = Validator::new();

    let email_filter = filter::excluding(doc! { "email": normalize_email(&input.email) }, id);
    v.check(
        db.staff().count_documents(email_filter, None).await? == 0,
        "email",
        "is already registered",
    );

    let document_filter = filter::excluding(
        doc! { "document_number": input.document_number.trim() },
        id,
    );
    v.check(
        db.staff().count_documents(document_filter, None).await? == 0,
        "document_number",
        "is already registered",
    );

    if let Some(user) = input.user {
        v.check(db.get_user(user).await?.is_some(), "user", "must reference an existing user");

        let linked = filter::excluding(doc! { "user": bson_uuid(user) }, id);
        v.check(
            db.staff().count_documents(linked, None).await? == 0,
            "user",
            "is already linked to another staff record",
        );
    }

    v.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> StaffInput {
        StaffInput {
            first_name: " Rosa ".into(),
            last_name: "Quispe".into(),
            document_number: "45879612".into(),
            email: "Rosa.Quispe@School.org".into(),
            phone: None,
            role: StaffRole::Teacher,
            level: StaffLevel::Primary,
            status: None,
            user: None,
            hire_date: NaiveDate::from_ymd_opt(2020, 3, 1),
        }
    }

    #[test]
    fn valid_input_is_normalized() {
        let input = input();
        assert!(input.validate().is_ok());

        let staff = input.into_staff(Uuid::new_v4(), Utc::now());
        assert_eq!(staff.first_name, "Rosa");
        assert_eq!(staff.email, "rosa.quispe@school.org");
        assert_eq!(staff.status, RecordStatus::Active);
        assert_eq!(staff.full_name(), "Rosa Quispe");
    }

    #[test]
    fn document_number_format_is_checked() {
        let mut input = input();
        input.document_number = "12-34".into();
        let problem = input.validate().unwrap_err();
        assert_eq!(problem.errors[0].field, "document_number");
    }

    #[test]
    fn filter_combines_fields() {
        let filter = StaffFilter {
            role: Some(StaffRole::Psychologist),
            level: Some(StaffLevel::All),
            status: Some(RecordStatus::Active),
            search: None,
        }
        .document();
        assert_eq!(filter.get_str("role").unwrap(), "psychologist");
        assert_eq!(filter.get_str("level").unwrap(), "all");
        assert_eq!(filter.get_str("status").unwrap(), "active");
    }
}
