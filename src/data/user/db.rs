use std::collections::HashMap;

use bson::{doc, Document};
use chrono::Utc;
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::validation::{normalize_email, Validator};
use crate::data::{enrollment, filter, find_all, find_page, schedule, RecordStatus};
use crate::middleware::paging::PageState;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::util::{bson_uuids, contains_ci};

use super::{PasswordHash, User, USER_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn email_taken(email: impl ToString) -> Problem {
        problems::bad_request("Email already registered.").field("email", "is already registered")
            .insert_str("email", email)
    }

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("User", id)
    }

    #[inline]
    pub fn bad_login() -> Problem {
        problems::unauthorized("Bad email or password.")
    }

    #[inline]
    pub fn inactive() -> Problem {
        problems::forbidden("User account is inactive.")
    }

    #[inline]
    pub fn wrong_role(field: &str, expected: crate::role::Role) -> Problem {
        problems::bad_request(format!("Referenced user is not an active {}.", expected))
            .field(field, format!("must reference an active {}", expected))
    }
}

const MIN_PASSWORD: usize = 8;
const MAX_PASSWORD: usize = 128;

fn validate_password(v: &mut Validator, field: &str, password: &str) {
    v.check(
        (MIN_PASSWORD..=MAX_PASSWORD).contains(&password.len()),
        field,
        format!(
            "must be between {} and {} characters long",
            MIN_PASSWORD, MAX_PASSWORD
        ),
    );
}

/// Self-service registration.
#[derive(Clone, Deserialize, ToSchema)]
pub struct SignupData {
    pub name: String,
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for SignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignupData:{}", self.email)
    }
}

impl SignupData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        v.length("name", &self.name, 2, 100).email("email", &self.email);
        validate_password(&mut v, "password", &self.password);
        v.finish()
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct LoginData {
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for LoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoginData:{}", self.email)
    }
}

impl LoginData {
    pub fn validate(&self) -> Result<(), Problem> {
        Validator::new()
            .required("email", &self.email)
            .required("password", &self.password)
            .finish()
    }
}

/// Account created by an administrator.
#[derive(Clone, Deserialize, ToSchema)]
pub struct UserCreateData {
    pub name: String,
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub status: Option<RecordStatus>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl std::fmt::Debug for UserCreateData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserCreateData:{}:{}", self.email, self.role)
    }
}

impl UserCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        v.length("name", &self.name, 2, 100)
            .email("email", &self.email)
            .optional_phone("phone", self.phone.as_deref());
        validate_password(&mut v, "password", &self.password);
        v.finish()
    }
}

impl From<SignupData> for UserCreateData {
    fn from(value: SignupData) -> Self {
        UserCreateData {
            name: value.name,
            email: value.email,
            password: value.password,
            role: Role::Student,
            status: None,
            phone: None,
        }
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UserUpdateData {
    pub name: Option<String>,
    #[schema(format = "email")]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub status: Option<RecordStatus>,
    pub phone: Option<String>,
}

impl UserUpdateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        if let Some(name) = &self.name {
            v.length("name", name, 2, 100);
        }
        if let Some(email) = &self.email {
            v.email("email", email);
        }
        v.optional_phone("phone", self.phone.as_deref());
        v.finish()
    }

    /// Role and status changes are reserved to administrators.
    pub fn touches_privileges(&self) -> bool {
        self.role.is_some() || self.status.is_some()
    }

    fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name.trim().to_string();
        }
        if let Some(email) = self.email {
            user.email = normalize_email(&email);
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(status) = self.status {
            user.status = status;
        }
        if self.phone.is_some() {
            user.phone = self.phone;
        }
        user.updated_at = Utc::now();
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct PasswordChangeData {
    /// Required unless an administrator resets another user's password.
    #[serde(default)]
    #[schema(format = "password")]
    pub current_password: Option<String>,
    #[schema(format = "password")]
    pub new_password: String,
}

impl std::fmt::Debug for PasswordChangeData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordChangeData")
    }
}

impl PasswordChangeData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        validate_password(&mut v, "new_password", &self.new_password);
        v.finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<RecordStatus>,
    pub search: Option<String>,
}

impl UserFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(role) = self.role {
            filter.insert("role", role);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        if let Some(search) = &self.search {
            filter.insert(
                "$or",
                vec![
                    doc! { "name": contains_ci(search) },
                    doc! { "email": contains_ci(search) },
                ],
            );
        }
        filter
    }
}

pub trait UserDbExt {
    fn users(&self) -> Collection<User>;

    async fn create_user(&self, create_user: UserCreateData, cost: u32) -> Result<User, Problem>;
    async fn list_users(&self, filter: &UserFilter, page: &PageState) -> Result<(Vec<User>, u64), Problem>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem>;
    async fn login(&self, login: &LoginData) -> Result<User, Problem>;
    async fn update_user(&self, id: Uuid, update: UserUpdateData) -> Result<User, Problem>;
    async fn set_password(&self, id: Uuid, pw_hash: PasswordHash) -> Result<(), Problem>;
    async fn delete_user(&self, id: Uuid) -> Result<User, Problem>;

    /// Loads `id` and checks it is an active user with `role`; reports
    /// failures against `field`.
    async fn require_user_with_role(&self, id: Uuid, role: Role, field: &str) -> Result<User, Problem>;
    async fn users_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, User>, Problem>;
}

impl UserDbExt for Database {
    fn users(&self) -> Collection<User> {
        self.collection(USER_COLLECTION_NAME)
    }

    async fn create_user(&self, create_user: UserCreateData, cost: u32) -> Result<User, Problem> {
        if self.find_user_by_email(&create_user.email).await?.is_some() {
            return Err(problem::email_taken(&create_user.email));
        }

        let mut user = User::new(
            &create_user.name,
            &create_user.email,
            PasswordHash::new(&create_user.password, cost),
            create_user.role,
        );
        user.status = create_user.status.unwrap_or_default();
        user.phone = create_user.phone;

        self.users().insert_one(&user, None).await?;

        Ok(user)
    }

    async fn list_users(&self, filter: &UserFilter, page: &PageState) -> Result<(Vec<User>, u64), Problem> {
        find_page(&self.users(), filter.document(), page, doc! { "name": 1 }).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        Ok(self.users().find_one(filter::by_id(id), None).await?)
    }

    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem> {
        Ok(self
            .users()
            .find_one(doc! { "email": normalize_email(email.as_ref()) }, None)
            .await?)
    }

    async fn login(&self, login: &LoginData) -> Result<User, Problem> {
        let mut user = self
            .find_user_by_email(&login.email)
            .await?
            .ok_or_else(problem::bad_login)?;

        if !user.pw_hash.verify(&login.password) {
            return Err(problem::bad_login());
        }
        if !user.is_active() {
            return Err(problem::inactive());
        }

        let now = Utc::now();
        let last_login = bson::to_bson(&now)?;
        self.users()
            .update_one(
                filter::by_id(user.id),
                doc! { "$set": { "last_login": last_login } },
                None,
            )
            .await?;
        user.last_login = Some(now);

        Ok(user)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdateData) -> Result<User, Problem> {
        let mut user = self.get_user(id).await?.ok_or_else(|| problem::not_found(id))?;

        if let Some(email) = &update.email {
            if let Some(existing) = self.find_user_by_email(email).await? {
                if existing.id != id {
                    return Err(problem::email_taken(email));
                }
            }
        }

        update.apply(&mut user);
        self.users().replace_one(filter::by_id(id), &user, None).await?;

        Ok(user)
    }

    async fn set_password(&self, id: Uuid, pw_hash: PasswordHash) -> Result<(), Problem> {
        let updated_at = bson::to_bson(&Utc::now())?;
        let result = self
            .users()
            .update_one(
                filter::by_id(id),
                doc! { "$set": {
                    "pw_hash": pw_hash.to_string(),
                    "updated_at": updated_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(problem::not_found(id));
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<User, Problem> {
        use crate::resp::problem::problems;

        let enrollments = crate::data::count(
            self,
            enrollment::ENROLLMENT_COLLECTION_NAME,
            filter::by_ref("student", id),
        )
        .await?;
        if enrollments > 0 {
            return Err(problems::in_use("User", "enrollments", enrollments));
        }

        let schedules = crate::data::count(
            self,
            schedule::SCHEDULE_COLLECTION_NAME,
            filter::by_ref("teacher", id),
        )
        .await?;
        if schedules > 0 {
            return Err(problems::in_use("User", "course schedules", schedules));
        }

        self.users()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn require_user_with_role(&self, id: Uuid, role: Role, field: &str) -> Result<User, Problem> {
        match self.get_user(id).await? {
            Some(user) if user.role == role && user.is_active() => Ok(user),
            _ => Err(problem::wrong_role(field, role)),
        }
    }

    async fn users_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, User>, Problem> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let users = find_all(
            &self.users(),
            doc! { "_id": { "$in": bson_uuids(ids) } },
            doc! {},
        )
        .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_rejects_short_password_and_bad_email() {
        let data = SignupData {
            name: "Lucia".into(),
            email: "lucia".into(),
            password: "short".into(),
        };
        let problem = data.validate().unwrap_err();
        let fields: Vec<_> = problem.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "password"]);
    }

    #[test]
    fn signup_creates_students() {
        let data = SignupData {
            name: "Lucia".into(),
            email: "lucia@school.org".into(),
            password: "long-enough-pass".into(),
        };
        assert!(data.validate().is_ok());
        assert_eq!(UserCreateData::from(data).role, Role::Student);
    }

    #[test]
    fn debug_output_hides_passwords() {
        let data = LoginData {
            email: "a@b.co".into(),
            password: "hunter22".into(),
        };
        assert!(!format!("{:?}", data).contains("hunter22"));
    }

    #[test]
    fn update_applies_only_present_fields() {
        let mut user = User::new("Old", "old@school.org", PasswordHash::new("password1", 4), Role::Student);
        let update = UserUpdateData {
            name: Some(" New ".into()),
            status: Some(RecordStatus::Inactive),
            ..Default::default()
        };
        assert!(update.touches_privileges());

        update.apply(&mut user);
        assert_eq!(user.name, "New");
        assert_eq!(user.email, "old@school.org");
        assert_eq!(user.status, RecordStatus::Inactive);
        assert_eq!(user.role, Role::Student);
    }

    #[test]
    fn filter_builds_search_clause() {
        let filter = UserFilter {
            role: Some(Role::Teacher),
            status: None,
            search: Some("ana".into()),
        }
        .document();

        assert_eq!(filter.get_str("role").unwrap(), "teacher");
        assert_eq!(filter.get_array("$or").unwrap().len(), 2);
        assert!(filter.get("status").is_none());
    }
}
