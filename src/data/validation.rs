//! Per-field input checks. Every input type collects its failures into a
//! [`Validator`] and reports them all at once.

use std::fmt::Display;

use chrono::NaiveTime;
use regex::Regex;

use crate::resp::problem::{problems, FieldError, Problem};

lazy_static! {
    pub static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    pub static ref CLOCK_TIME: Regex = Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").unwrap();
    pub static ref COURSE_CODE: Regex = Regex::new(r"^[A-Z0-9-]{2,12}$").unwrap();
    pub static ref SECTION_LETTER: Regex = Regex::new(r"^[A-Z]$").unwrap();
    pub static ref DOCUMENT_NUMBER: Regex = Regex::new(r"^[0-9A-Z]{6,15}$").unwrap();
    pub static ref PHONE: Regex = Regex::new(r"^\+?[0-9 -]{6,20}$").unwrap();
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Validator {
        Validator::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: impl ToString) -> &mut Validator {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Validator {
        self.check(!value.trim().is_empty(), field, "is required")
    }

    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Validator {
        let len = value.trim().chars().count();
        if len == 0 && min > 0 {
            return self.required(field, value);
        }
        self.check(
            (min..=max).contains(&len),
            field,
            format!("must be between {} and {} characters long", min, max),
        )
    }

    pub fn range<T: PartialOrd + Display>(&mut self, field: &str, value: T, min: T, max: T) -> &mut Validator {
        let message = format!("must be between {} and {}", min, max);
        self.check(value >= min && value <= max, field, message)
    }

    pub fn pattern(&mut self, field: &str, value: &str, regex: &Regex, message: &str) -> &mut Validator {
        self.check(regex.is_match(value), field, message)
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Validator {
        self.pattern(field, value.trim(), &EMAIL, "must be a valid e-mail address")
    }

    pub fn optional_phone(&mut self, field: &str, value: Option<&str>) -> &mut Validator {
        match value {
            Some(phone) => self.pattern(field, phone, &PHONE, "must be a valid phone number"),
            None => self,
        }
    }

    /// Checks an `HH:MM` clock time.
    pub fn clock_time(&mut self, field: &str, value: &str) -> &mut Validator {
        self.pattern(field, value, &CLOCK_TIME, "must be a time in HH:MM format")
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&mut self) -> Result<(), Problem> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(problems::validation(std::mem::take(&mut self.errors)))
        }
    }
}

/// Parses a value already accepted by [`CLOCK_TIME`].
pub fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    if CLOCK_TIME.is_match(value) {
        NaiveTime::parse_from_str(value, "%H:%M").ok()
    } else {
        None
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_failure() {
        let problem = Validator::new()
            .required("name", "  ")
            .email("email", "not-an-email")
            .range("grade", 9, 1, 6)
            .finish()
            .unwrap_err();

        let fields: Vec<&str> = problem.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "email", "grade"]);
    }

    #[test]
    fn clock_times_must_be_zero_padded() {
        assert!(parse_clock_time("07:45").is_some());
        assert!(parse_clock_time("7:45").is_none());
        assert!(parse_clock_time("24:00").is_none());
        assert!(parse_clock_time("12:60").is_none());
    }

    #[test]
    fn course_codes_are_upper_case() {
        assert!(COURSE_CODE.is_match("MAT-101"));
        assert!(!COURSE_CODE.is_match("mat101"));
        assert!(!COURSE_CODE.is_match("M"));
    }

    #[test]
    fn valid_input_passes() {
        assert!(Validator::new()
            .length("name", "Ana", 2, 50)
            .email("email", "ana@school.org")
            .optional_phone("phone", None)
            .finish()
            .is_ok());
    }
}
