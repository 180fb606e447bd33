use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const CONTACT_NUMBER_PATTERN: &str = r"^[0-9+\-\s()]{7,20}$";

/// A callback request as posted by the web form.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub contact_no: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
}

impl CallbackRequest {
    /// Checks the required fields in a fixed order and returns the first failure.
    pub fn validate(&self) -> Result<Submission<'_>, ValidationError> {
        let Some(name) = required(&self.name) else {
            return Err(ValidationError::MissingName);
        };
        let Some(organization) = required(&self.organization) else {
            return Err(ValidationError::MissingOrganization);
        };
        let Some(contact_no) = required(&self.contact_no) else {
            return Err(ValidationError::MissingContactNumber);
        };
        if !contact_number_regex().is_match(contact_no) {
            return Err(ValidationError::InvalidContactNumber);
        }

        Ok(Submission {
            name,
            organization,
            contact_no,
            email: required(&self.email),
            message: required(&self.message),
            source: required(&self.source),
        })
    }
}

/// Trimmed view of a request that passed validation. Blank optional fields are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission<'a> {
    pub name: &'a str,
    pub organization: &'a str,
    pub contact_no: &'a str,
    pub email: Option<&'a str>,
    pub message: Option<&'a str>,
    pub source: Option<&'a str>,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name is required")]
    MissingName,
    #[error("Organization name is required")]
    MissingOrganization,
    #[error("Contact number is required")]
    MissingContactNumber,
    #[error("Invalid contact number")]
    InvalidContactNumber,
}

fn required(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn contact_number_regex() -> &'static Regex {
    static CONTACT_NUMBER: OnceLock<Regex> = OnceLock::new();
    CONTACT_NUMBER.get_or_init(|| {
        Regex::new(CONTACT_NUMBER_PATTERN).expect("contact number pattern is a valid regex")
    })
}
