use serde::{Deserialize, Serialize};

use procura_core::{ContactId, DomainError, DomainResult, UserId};

/// Delivery address and phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub city: String,
    pub street: String,
    pub house: Option<String>,
    pub structure: Option<String>,
    pub building: Option<String>,
    pub apartment: Option<String>,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub details: ContactDetails,
}

/// Unvalidated contact input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContactDraft {
    pub city: Option<String>,
    pub street: Option<String>,
    pub house: Option<String>,
    pub structure: Option<String>,
    pub building: Option<String>,
    pub apartment: Option<String>,
    pub phone: Option<String>,
}

fn required(field: &str, value: Option<String>) -> DomainResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DomainError::validation(format!("{field} is required"))),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ContactDraft {
    pub fn into_details(self) -> DomainResult<ContactDetails> {
        Ok(ContactDetails {
            city: required("city", self.city)?,
            street: required("street", self.street)?,
            phone: required("phone", self.phone)?,
            house: optional(self.house),
            structure: optional(self.structure),
            building: optional(self.building),
            apartment: optional(self.apartment),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ContactDraft {
        ContactDraft {
            city: Some("Almaty".into()),
            street: Some(" Abay ave ".into()),
            house: Some("10".into()),
            apartment: Some("".into()),
            phone: Some("+7 700 000 00 00".into()),
            ..ContactDraft::default()
        }
    }

    #[test]
    fn trims_and_drops_blank_optionals() {
        let details = draft().into_details().unwrap();
        assert_eq!(details.street, "Abay ave");
        assert_eq!(details.house.as_deref(), Some("10"));
        assert_eq!(details.apartment, None);
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        for field in ["city", "street", "phone"] {
            let mut d = draft();
            match field {
                "city" => d.city = None,
                "street" => d.street = Some("  ".into()),
                _ => d.phone = None,
            }
            match d.into_details() {
                Err(DomainError::Validation(msg)) => assert_eq!(msg, format!("{field} is required")),
                other => panic!("Expected Validation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn contact_serializes_flat() {
        let contact = Contact {
            id: ContactId::new(7),
            user_id: UserId::new(1),
            details: draft().into_details().unwrap(),
        };
        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["city"], "Almaty");
    }
}
