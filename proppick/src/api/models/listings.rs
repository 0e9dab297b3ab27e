//! API request/response models for property listings.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::listings::{ListingDBResponse, ListingUpdateDBRequest};
use crate::db::models::users::is_valid_email;
use crate::errors::Error;
use crate::types::{ListingId, ReferenceEntryId, UserId};

pub const TITLE_MIN_CHARS: usize = 5;
pub const TITLE_MAX_CHARS: usize = 100;
pub const MIN_PRICE: f64 = 5.0;
pub const MIN_BUILT_YEAR: i64 = 1800;

/// The `listing` part of the multipart create request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListingCreate {
    pub title: String,
    pub description: String,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub category_id: Option<ReferenceEntryId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub status_id: Option<ReferenceEntryId>,
    pub price: f64,
    #[serde(default)]
    pub yearly_tax: f64,
    pub address: String,
    pub country: String,
    pub state: String,
    pub city: Option<String>,
    pub zipcode: String,
    pub area: Option<f64>,
    #[serde(default)]
    pub rooms: i64,
    #[serde(default)]
    pub bathrooms: i64,
    #[serde(default)]
    pub garages: i64,
    #[serde(default)]
    pub floors: i64,
    pub built_year: Option<i64>,
    pub structure_type: Option<String>,
    pub extra_details: Option<String>,
    pub membership_status: Option<String>,
    pub contact_email: String,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub amenities: Vec<ReferenceEntryId>,
}

/// Partial update. Images are replaced only by re-creating the listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub category_id: Option<ReferenceEntryId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub status_id: Option<ReferenceEntryId>,
    pub price: Option<f64>,
    pub yearly_tax: Option<f64>,
    pub address: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub area: Option<f64>,
    pub rooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub garages: Option<i64>,
    pub floors: Option<i64>,
    pub built_year: Option<i64>,
    pub structure_type: Option<String>,
    pub extra_details: Option<String>,
    pub membership_status: Option<String>,
    pub contact_email: Option<String>,
    #[schema(value_type = Option<Vec<String>>)]
    pub amenities: Option<Vec<ReferenceEntryId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ListingApproval {
    pub approved: bool,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListingsQuery {
    /// Only listings added by this user
    #[param(value_type = Option<String>, format = "uuid")]
    pub added_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListingResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ListingId,
    pub title: String,
    pub description: String,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub category_id: Option<ReferenceEntryId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub status_id: Option<ReferenceEntryId>,
    pub price: f64,
    pub yearly_tax: f64,
    pub images: Vec<String>,
    pub address: String,
    pub country: String,
    pub state: String,
    pub city: Option<String>,
    pub zipcode: String,
    pub area: Option<f64>,
    pub rooms: i64,
    pub bathrooms: i64,
    pub garages: i64,
    pub floors: i64,
    pub built_year: Option<i64>,
    pub structure_type: Option<String>,
    pub extra_details: Option<String>,
    pub membership_status: Option<String>,
    pub contact_email: String,
    #[schema(value_type = Vec<String>)]
    pub amenities: Vec<ReferenceEntryId>,
    pub is_approved: bool,
    #[schema(value_type = String, format = "uuid")]
    pub added_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ListingDBResponse> for ListingResponse {
    fn from(db: ListingDBResponse) -> Self {
        Self {
            id: db.id,
            title: db.title,
            description: db.description,
            category_id: db.category_id,
            status_id: db.status_id,
            price: db.price,
            yearly_tax: db.yearly_tax,
            images: db.images.0,
            address: db.address,
            country: db.country,
            state: db.state,
            city: db.city,
            zipcode: db.zipcode,
            area: db.area,
            rooms: db.rooms,
            bathrooms: db.bathrooms,
            garages: db.garages,
            floors: db.floors,
            built_year: db.built_year,
            structure_type: db.structure_type,
            extra_details: db.extra_details,
            membership_status: db.membership_status,
            contact_email: db.contact_email,
            amenities: db.amenities.0,
            is_approved: db.is_approved,
            added_by: db.added_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

fn bad(message: impl Into<String>) -> Error {
    Error::BadRequest { message: message.into() }
}

fn check_title(title: &str) -> Result<(), Error> {
    let chars = title.trim().chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&chars) {
        return Err(bad(format!(
            "Title must be between {TITLE_MIN_CHARS} and {TITLE_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

fn check_not_blank(value: &str, field: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(bad(format!("{field} is required")));
    }
    Ok(())
}

fn check_price(price: f64) -> Result<(), Error> {
    if !price.is_finite() || price < MIN_PRICE {
        return Err(bad(format!("Price must be at least {MIN_PRICE}")));
    }
    Ok(())
}

fn check_yearly_tax(tax: f64) -> Result<(), Error> {
    if !tax.is_finite() || tax < 0.0 {
        return Err(bad("Yearly tax cannot be negative"));
    }
    Ok(())
}

fn check_count(value: i64, field: &str) -> Result<(), Error> {
    if value < 0 {
        return Err(bad(format!("{field} cannot be negative")));
    }
    Ok(())
}

fn check_area(area: f64) -> Result<(), Error> {
    if !area.is_finite() || area < 0.0 {
        return Err(bad("Area cannot be negative"));
    }
    Ok(())
}

fn check_built_year(year: i64) -> Result<(), Error> {
    let latest = i64::from(Utc::now().year()) + 1;
    if !(MIN_BUILT_YEAR..=latest).contains(&year) {
        return Err(bad(format!("Built year must be between {MIN_BUILT_YEAR} and {latest}")));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), Error> {
    if !is_valid_email(email.trim()) {
        return Err(bad("Contact email is not a valid email address"));
    }
    Ok(())
}

impl ListingCreate {
    pub fn validate(&self) -> Result<(), Error> {
        check_title(&self.title)?;
        check_not_blank(&self.description, "Description")?;
        check_price(self.price)?;
        check_yearly_tax(self.yearly_tax)?;
        check_not_blank(&self.address, "Address")?;
        check_not_blank(&self.country, "Country")?;
        check_not_blank(&self.state, "State")?;
        check_not_blank(&self.zipcode, "Zipcode")?;
        for (value, field) in [
            (self.rooms, "Rooms"),
            (self.bathrooms, "Bathrooms"),
            (self.garages, "Garages"),
            (self.floors, "Floors"),
        ] {
            check_count(value, field)?;
        }
        if let Some(area) = self.area {
            check_area(area)?;
        }
        if let Some(year) = self.built_year {
            check_built_year(year)?;
        }
        check_email(&self.contact_email)
    }
}

impl ListingUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(title) = &self.title {
            check_title(title)?;
        }
        for (value, field) in [
            (&self.description, "Description"),
            (&self.address, "Address"),
            (&self.country, "Country"),
            (&self.state, "State"),
            (&self.zipcode, "Zipcode"),
        ] {
            if let Some(value) = value {
                check_not_blank(value, field)?;
            }
        }
        if let Some(price) = self.price {
            check_price(price)?;
        }
        if let Some(tax) = self.yearly_tax {
            check_yearly_tax(tax)?;
        }
        for (value, field) in [
            (self.rooms, "Rooms"),
            (self.bathrooms, "Bathrooms"),
            (self.garages, "Garages"),
            (self.floors, "Floors"),
        ] {
            if let Some(value) = value {
                check_count(value, field)?;
            }
        }
        if let Some(area) = self.area {
            check_area(area)?;
        }
        if let Some(year) = self.built_year {
            check_built_year(year)?;
        }
        if let Some(email) = &self.contact_email {
            check_email(email)?;
        }
        Ok(())
    }

    /// Everything but approval; the handler decides that.
    pub fn into_db_request(self) -> ListingUpdateDBRequest {
        ListingUpdateDBRequest {
            title: self.title.map(|t| t.trim().to_string()),
            description: self.description,
            category_id: self.category_id,
            status_id: self.status_id,
            price: self.price,
            yearly_tax: self.yearly_tax,
            images: None,
            address: self.address,
            country: self.country,
            state: self.state,
            city: self.city,
            zipcode: self.zipcode,
            area: self.area,
            rooms: self.rooms,
            bathrooms: self.bathrooms,
            garages: self.garages,
            floors: self.floors,
            built_year: self.built_year,
            structure_type: self.structure_type,
            extra_details: self.extra_details,
            membership_status: self.membership_status,
            contact_email: self.contact_email.map(|e| e.trim().to_string()),
            amenities: self.amenities,
            is_approved: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_listing() -> ListingCreate {
        ListingCreate {
            title: "Sunny two-bed flat".to_string(),
            description: "Close to the park".to_string(),
            category_id: None,
            status_id: None,
            price: 250_000.0,
            yearly_tax: 1_200.0,
            address: "1 Main Street".to_string(),
            country: "NL".to_string(),
            state: "NH".to_string(),
            city: Some("Amsterdam".to_string()),
            zipcode: "1011AA".to_string(),
            area: Some(72.5),
            rooms: 3,
            bathrooms: 1,
            garages: 0,
            floors: 1,
            built_year: Some(1998),
            structure_type: None,
            extra_details: None,
            membership_status: None,
            contact_email: "owner@example.com".to_string(),
            amenities: vec![],
        }
    }

    #[test]
    fn test_valid_listing_passes() {
        assert!(valid_listing().validate().is_ok());
    }

    #[test]
    fn test_field_rules() {
        let cases: Vec<(fn(&mut ListingCreate), &str)> = vec![
            (|l| l.title = "Flat".to_string(), "Title"),
            (|l| l.title = "x".repeat(101), "Title"),
            (|l| l.description = "  ".to_string(), "Description"),
            (|l| l.price = 4.99, "Price"),
            (|l| l.price = f64::NAN, "Price"),
            (|l| l.yearly_tax = -1.0, "Yearly tax"),
            (|l| l.rooms = -1, "Rooms"),
            (|l| l.built_year = Some(1799), "Built year"),
            (|l| l.built_year = Some(3000), "Built year"),
            (|l| l.contact_email = "nope".to_string(), "Contact email"),
        ];

        for (mutate, expected) in cases {
            let mut listing = valid_listing();
            mutate(&mut listing);
            match listing.validate() {
                Err(Error::BadRequest { message }) => assert!(message.starts_with(expected), "{message}"),
                other => panic!("expected BadRequest for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_partial_update_checks_only_present_fields() {
        assert!(ListingUpdate::default().validate().is_ok());
        let update = ListingUpdate {
            price: Some(1.0),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }
}
