//! Database models for property listings.

use crate::types::{ListingId, ReferenceEntryId, UserId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, types::Json};

#[derive(Debug, Clone)]
pub struct ListingCreateDBRequest {
    pub title: String,
    pub description: String,
    pub category_id: Option<ReferenceEntryId>,
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
    pub amenities: Vec<ReferenceEntryId>,
    pub is_approved: bool,
    pub added_by: UserId,
}

/// `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ListingUpdateDBRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<ReferenceEntryId>,
    pub status_id: Option<ReferenceEntryId>,
    pub price: Option<f64>,
    pub yearly_tax: Option<f64>,
    pub images: Option<Vec<String>>,
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
    pub amenities: Option<Vec<ReferenceEntryId>>,
    pub is_approved: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingVisibility {
    /// Everything, approved or not
    All,
    /// Approved listings plus the given user's own
    ApprovedOrOwnedBy(UserId),
}

#[derive(Debug, Clone)]
pub struct ListingFilter {
    pub skip: i64,
    pub limit: i64,
    pub visibility: ListingVisibility,
    pub added_by: Option<UserId>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ListingDBResponse {
    pub id: ListingId,
    pub title: String,
    pub description: String,
    pub category_id: Option<ReferenceEntryId>,
    pub status_id: Option<ReferenceEntryId>,
    pub price: f64,
    pub yearly_tax: f64,
    pub images: Json<Vec<String>>,
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
    pub amenities: Json<Vec<ReferenceEntryId>>,
    pub is_approved: bool,
    pub added_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListingDBResponse {
    pub fn is_visible_to(&self, user_id: UserId, is_admin: bool) -> bool {
        is_admin || self.is_approved || self.added_by == user_id
    }
}
