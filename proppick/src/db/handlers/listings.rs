//! Database repository for property listings.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::listings::{ListingCreateDBRequest, ListingDBResponse, ListingFilter, ListingUpdateDBRequest, ListingVisibility},
};
use crate::types::{ListingId, ReferenceEntryId, UserId, abbrev_uuid};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, types::Json};
use tracing::instrument;
use uuid::Uuid;

pub struct Listings<'c> {
    db: &'c mut SqliteConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Listings<'c> {
    type CreateRequest = ListingCreateDBRequest;
    type UpdateRequest = ListingUpdateDBRequest;
    type Response = ListingDBResponse;
    type Id = ListingId;
    type Filter = ListingFilter;

    #[instrument(skip(self, request), fields(added_by = %abbrev_uuid(&request.added_by), images = request.images.len()), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let now = Utc::now();
        let listing = sqlx::query_as::<_, ListingDBResponse>(
            r#"
            INSERT INTO listings (
                id, title, description, category_id, status_id, price, yearly_tax, images,
                address, country, state, city, zipcode, area, rooms, bathrooms, garages, floors,
                built_year, structure_type, extra_details, membership_status, contact_email, amenities,
                is_approved, added_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.category_id)
        .bind(request.status_id)
        .bind(request.price)
        .bind(request.yearly_tax)
        .bind(Json(&request.images))
        .bind(&request.address)
        .bind(&request.country)
        .bind(&request.state)
        .bind(&request.city)
        .bind(&request.zipcode)
        .bind(request.area)
        .bind(request.rooms)
        .bind(request.bathrooms)
        .bind(request.garages)
        .bind(request.floors)
        .bind(request.built_year)
        .bind(&request.structure_type)
        .bind(&request.extra_details)
        .bind(&request.membership_status)
        .bind(&request.contact_email)
        .bind(Json(&request.amenities))
        .bind(request.is_approved)
        .bind(request.added_by)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(listing)
    }

    #[instrument(skip(self), fields(listing_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let listing = sqlx::query_as::<_, ListingDBResponse>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(listing)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM listings WHERE 1=1");

        if let ListingVisibility::ApprovedOrOwnedBy(user_id) = filter.visibility {
            query.push(" AND (is_approved = 1 OR added_by = ");
            query.push_bind(user_id);
            query.push(")");
        }
        if let Some(added_by) = filter.added_by {
            query.push(" AND added_by = ");
            query.push_bind(added_by);
        }

        query.push(" ORDER BY created_at DESC, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let listings = query.build_query_as::<ListingDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(listings)
    }

    #[instrument(skip(self), fields(listing_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ?").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(listing_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let listing = sqlx::query_as::<_, ListingDBResponse>(
            r#"
            UPDATE listings SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                category_id = COALESCE(?, category_id),
                status_id = COALESCE(?, status_id),
                price = COALESCE(?, price),
                yearly_tax = COALESCE(?, yearly_tax),
                images = COALESCE(?, images),
                address = COALESCE(?, address),
                country = COALESCE(?, country),
                state = COALESCE(?, state),
                city = COALESCE(?, city),
                zipcode = COALESCE(?, zipcode),
                area = COALESCE(?, area),
                rooms = COALESCE(?, rooms),
                bathrooms = COALESCE(?, bathrooms),
                garages = COALESCE(?, garages),
                floors = COALESCE(?, floors),
                built_year = COALESCE(?, built_year),
                structure_type = COALESCE(?, structure_type),
                extra_details = COALESCE(?, extra_details),
                membership_status = COALESCE(?, membership_status),
                contact_email = COALESCE(?, contact_email),
                amenities = COALESCE(?, amenities),
                is_approved = COALESCE(?, is_approved),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.category_id)
        .bind(request.status_id)
        .bind(request.price)
        .bind(request.yearly_tax)
        .bind(request.images.as_ref().map(Json))
        .bind(&request.address)
        .bind(&request.country)
        .bind(&request.state)
        .bind(&request.city)
        .bind(&request.zipcode)
        .bind(request.area)
        .bind(request.rooms)
        .bind(request.bathrooms)
        .bind(request.garages)
        .bind(request.floors)
        .bind(request.built_year)
        .bind(&request.structure_type)
        .bind(&request.extra_details)
        .bind(&request.membership_status)
        .bind(&request.contact_email)
        .bind(request.amenities.as_ref().map(Json))
        .bind(request.is_approved)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(listing)
    }
}

impl<'c> Listings<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Owner of a listing, if it exists. Used by the resource-owner rule.
    #[instrument(skip(self), fields(listing_id = %abbrev_uuid(&id)), err)]
    pub async fn get_owner(&mut self, id: ListingId) -> Result<Option<UserId>> {
        let owner = sqlx::query_scalar::<_, UserId>("SELECT added_by FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(owner)
    }

    /// Image URLs of every listing by `user_id`.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn images_added_by(&mut self, user_id: UserId) -> Result<Vec<String>> {
        let images = sqlx::query_scalar::<_, Json<Vec<String>>>("SELECT images FROM listings WHERE added_by = ?")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(images.into_iter().flat_map(|Json(urls)| urls).collect())
    }

    /// Which of the given amenity ids exist
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn existing_amenities(&mut self, ids: &[ReferenceEntryId]) -> Result<Vec<ReferenceEntryId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM amenities WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let found = query.build_query_scalar::<ReferenceEntryId>().fetch_all(&mut *self.db).await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        handlers::{ReferenceData, Users},
        models::{
            reference_data::{ReferenceEntryCreateDBRequest, ReferenceKind},
            users::{Role, UserCreateDBRequest},
        },
    };
    use sqlx::SqlitePool;

    async fn insert_user(conn: &mut SqliteConnection) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                email: format!("{}@example.com", Uuid::new_v4()),
                password_hash: None,
                full_name: "Lister".to_string(),
                phone: None,
                role: Role::User,
                is_verified: true,
            })
            .await
            .unwrap()
            .id
    }

    fn create_request(added_by: UserId) -> ListingCreateDBRequest {
        ListingCreateDBRequest {
            title: "Sunny flat".to_string(),
            description: "Two rooms near the park".to_string(),
            category_id: None,
            status_id: None,
            price: 120_000.0,
            yearly_tax: 900.0,
            images: vec!["http://localhost/uploads/a.png".to_string()],
            address: "1 Main St".to_string(),
            country: "PT".to_string(),
            state: "Lisbon".to_string(),
            city: Some("Lisbon".to_string()),
            zipcode: "1000-001".to_string(),
            area: Some(75.5),
            rooms: 2,
            bathrooms: 1,
            garages: 0,
            floors: 1,
            built_year: Some(1998),
            structure_type: None,
            extra_details: None,
            membership_status: None,
            contact_email: "owner@example.com".to_string(),
            amenities: vec![],
            is_approved: false,
            added_by,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_get_and_owner(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = insert_user(&mut conn).await;
        let mut repo = Listings::new(&mut conn);

        let listing = repo.create(&create_request(owner)).await.unwrap();
        assert_eq!(listing.images.0.len(), 1);
        assert!(!listing.is_approved);

        assert_eq!(repo.get_owner(listing.id).await.unwrap(), Some(owner));
        assert_eq!(repo.get_owner(Uuid::new_v4()).await.unwrap(), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_schema_rejects_invalid_listing(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = insert_user(&mut conn).await;
        let mut repo = Listings::new(&mut conn);

        let mut no_images = create_request(owner);
        no_images.images.clear();
        assert!(matches!(repo.create(&no_images).await, Err(DbError::CheckViolation { .. })));

        let mut cheap = create_request(owner);
        cheap.price = 1.0;
        assert!(matches!(repo.create(&cheap).await, Err(DbError::CheckViolation { .. })));

        let mut unknown_category = create_request(owner);
        unknown_category.category_id = Some(Uuid::new_v4());
        assert!(matches!(
            repo.create(&unknown_category).await,
            Err(DbError::ForeignKeyViolation { .. })
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_visibility_filter(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = insert_user(&mut conn).await;
        let bob = insert_user(&mut conn).await;
        let mut repo = Listings::new(&mut conn);

        let pending = repo.create(&create_request(alice)).await.unwrap();
        let mut approved = create_request(alice);
        approved.is_approved = true;
        repo.create(&approved).await.unwrap();

        let all = ListingFilter {
            skip: 0,
            limit: 10,
            visibility: ListingVisibility::All,
            added_by: None,
        };
        assert_eq!(repo.list(&all).await.unwrap().len(), 2);

        let for_bob = ListingFilter {
            visibility: ListingVisibility::ApprovedOrOwnedBy(bob),
            ..all.clone()
        };
        let visible = repo.list(&for_bob).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_approved);

        let for_alice = ListingFilter {
            visibility: ListingVisibility::ApprovedOrOwnedBy(alice),
            ..all.clone()
        };
        assert_eq!(repo.list(&for_alice).await.unwrap().len(), 2);

        let bobs_own = ListingFilter {
            added_by: Some(bob),
            ..all
        };
        assert!(repo.list(&bobs_own).await.unwrap().is_empty());

        assert!(!pending.is_visible_to(bob, false));
        assert!(pending.is_visible_to(alice, false));
        assert!(pending.is_visible_to(bob, true));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_partial_fields(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = insert_user(&mut conn).await;
        let mut repo = Listings::new(&mut conn);

        let listing = repo.create(&create_request(owner)).await.unwrap();
        let updated = repo
            .update(
                listing.id,
                &ListingUpdateDBRequest {
                    price: Some(150_000.0),
                    images: Some(vec!["http://localhost/uploads/b.png".to_string(), "http://localhost/uploads/c.png".to_string()]),
                    is_approved: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.price, 150_000.0);
        assert_eq!(updated.images.0.len(), 2);
        assert!(updated.is_approved);
        assert_eq!(updated.title, listing.title);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_existing_amenities(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = insert_user(&mut conn).await;
        let pool_amenity = ReferenceData::new(&mut conn, ReferenceKind::Amenity)
            .create(&ReferenceEntryCreateDBRequest {
                name: "Pool".to_string(),
                added_by: owner,
            })
            .await
            .unwrap();

        let mut repo = Listings::new(&mut conn);
        let found = repo.existing_amenities(&[pool_amenity.id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(found, vec![pool_amenity.id]);
        assert!(repo.existing_amenities(&[]).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_listings_removed_with_owner(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = insert_user(&mut conn).await;
        let listing = Listings::new(&mut conn).create(&create_request(owner)).await.unwrap();

        Users::new(&mut conn).delete(owner).await.unwrap();
        assert!(Listings::new(&mut conn).get_by_id(listing.id).await.unwrap().is_none());
    }
}
