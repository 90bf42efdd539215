//! PostgreSQL-backed `Repository<User>` implementation using Diesel ORM.
//!
//! Mirrors the book adapter; duplicate e-mail addresses surface as
//! [`RepositoryError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::domain::ports::{Entity, Repository, RepositoryError};
use crate::domain::{Page, User, UserDraft, UserFilters, UserValidationError};

use super::diesel_basic_error_mapping::map_diesel_error;
use super::diesel_helpers::{contains_pattern, page_from_rows};
use super::models::{NewUserRow, UserRow, UserUpdate};
use super::pool::DbPool;
use super::schema::users;

/// Diesel-backed implementation of `Repository<User>`.
#[derive(Debug, Clone)]
pub struct DieselUserRepository {
    pool: DbPool,
}

impl DieselUserRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn invalid(error: UserValidationError) -> RepositoryError {
    RepositoryError::validation(error.to_string())
}

async fn find_user(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> Result<Option<UserRow>, RepositoryError> {
    users::table
        .filter(users::id.eq(id))
        .select(UserRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, User::KIND, format!("select user where id={id}")))
}

struct UserCriteria {
    email: Option<String>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
}

impl UserCriteria {
    fn from_filters(filters: &UserFilters) -> Self {
        Self {
            email: filters.email_fragment().map(contains_pattern),
            created_after: filters.created_after,
            created_before: filters.created_before,
        }
    }

    fn query(&self) -> users::BoxedQuery<'_, Pg> {
        let mut query = users::table.into_boxed();
        if let Some(pattern) = self.email.as_deref() {
            query = query.filter(users::email.like(pattern));
        }
        if let Some(after) = self.created_after {
            query = query.filter(users::created_at.ge(after));
        }
        if let Some(before) = self.created_before {
            query = query.filter(users::created_at.le(before));
        }
        query
    }
}

#[async_trait]
impl Repository<User> for DieselUserRepository {
    async fn store(&self, draft: &UserDraft) -> Result<User, RepositoryError> {
        draft.validate().map_err(invalid)?;
        let id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;
        let conn = tx.conn()?;
        diesel::insert_into(users::table)
            .values(&NewUserRow {
                id,
                email: &draft.email,
                first_name: &draft.first_name,
                last_name: &draft.last_name,
            })
            .execute(conn)
            .await
            .map_err(|err| map_diesel_error(err, User::KIND, "insert user"))?;
        let row = find_user(conn, id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(User::KIND, id))?;
        tx.commit().await?;

        Ok(row.into())
    }

    async fn retrieve(&self, id: Uuid) -> Result<User, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = find_user(tx.conn()?, id).await?;
        tx.commit().await?;

        row.map(User::from)
            .ok_or_else(|| RepositoryError::not_found(User::KIND, id))
    }

    async fn retrieve_page(&self, filters: &UserFilters) -> Result<Page<User>, RepositoryError> {
        let request = filters.page_request().map_err(invalid)?;
        let criteria = UserCriteria::from_filters(filters);

        let mut tx = self.pool.begin_snapshot().await?;
        let conn = tx.conn()?;
        let total: i64 = criteria
            .query()
            .count()
            .get_result(conn)
            .await
            .map_err(|err| map_diesel_error(err, User::KIND, "count users"))?;
        let rows: Vec<UserRow> = criteria
            .query()
            .order((users::created_at.asc(), users::id.asc()))
            .limit(i64::from(request.limit()))
            .offset(i64::from(request.offset()))
            .select(UserRow::as_select())
            .load(conn)
            .await
            .map_err(|err| map_diesel_error(err, User::KIND, "select users page"))?;
        tx.commit().await?;

        Ok(page_from_rows(request, total, rows))
    }

    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        user.validate().map_err(invalid)?;

        let mut tx = self.pool.begin().await?;
        let conn = tx.conn()?;
        let changes = UserUpdate {
            email: &user.email,
            first_name: &user.first_name,
            last_name: &user.last_name,
        };
        let updated = diesel::update(users::table.filter(users::id.eq(user.id)))
            .set((changes, users::updated_at.eq(diesel::dsl::now)))
            .execute(conn)
            .await
            .map_err(|err| {
                map_diesel_error(err, User::KIND, format!("update user where id={}", user.id))
            })?;
        if updated == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::not_found(User::KIND, user.id));
        }
        let row = find_user(conn, user.id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(User::KIND, user.id))?;
        tx.commit().await?;

        Ok(row.into())
    }

    async fn remove(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let deleted = diesel::delete(users::table.filter(users::id.eq(id)))
            .execute(tx.conn()?)
            .await
            .map_err(|err| map_diesel_error(err, User::KIND, format!("delete user where id={id}")))?;
        if deleted == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::not_found(User::KIND, id));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::persistence::{DatabaseTarget, PoolConfig, SslMode};
    use rstest::{fixture, rstest};

    #[fixture]
    async fn repository() -> DieselUserRepository {
        let target =
            DatabaseTarget::from_parts("127.0.0.1", 1, "nobody", "", "nothing", SslMode::Disable)
                .expect("target should build");
        let pool = DbPool::new(PoolConfig::new(target).with_min_size(0).with_max_size(1))
            .await
            .expect("lazy pool should build");
        DieselUserRepository::new(pool)
    }

    #[rstest]
    #[tokio::test]
    async fn store_rejects_malformed_email(#[future] repository: DieselUserRepository) {
        let err = repository
            .await
            .store(&UserDraft::new("not-an-email", "Grace", "Hopper"))
            .await
            .expect_err("email should fail");
        assert_eq!(
            err,
            RepositoryError::validation("email must look like name@domain.tld")
        );
    }

    #[rstest]
    #[tokio::test]
    async fn update_rejects_short_names(#[future] repository: DieselUserRepository) {
        let user = User {
            id: Uuid::new_v4(),
            email: "grace@example.org".to_owned(),
            first_name: "Gr".to_owned(),
            last_name: "Hopper".to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let err = repository
            .await
            .update(&user)
            .await
            .expect_err("short first name should fail");
        assert!(matches!(err, RepositoryError::Validation { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn retrieve_page_rejects_inverted_range(#[future] repository: DieselUserRepository) {
        let now = Utc::now();
        let filters = UserFilters {
            created_after: Some(now),
            created_before: Some(now - chrono::Duration::hours(1)),
            ..UserFilters::default()
        };
        let err = repository
            .await
            .retrieve_page(&filters)
            .await
            .expect_err("range should fail");
        assert!(matches!(err, RepositoryError::Validation { .. }));
    }
}
