//! PostgreSQL-backed `Repository<Book>` implementation using Diesel ORM.
//!
//! Every operation runs inside one transaction on one pooled connection.
//! Writes re-read the affected row before committing so callers receive the
//! values the database assigned (identifier and timestamps).

use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::domain::ports::{Entity, Repository, RepositoryError};
use crate::domain::{Book, BookDraft, BookFilters, BookValidationError, Page};

use super::diesel_basic_error_mapping::map_diesel_error;
use super::diesel_helpers::{contains_pattern, page_from_rows};
use super::models::{BookRow, BookUpdate, NewBookRow};
use super::pool::DbPool;
use super::schema::books;

/// Diesel-backed implementation of `Repository<Book>`.
#[derive(Debug, Clone)]
pub struct DieselBookRepository {
    pool: DbPool,
}

impl DieselBookRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn invalid(error: BookValidationError) -> RepositoryError {
    RepositoryError::validation(error.to_string())
}

async fn find_book(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> Result<Option<BookRow>, RepositoryError> {
    books::table
        .filter(books::id.eq(id))
        .select(BookRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, Book::KIND, format!("select book where id={id}")))
}

fn filtered<'a>(name: Option<&'a str>, description: Option<&'a str>) -> books::BoxedQuery<'a, Pg> {
    let mut query = books::table.into_boxed();
    if let Some(pattern) = name {
        query = query.filter(books::name.like(pattern));
    }
    if let Some(pattern) = description {
        query = query.filter(books::description.like(pattern));
    }
    query
}

#[async_trait]
impl Repository<Book> for DieselBookRepository {
    async fn store(&self, draft: &BookDraft) -> Result<Book, RepositoryError> {
        draft.validate().map_err(invalid)?;
        let id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;
        let conn = tx.conn()?;
        diesel::insert_into(books::table)
            .values(&NewBookRow {
                id,
                name: &draft.name,
                description: &draft.description,
            })
            .execute(conn)
            .await
            .map_err(|err| map_diesel_error(err, Book::KIND, "insert book"))?;
        let row = find_book(conn, id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(Book::KIND, id))?;
        tx.commit().await?;

        Ok(row.into())
    }

    async fn retrieve(&self, id: Uuid) -> Result<Book, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = find_book(tx.conn()?, id).await?;
        tx.commit().await?;

        row.map(Book::from)
            .ok_or_else(|| RepositoryError::not_found(Book::KIND, id))
    }

    async fn retrieve_page(&self, filters: &BookFilters) -> Result<Page<Book>, RepositoryError> {
        let request = filters.page_request().map_err(invalid)?;
        let name = filters.name_fragment().map(contains_pattern);
        let description = filters.description_fragment().map(contains_pattern);

        // The count and the page come from one snapshot.
        let mut tx = self.pool.begin_snapshot().await?;
        let conn = tx.conn()?;
        let total: i64 = filtered(name.as_deref(), description.as_deref())
            .count()
            .get_result(conn)
            .await
            .map_err(|err| map_diesel_error(err, Book::KIND, "count books"))?;
        let rows: Vec<BookRow> = filtered(name.as_deref(), description.as_deref())
            .order((books::created_at.asc(), books::id.asc()))
            .limit(i64::from(request.limit()))
            .offset(i64::from(request.offset()))
            .select(BookRow::as_select())
            .load(conn)
            .await
            .map_err(|err| map_diesel_error(err, Book::KIND, "select books page"))?;
        tx.commit().await?;

        Ok(page_from_rows(request, total, rows))
    }

    async fn update(&self, book: &Book) -> Result<Book, RepositoryError> {
        book.validate().map_err(invalid)?;

        let mut tx = self.pool.begin().await?;
        let conn = tx.conn()?;
        let changes = BookUpdate {
            name: &book.name,
            description: &book.description,
        };
        let updated = diesel::update(books::table.filter(books::id.eq(book.id)))
            .set((changes, books::updated_at.eq(diesel::dsl::now)))
            .execute(conn)
            .await
            .map_err(|err| {
                map_diesel_error(err, Book::KIND, format!("update book where id={}", book.id))
            })?;
        if updated == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::not_found(Book::KIND, book.id));
        }
        let row = find_book(conn, book.id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(Book::KIND, book.id))?;
        tx.commit().await?;

        Ok(row.into())
    }

    async fn remove(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let deleted = diesel::delete(books::table.filter(books::id.eq(id)))
            .execute(tx.conn()?)
            .await
            .map_err(|err| map_diesel_error(err, Book::KIND, format!("delete book where id={id}")))?;
        if deleted == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::not_found(Book::KIND, id));
        }
        tx.commit().await?;
        Ok(())
    }
}
