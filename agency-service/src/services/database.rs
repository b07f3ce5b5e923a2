//! Postgres store for agency-service.

use super::store::{DocumentStore, StoreError};
use crate::models::{
    Client, ClientChanges, ClientSnapshot, Document, DocumentChanges, DocumentKind,
    DocumentStatus, InvoiceStatus, LineItem, LineItemInput, ListClientsFilter,
    ListDocumentsFilter, NewClient, NewDocument, NewPayment, Payment, QuoteStatus, Totals,
};
use crate::numbering::{highest_sequence, DocumentNumber, NumberStore, SequenceStore};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection, PgExecutor};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = "document_id, kind, number, status, client_id, client_name, \
    client_email, client_phone, client_address, client_tax_id, issue_date, due_date, \
    valid_until, tax_rate, subtotal, tax_amount, total, amount_paid, notes, quote_id, \
    created_utc, updated_utc, deleted_utc";

const CLIENT_COLUMNS: &str =
    "client_id, name, email, phone, address, tax_id, notes, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str =
    "payment_id, invoice_id, amount, method, reference, paid_on, notes, created_utc";

/// Maps a sqlx error, keeping unique violations distinguishable by constraint.
fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::UniqueViolation {
                constraint: db_err.constraint().unwrap_or_default().to_string(),
            }
        }
        _ => StoreError::unavailable(context, e),
    }
}

fn status_strings(statuses: &[DocumentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(FromRow)]
struct DocumentRow {
    document_id: Uuid,
    kind: String,
    number: String,
    status: String,
    client_id: Option<Uuid>,
    client_name: String,
    client_email: Option<String>,
    client_phone: Option<String>,
    client_address: Option<String>,
    client_tax_id: Option<String>,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
    tax_rate: Decimal,
    subtotal: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    amount_paid: Decimal,
    notes: Option<String>,
    quote_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    deleted_utc: Option<DateTime<Utc>>,
}

impl DocumentRow {
    fn into_document(self, line_items: Vec<LineItem>) -> Result<Document, StoreError> {
        let corrupt =
            |e: String| StoreError::Unavailable(anyhow::anyhow!("Corrupt document row: {}", e));
        let kind: DocumentKind = self.kind.parse().map_err(corrupt)?;
        let status = DocumentStatus::parse(kind, &self.status).map_err(corrupt)?;

        Ok(Document {
            document_id: self.document_id,
            kind,
            number: self.number,
            status,
            client_id: self.client_id,
            client: ClientSnapshot {
                name: self.client_name,
                email: self.client_email,
                phone: self.client_phone,
                address: self.client_address,
                tax_id: self.client_tax_id,
            },
            issue_date: self.issue_date,
            due_date: self.due_date,
            valid_until: self.valid_until,
            tax_rate: self.tax_rate,
            totals: Totals {
                subtotal: self.subtotal,
                tax_amount: self.tax_amount,
                total: self.total,
            },
            amount_paid: self.amount_paid,
            notes: self.notes,
            quote_id: self.quote_id,
            line_items,
            created_utc: self.created_utc,
            updated_utc: self.updated_utc,
            deleted_utc: self.deleted_utc,
        })
    }
}

#[derive(FromRow)]
struct LineItemRow {
    line_item_id: Uuid,
    document_id: Uuid,
    position: i32,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    amount: Decimal,
}

impl From<LineItemRow> for LineItem {
    fn from(row: LineItemRow) -> Self {
        LineItem {
            line_item_id: row.line_item_id,
            position: row.position,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            amount: row.amount,
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    invoice_id: Uuid,
    amount: Decimal,
    method: String,
    reference: Option<String>,
    paid_on: NaiveDate,
    notes: Option<String>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let method = row.method.parse().map_err(|e: String| {
            StoreError::Unavailable(anyhow::anyhow!("Corrupt payment row: {}", e))
        })?;
        Ok(Payment {
            payment_id: row.payment_id,
            invoice_id: row.invoice_id,
            amount: row.amount,
            method,
            reference: row.reference,
            paid_on: row.paid_on,
            notes: row.notes,
            created_utc: row.created_utc,
        })
    }
}

/// Line items of `document_ids`, grouped by document and ordered by position.
async fn line_items_for<'e, E: PgExecutor<'e>>(
    executor: E,
    document_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<LineItem>>, StoreError> {
    let rows = sqlx::query_as::<_, LineItemRow>(
        r#"
        SELECT line_item_id, document_id, position, description, quantity, unit_price, amount
        FROM document_line_items
        WHERE document_id = ANY($1)
        ORDER BY document_id, position
        "#,
    )
    .bind(document_ids)
    .fetch_all(executor)
    .await
    .map_err(db_error("Failed to load line items"))?;

    let mut grouped: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
    for row in rows {
        grouped.entry(row.document_id).or_default().push(row.into());
    }
    Ok(grouped)
}

fn attach_line_items(
    rows: Vec<DocumentRow>,
    mut line_items: HashMap<Uuid, Vec<LineItem>>,
) -> Result<Vec<Document>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let items = line_items.remove(&row.document_id).unwrap_or_default();
            row.into_document(items)
        })
        .collect()
}

async fn replace_line_items(
    conn: &mut PgConnection,
    document_id: Uuid,
    items: &[LineItemInput],
) -> Result<Vec<LineItem>, StoreError> {
    let lines = LineItemInput::to_line_items(items)?;
    sqlx::query("DELETE FROM document_line_items WHERE document_id = $1")
        .bind(document_id)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to clear line items"))?;

    for line in &lines {
        sqlx::query(
            r#"
            INSERT INTO document_line_items
                (line_item_id, document_id, position, description, quantity, unit_price, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.line_item_id)
        .bind(document_id)
        .bind(line.position)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.amount)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to insert line item"))?;
    }
    Ok(lines)
}

async fn insert_document_in(
    conn: &mut PgConnection,
    input: &NewDocument,
) -> Result<Document, StoreError> {
    let totals = input.totals()?;
    let sql = format!(
        r#"
        INSERT INTO documents (
            document_id, kind, number, status, client_id, client_name, client_email,
            client_phone, client_address, client_tax_id, issue_date, due_date, valid_until,
            tax_rate, subtotal, tax_amount, total, notes, quote_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    );

    let row = sqlx::query_as::<_, DocumentRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(input.kind().as_str())
        .bind(input.number.to_string())
        .bind(input.status.as_str())
        .bind(input.client_id)
        .bind(&input.client.name)
        .bind(&input.client.email)
        .bind(&input.client.phone)
        .bind(&input.client.address)
        .bind(&input.client.tax_id)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(input.valid_until)
        .bind(input.tax_rate)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(totals.total)
        .bind(&input.notes)
        .bind(input.quote_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error("Failed to insert document"))?;

    let line_items = replace_line_items(conn, row.document_id, &input.line_items).await?;
    row.into_document(line_items)
}

/// Postgres-backed [`DocumentStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "agency-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn with_line_items(&self, row: DocumentRow) -> Result<Document, StoreError> {
        let mut items = line_items_for(&self.pool, &[row.document_id]).await?;
        let line_items = items.remove(&row.document_id).unwrap_or_default();
        row.into_document(line_items)
    }
}

#[async_trait]
impl NumberStore for PgStore {
    #[instrument(skip(self))]
    async fn latest_number(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<Option<String>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_number"])
            .start_timer();

        let number = sqlx::query_scalar::<_, String>(
            r#"
            SELECT number
            FROM documents
            WHERE kind = $1 AND number LIKE $2
            ORDER BY created_utc DESC, number DESC
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(DocumentNumber::partition_pattern(kind, year))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to read latest number"))?;

        timer.observe_duration();

        Ok(number)
    }

    #[instrument(skip(self), fields(number = %number))]
    async fn number_exists(
        &self,
        kind: DocumentKind,
        number: &DocumentNumber,
    ) -> Result<bool, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["number_exists"])
            .start_timer();

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM documents WHERE kind = $1 AND number = $2)",
        )
        .bind(kind.as_str())
        .bind(number.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to check number"))?;

        timer.observe_duration();

        Ok(exists)
    }
}

#[async_trait]
impl SequenceStore for PgStore {
    #[instrument(skip(self))]
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<u32, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_sequence"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let bumped = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE document_sequences
            SET last_value = last_value + 1
            WHERE kind = $1 AND year = $2
            RETURNING last_value
            "#,
        )
        .bind(kind.as_str())
        .bind(year)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to bump sequence"))?;

        let value = match bumped {
            Some(value) => value,
            None => {
                let numbers = sqlx::query_scalar::<_, String>(
                    "SELECT number FROM documents WHERE kind = $1 AND number LIKE $2",
                )
                .bind(kind.as_str())
                .bind(DocumentNumber::partition_pattern(kind, year))
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to read partition numbers"))?;

                let seed = highest_sequence(kind, year, numbers.iter().map(String::as_str))?;

                // A concurrent first call may have created the row meanwhile.
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO document_sequences (kind, year, last_value)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (kind, year)
                    DO UPDATE SET last_value = document_sequences.last_value + 1
                    RETURNING last_value
                    "#,
                )
                .bind(kind.as_str())
                .bind(year)
                .bind(i64::from(seed) + 1)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error("Failed to seed sequence"))?
            }
        };

        let sequence =
            u32::try_from(value).map_err(|_| StoreError::SequenceExhausted { kind, year })?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit sequence"))?;

        timer.observe_duration();
        Ok(sequence)
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Client Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input))]
    async fn create_client(&self, input: &NewClient) -> Result<Client, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_client"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO clients (client_id, name, email, phone, address, tax_id, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        let client = sqlx::query_as::<_, Client>(&sql)
            .bind(Uuid::new_v4())
            .bind(&input.name)
            .bind(&input.email)
            .bind(&input.phone)
            .bind(&input.address)
            .bind(&input.tax_id)
            .bind(&input.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to create client"))?;

        timer.observe_duration();

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let sql = format!("SELECT {} FROM clients WHERE client_id = $1", CLIENT_COLUMNS);
        let client = sqlx::query_as::<_, Client>(&sql)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get client"))?;

        timer.observe_duration();

        Ok(client)
    }

    #[instrument(skip(self, filter))]
    async fn list_clients(&self, filter: &ListClientsFilter) -> Result<Vec<Client>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_clients"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {}
            FROM clients
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%')
            ORDER BY name, client_id
            LIMIT $2 OFFSET $3
            "#,
            CLIENT_COLUMNS
        );
        let clients = sqlx::query_as::<_, Client>(&sql)
            .bind(&filter.search)
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list clients"))?;

        timer.observe_duration();

        Ok(clients)
    }

    #[instrument(skip(self, changes), fields(client_id = %client_id))]
    async fn update_client(
        &self,
        client_id: Uuid,
        changes: &ClientChanges,
    ) -> Result<Option<Client>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_client"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE clients
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                address = COALESCE($5, address),
                tax_id = COALESCE($6, tax_id),
                notes = COALESCE($7, notes),
                updated_utc = NOW()
            WHERE client_id = $1
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        let client = sqlx::query_as::<_, Client>(&sql)
            .bind(client_id)
            .bind(&changes.name)
            .bind(&changes.email)
            .bind(&changes.phone)
            .bind(&changes.address)
            .bind(&changes.tax_id)
            .bind(&changes.notes)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to update client"))?;

        timer.observe_duration();

        Ok(client)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn delete_client(&self, client_id: Uuid) -> Result<bool, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_client"])
            .start_timer();

        let result = sqlx::query("DELETE FROM clients WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete client"))?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(client_id = %client_id, "Client deleted");
        }

        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Document Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(kind = %input.kind(), number = %input.number))]
    async fn insert_document(&self, input: &NewDocument) -> Result<Document, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_document"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let document = insert_document_in(&mut *tx, input).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit document"))?;

        timer.observe_duration();

        Ok(document)
    }

    #[instrument(skip(self), fields(document_id = %document_id))]
    async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> Result<Option<Document>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_document"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM documents WHERE document_id = $1 AND kind = $2 AND deleted_utc IS NULL",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get document"))?;

        let document = match row {
            Some(row) => Some(self.with_line_items(row).await?),
            None => None,
        };

        timer.observe_duration();

        Ok(document)
    }

    #[instrument(skip(self, filter), fields(kind = %filter.kind))]
    async fn list_documents(
        &self,
        filter: &ListDocumentsFilter,
    ) -> Result<Vec<Document>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_documents"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {}
            FROM documents
            WHERE kind = $1
              AND deleted_utc IS NULL
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR client_id = $3)
            ORDER BY created_utc DESC
            LIMIT $4 OFFSET $5
            "#,
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(filter.kind.as_str())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.client_id)
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list documents"))?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.document_id).collect();
        let line_items = line_items_for(&self.pool, &ids).await?;
        let documents = attach_line_items(rows, line_items)?;

        timer.observe_duration();

        Ok(documents)
    }

    #[instrument(skip(self, editable, changes), fields(document_id = %document_id))]
    async fn update_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        editable: &[DocumentStatus],
        changes: &DocumentChanges,
    ) -> Result<Option<Document>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_document"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let sql = format!(
            r#"
            SELECT {}
            FROM documents
            WHERE document_id = $1 AND kind = $2 AND deleted_utc IS NULL AND status = ANY($3)
            FOR UPDATE
            "#,
            DOCUMENT_COLUMNS
        );
        let Some(current) = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .bind(kind.as_str())
            .bind(status_strings(editable))
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to lock document"))?
        else {
            return Ok(None);
        };

        let client = changes.client.clone().unwrap_or_else(|| ClientSnapshot {
            name: current.client_name.clone(),
            email: current.client_email.clone(),
            phone: current.client_phone.clone(),
            address: current.client_address.clone(),
            tax_id: current.client_tax_id.clone(),
        });
        let tax_rate = changes.tax_rate.unwrap_or(current.tax_rate);

        let line_items = match &changes.line_items {
            Some(items) => replace_line_items(&mut *tx, document_id, items).await?,
            None => line_items_for(&mut *tx, &[document_id])
                .await?
                .remove(&document_id)
                .unwrap_or_default(),
        };
        let totals = if changes.touches_totals() {
            let inputs: Vec<LineItemInput> = line_items
                .iter()
                .map(|item| LineItemInput {
                    description: item.description.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect();
            Totals::compute(&inputs, tax_rate)?
        } else {
            Totals {
                subtotal: current.subtotal,
                tax_amount: current.tax_amount,
                total: current.total,
            }
        };

        let sql = format!(
            r#"
            UPDATE documents
            SET client_name = $3,
                client_email = $4,
                client_phone = $5,
                client_address = $6,
                client_tax_id = $7,
                due_date = COALESCE($8, due_date),
                valid_until = COALESCE($9, valid_until),
                notes = COALESCE($10, notes),
                tax_rate = $11,
                subtotal = $12,
                tax_amount = $13,
                total = $14,
                updated_utc = clock_timestamp()
            WHERE document_id = $1 AND kind = $2
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .bind(kind.as_str())
            .bind(&client.name)
            .bind(&client.email)
            .bind(&client.phone)
            .bind(&client.address)
            .bind(&client.tax_id)
            .bind(changes.due_date)
            .bind(changes.valid_until)
            .bind(&changes.notes)
            .bind(tax_rate)
            .bind(totals.subtotal)
            .bind(totals.tax_amount)
            .bind(totals.total)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to update document"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit document update"))?;

        timer.observe_duration();

        info!(document_id = %document_id, "Document updated");

        row.into_document(line_items).map(Some)
    }

    #[instrument(skip(self, from), fields(document_id = %document_id, to = %to.as_str()))]
    async fn set_status(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        from: &[DocumentStatus],
        to: DocumentStatus,
    ) -> Result<Option<Document>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_status"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE documents
            SET status = $4, updated_utc = clock_timestamp()
            WHERE document_id = $1 AND kind = $2 AND deleted_utc IS NULL AND status = ANY($3)
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .bind(kind.as_str())
            .bind(status_strings(from))
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to set status"))?;

        let document = match row {
            Some(row) => Some(self.with_line_items(row).await?),
            None => None,
        };

        timer.observe_duration();

        Ok(document)
    }

    #[instrument(skip(self, deletable), fields(document_id = %document_id))]
    async fn soft_delete_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        deletable: &[DocumentStatus],
    ) -> Result<bool, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["soft_delete_document"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET deleted_utc = clock_timestamp(), updated_utc = clock_timestamp()
            WHERE document_id = $1
              AND kind = $2
              AND deleted_utc IS NULL
              AND status = ANY($3)
              AND amount_paid = 0
            "#,
        )
        .bind(document_id)
        .bind(kind.as_str())
        .bind(status_strings(deletable))
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to delete document"))?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(document_id = %document_id, kind = %kind, "Document deleted");
        }

        Ok(deleted)
    }

    #[instrument(skip(self, convertible, invoice), fields(quote_id = %quote_id, number = %invoice.number))]
    async fn convert_quote(
        &self,
        quote_id: Uuid,
        convertible: &[DocumentStatus],
        invoice: &NewDocument,
    ) -> Result<Option<Document>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["convert_quote"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let marked = sqlx::query(
            r#"
            UPDATE documents
            SET status = $3, updated_utc = clock_timestamp()
            WHERE document_id = $1 AND kind = $2 AND deleted_utc IS NULL AND status = ANY($4)
            "#,
        )
        .bind(quote_id)
        .bind(DocumentKind::Quote.as_str())
        .bind(QuoteStatus::Converted.as_str())
        .bind(status_strings(convertible))
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to mark quote converted"))?;

        if marked.rows_affected() == 0 {
            return Ok(None);
        }

        let created = insert_document_in(&mut *tx, invoice).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit conversion"))?;

        timer.observe_duration();

        Ok(Some(created))
    }

    #[instrument(skip(self))]
    async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_overdue"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = $2, updated_utc = clock_timestamp()
            WHERE kind = $1
              AND status = $3
              AND deleted_utc IS NULL
              AND due_date < $4
            "#,
        )
        .bind(DocumentKind::Invoice.as_str())
        .bind(InvoiceStatus::Overdue.as_str())
        .bind(InvoiceStatus::Pending.as_str())
        .bind(as_of)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark invoices overdue"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    async fn record_payment(
        &self,
        input: &NewPayment,
    ) -> Result<Option<(Payment, Document)>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let sql = format!(
            r#"
            UPDATE documents
            SET amount_paid = amount_paid + $2,
                status = CASE WHEN amount_paid + $2 >= total THEN 'paid' ELSE status END,
                updated_utc = clock_timestamp()
            WHERE document_id = $1
              AND kind = 'invoice'
              AND deleted_utc IS NULL
              AND status IN ('pending', 'overdue')
              AND amount_paid + $2 <= total
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let Some(invoice) = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(input.invoice_id)
            .bind(input.amount)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to apply payment"))?
        else {
            return Ok(None);
        };

        let sql = format!(
            r#"
            INSERT INTO payments (payment_id, invoice_id, amount, method, reference, paid_on, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let payment = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.invoice_id)
            .bind(input.amount)
            .bind(input.method.as_str())
            .bind(&input.reference)
            .bind(input.paid_on)
            .bind(&input.notes)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to insert payment"))?;

        let line_items = line_items_for(&mut *tx, &[input.invoice_id])
            .await?
            .remove(&input.invoice_id)
            .unwrap_or_default();

        tx.commit()
            .await
            .map_err(db_error("Failed to commit payment"))?;

        timer.observe_duration();

        let payment = Payment::try_from(payment)?;
        let invoice = invoice.into_document(line_items)?;

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = %invoice.status.as_str(),
            "Payment recorded"
        );

        Ok(Some((payment, invoice)))
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM payments WHERE invoice_id = $1 ORDER BY paid_on, created_utc",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list payments"))?;

        timer.observe_duration();

        rows.into_iter().map(Payment::try_from).collect()
    }
}
