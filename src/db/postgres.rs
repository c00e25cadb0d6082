use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    Executor, Pool, Postgres, Row, Transaction as PgTransaction,
};
use uuid::Uuid;

use super::{RideFilter, Store, TransactionFilter, UnitOfWork};
use crate::entities::{Ride, Transaction, Wallet, WalletEntry};
use crate::error::Error;

type Database = Postgres;

pub struct PgStore {
    pool: Pool<Database>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip(db_uri))]
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        // TODO: move this to migrations
        pool.execute("CREATE TABLE IF NOT EXISTS rides (id UUID PRIMARY KEY, rider_id UUID NOT NULL, driver_id UUID, status VARCHAR NOT NULL, created_at TIMESTAMPTZ NOT NULL, data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS transactions (id UUID PRIMARY KEY, ride_id UUID NOT NULL UNIQUE, rider_id UUID NOT NULL, driver_id UUID NOT NULL, status VARCHAR NOT NULL, created_at TIMESTAMPTZ NOT NULL, data JSONB NOT NULL, CONSTRAINT fk_transaction_ride FOREIGN KEY(ride_id) REFERENCES rides(id))")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS wallets (id UUID PRIMARY KEY, owner_id UUID NOT NULL UNIQUE, balance DECIMAL NOT NULL CHECK (balance >= 0), data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS wallet_entries (id UUID PRIMARY KEY, wallet_id UUID NOT NULL, transaction_id UUID NOT NULL, delta DECIMAL NOT NULL, created_at TIMESTAMPTZ NOT NULL, data JSONB NOT NULL, CONSTRAINT fk_entry_wallet FOREIGN KEY(wallet_id) REFERENCES wallets(id), CONSTRAINT fk_entry_transaction FOREIGN KEY(transaction_id) REFERENCES transactions(id))")
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, Error> {
        let tx = self.pool.begin().await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn begin_snapshot(&self) -> Result<Box<dyn UnitOfWork>, Error> {
        let mut tx = self.pool.begin().await?;

        // must be the first statement of the transaction
        tx.execute("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: PgTransaction<'static, Database>,
}

fn decode<T: serde::de::DeserializeOwned>(row: PgRow) -> Result<T, Error> {
    let Json(data): Json<T> = row.try_get("data")?;

    Ok(data)
}

impl PgUnitOfWork {
    async fn fetch_data<T: serde::de::DeserializeOwned>(
        &mut self,
        query: &str,
        id: &Uuid,
    ) -> Result<Option<T>, Error> {
        let maybe_row = self
            .tx
            .fetch_optional(sqlx::query(query).bind(id))
            .await?;

        maybe_row.map(decode::<T>).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[tracing::instrument(skip(self))]
    async fn find_ride(&mut self, id: &Uuid) -> Result<Option<Ride>, Error> {
        self.fetch_data("SELECT data FROM rides WHERE id = $1", id)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_ride_for_update(&mut self, id: &Uuid) -> Result<Option<Ride>, Error> {
        self.fetch_data("SELECT data FROM rides WHERE id = $1 FOR UPDATE", id)
            .await
    }

    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    async fn insert_ride(&mut self, ride: &Ride) -> Result<(), Error> {
        self.tx
            .execute(
                sqlx::query("INSERT INTO rides (id, rider_id, driver_id, status, created_at, data) VALUES ($1, $2, $3, $4, $5, $6)")
                    .bind(&ride.id)
                    .bind(&ride.rider_id)
                    .bind(&ride.driver_id)
                    .bind(ride.status.name())
                    .bind(&ride.created_at)
                    .bind(Json(ride)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    async fn update_ride(&mut self, ride: &Ride) -> Result<(), Error> {
        self.tx
            .execute(
                sqlx::query("UPDATE rides SET driver_id = $2, status = $3, data = $4 WHERE id = $1")
                    .bind(&ride.id)
                    .bind(&ride.driver_id)
                    .bind(ride.status.name())
                    .bind(Json(ride)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_rides(&mut self, filter: &RideFilter) -> Result<Vec<Ride>, Error> {
        let query = "
            SELECT
                data
            FROM
                rides
            WHERE
                ($1::UUID IS NULL OR rider_id = $1 OR driver_id = $1)
                AND ($2::VARCHAR IS NULL OR status = $2)
            ORDER BY
                created_at DESC
            OFFSET $3
            LIMIT $4
        ";

        let (offset, limit) = filter.page();

        let mut rows = self.tx.fetch(
            sqlx::query(query)
                .bind(&filter.participant_id)
                .bind(&filter.status)
                .bind(offset)
                .bind(limit),
        );

        let mut rides = Vec::new();
        while let Some(row) = rows.try_next().await? {
            rides.push(decode(row)?);
        }

        Ok(rides)
    }

    #[tracing::instrument(skip(self))]
    async fn find_transaction(&mut self, id: &Uuid) -> Result<Option<Transaction>, Error> {
        self.fetch_data("SELECT data FROM transactions WHERE id = $1", id)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_transaction_for_update(
        &mut self,
        id: &Uuid,
    ) -> Result<Option<Transaction>, Error> {
        self.fetch_data("SELECT data FROM transactions WHERE id = $1 FOR UPDATE", id)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn find_transaction_for_ride(
        &mut self,
        ride_id: &Uuid,
    ) -> Result<Option<Transaction>, Error> {
        self.fetch_data("SELECT data FROM transactions WHERE ride_id = $1", ride_id)
            .await
    }

    #[tracing::instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), Error> {
        self.tx
            .execute(
                sqlx::query("INSERT INTO transactions (id, ride_id, rider_id, driver_id, status, created_at, data) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                    .bind(&transaction.id)
                    .bind(&transaction.ride_id)
                    .bind(&transaction.rider_id)
                    .bind(&transaction.driver_id)
                    .bind(transaction.status.name())
                    .bind(&transaction.created_at)
                    .bind(Json(transaction)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), Error> {
        self.tx
            .execute(
                sqlx::query("UPDATE transactions SET status = $2, data = $3 WHERE id = $1")
                    .bind(&transaction.id)
                    .bind(transaction.status.name())
                    .bind(Json(transaction)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_transactions(
        &mut self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, Error> {
        let query = "
            SELECT
                data
            FROM
                transactions
            WHERE
                ($1::UUID IS NULL OR rider_id = $1 OR driver_id = $1)
                AND ($2::VARCHAR IS NULL OR status = $2)
            ORDER BY
                created_at DESC
        ";

        let mut rows = self.tx.fetch(
            sqlx::query(query)
                .bind(&filter.participant_id)
                .bind(&filter.status),
        );

        let mut transactions = Vec::new();
        while let Some(row) = rows.try_next().await? {
            transactions.push(decode(row)?);
        }

        Ok(transactions)
    }

    #[tracing::instrument(skip(self))]
    async fn find_wallet(&mut self, owner_id: &Uuid) -> Result<Option<Wallet>, Error> {
        self.fetch_data("SELECT data FROM wallets WHERE owner_id = $1", owner_id)
            .await
    }

    #[tracing::instrument(skip(self, default), fields(owner_id = %default.owner_id))]
    async fn fetch_or_create_wallet_for_update(
        &mut self,
        default: &Wallet,
    ) -> Result<Wallet, Error> {
        // concurrent openers race on the owner_id constraint, not on an error
        self.tx
            .execute(
                sqlx::query("INSERT INTO wallets (id, owner_id, balance, data) VALUES ($1, $2, $3, $4) ON CONFLICT (owner_id) DO NOTHING")
                    .bind(&default.id)
                    .bind(&default.owner_id)
                    .bind(&default.balance)
                    .bind(Json(default)),
            )
            .await?;

        self.fetch_wallet_for_update(&default.owner_id)
            .await?
            .ok_or_else(Error::unexpected_error)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_wallet_for_update(&mut self, owner_id: &Uuid) -> Result<Option<Wallet>, Error> {
        self.fetch_data(
            "SELECT data FROM wallets WHERE owner_id = $1 FOR UPDATE",
            owner_id,
        )
        .await
    }

    #[tracing::instrument(skip(self, wallet), fields(wallet_id = %wallet.id))]
    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), Error> {
        self.tx
            .execute(
                sqlx::query("UPDATE wallets SET balance = $2, data = $3 WHERE id = $1")
                    .bind(&wallet.id)
                    .bind(&wallet.balance)
                    .bind(Json(wallet)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_wallets(&mut self) -> Result<Vec<Wallet>, Error> {
        let mut rows = self.tx.fetch("SELECT data FROM wallets");

        let mut wallets = Vec::new();
        while let Some(row) = rows.try_next().await? {
            wallets.push(decode(row)?);
        }

        Ok(wallets)
    }

    #[tracing::instrument(skip(self, entry), fields(wallet_id = %entry.wallet_id))]
    async fn insert_wallet_entry(&mut self, entry: &WalletEntry) -> Result<(), Error> {
        self.tx
            .execute(
                sqlx::query("INSERT INTO wallet_entries (id, wallet_id, transaction_id, delta, created_at, data) VALUES ($1, $2, $3, $4, $5, $6)")
                    .bind(&entry.id)
                    .bind(&entry.wallet_id)
                    .bind(&entry.transaction_id)
                    .bind(&entry.delta)
                    .bind(&entry.created_at)
                    .bind(Json(entry)),
            )
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_wallet_entries(
        &mut self,
        wallet_id: Option<&Uuid>,
    ) -> Result<Vec<WalletEntry>, Error> {
        let query = "
            SELECT
                data
            FROM
                wallet_entries
            WHERE
                ($1::UUID IS NULL OR wallet_id = $1)
            ORDER BY
                created_at, id
        ";

        let mut rows = self.tx.fetch(sqlx::query(query).bind(wallet_id.copied()));

        let mut entries = Vec::new();
        while let Some(row) = rows.try_next().await? {
            entries.push(decode(row)?);
        }

        Ok(entries)
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let PgUnitOfWork { tx } = *self;
        tx.commit().await?;

        Ok(())
    }
}

#[test]
#[ignore = "requires a running PostgreSQL instance"]
fn new_pg_store() {
    use crate::config::Config;
    use tokio_test::block_on;

    let config = Config::default();

    block_on(PgStore::new(&config.database_url, config.max_connections)).unwrap();
}
