//! Retrying transactions.
//!
//! [`Client::transaction`] runs a closure inside `start transaction` /
//! `commit` on one pooled connection. When the attempt fails with a
//! transient error (serialization failure, conflict, dropped link) the
//! whole closure runs again on a fresh checkout, up to the retry policy's
//! attempt limit with backoff in between. Any other error rolls the
//! transaction back and is returned unchanged.
//!
//! ```rust,ignore
//! let total = client
//!     .transaction(async |tx| {
//!         tx.execute("update Account filter .id = <uuid>$0 set { balance := .balance - 10 }", &args).await?;
//!         tx.query_single_as::<i64>("select sum(Account.balance)", &QueryArgs::none()).await
//!     })
//!     .await?;
//! ```

use edb_types::{FromValue, QueryArgs, Value};

use crate::client::Client;
use crate::config::TransportKind;
use crate::connection::Connection;
use crate::error::{Error, Result};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Serializable (the server default).
    #[default]
    Serializable,
    /// Repeatable read.
    RepeatableRead,
}

impl IsolationLevel {
    /// Keyword used in `start transaction`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serializable => "serializable",
            Self::RepeatableRead => "repeatable read",
        }
    }
}

/// Options for `start transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct TransactionOptions {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Reject writes.
    pub read_only: bool,
    /// Wait for a safe snapshot instead of failing (read-only serializable).
    pub deferrable: bool,
}

impl TransactionOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Make the transaction read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Make the transaction deferrable.
    #[must_use]
    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// The `start transaction` statement for these options.
    #[must_use]
    pub fn start_statement(&self) -> String {
        let mut statement = format!("start transaction isolation {}", self.isolation.as_str());
        statement.push_str(if self.read_only { ", read only" } else { ", read write" });
        if self.deferrable {
            statement.push_str(", deferrable");
        }
        statement
    }
}

/// An open transaction, handed to the closure of [`Client::transaction`].
pub struct Transaction<'a> {
    conn: &'a mut Connection,
}

impl<'a> Transaction<'a> {
    fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Run a query and return all rows.
    pub async fn query(&mut self, text: &str, args: &QueryArgs) -> Result<Vec<Value>> {
        self.conn.query(text, args).await
    }

    /// Run a query that must return exactly one row.
    pub async fn query_single(&mut self, text: &str, args: &QueryArgs) -> Result<Value> {
        self.conn.query_single(text, args).await
    }

    /// Run a single-row query and convert the row.
    pub async fn query_single_as<T: FromValue>(
        &mut self,
        text: &str,
        args: &QueryArgs,
    ) -> Result<T> {
        let value = self.conn.query_single(text, args).await?;
        Ok(T::from_value(value)?)
    }

    /// Run a query and return the result as a JSON array.
    pub async fn query_json(&mut self, text: &str, args: &QueryArgs) -> Result<String> {
        self.conn.query_json(text, args).await
    }

    /// Run a command and discard its output.
    pub async fn execute(&mut self, text: &str, args: &QueryArgs) -> Result<()> {
        self.conn.execute_command(text, args).await.map(drop)
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.conn.transaction_state())
            .finish()
    }
}

impl Client {
    /// Run `body` in a transaction with default options, retrying on
    /// transient errors.
    pub async fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: AsyncFnMut(&mut Transaction<'_>) -> Result<T>,
    {
        self.transaction_with(TransactionOptions::default(), body).await
    }

    /// Run `body` in a transaction, retrying on transient errors.
    ///
    /// The closure may run several times; it must not have effects outside
    /// the transaction that cannot be repeated.
    pub async fn transaction_with<T, F>(
        &self,
        options: TransactionOptions,
        mut body: F,
    ) -> Result<T>
    where
        F: AsyncFnMut(&mut Transaction<'_>) -> Result<T>,
    {
        if self.transport() == TransportKind::Http {
            return Err(Error::Configuration(
                "transactions require the binary transport".into(),
            ));
        }

        let policy = self.retry_policy().clone();
        let start = options.start_statement();
        let mut attempts = 0;
        loop {
            attempts += 1;
            // Acquire and reconnect failures go through the same retry
            // decision as failures inside the attempt.
            let outcome = match self.acquire().await {
                Ok(mut conn) => run_attempt(&mut conn, &start, &mut body).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(attempts, "transaction committed after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && policy.should_retry(attempts) => {
                    let backoff = policy.backoff_for_attempt(attempts);
                    tracing::warn!(
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        ?backoff,
                        error = %e,
                        "transaction failed with a transient error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn run_attempt<T, F>(conn: &mut Connection, start: &str, body: &mut F) -> Result<T>
where
    F: AsyncFnMut(&mut Transaction<'_>) -> Result<T>,
{
    let none = QueryArgs::none();
    conn.execute_command(start, &none).await?;

    let outcome = {
        let mut tx = Transaction::new(conn);
        body(&mut tx).await
    };
    let outcome = match outcome {
        Ok(value) => conn.execute_command("commit", &none).await.map(|_| value),
        Err(e) => Err(e),
    };

    if outcome.is_err() && conn.state().is_usable() && conn.is_in_transaction() {
        if let Err(e) = conn.execute_command("rollback", &none).await {
            tracing::debug!(error = %e, "rollback failed");
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_statement() {
        assert_eq!(
            TransactionOptions::new().start_statement(),
            "start transaction isolation serializable, read write"
        );
        assert_eq!(
            TransactionOptions::new()
                .isolation(IsolationLevel::RepeatableRead)
                .read_only(true)
                .deferrable(true)
                .start_statement(),
            "start transaction isolation repeatable read, read only, deferrable"
        );
    }
}
