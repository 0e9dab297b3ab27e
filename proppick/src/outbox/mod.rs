//! Durable email intents.
//!
//! Services write an outbox row in the same transaction as the state the email describes, then
//! hand the id to [`OutboxDispatcher::deliver_now`] after commit. Anything that fails there is
//! retried by the background loop in [`OutboxDispatcher::run`]. A send failure therefore never
//! rolls back an account, a code or a token.

pub mod dispatcher;

pub use dispatcher::OutboxDispatcher;

use sqlx::SqliteConnection;
use tracing::instrument;

use crate::{
    db::{handlers::EmailOutbox, models::email_outbox::OutboxEmailCreateDBRequest},
    email::RenderedEmail,
    errors::Result,
    types::{OutboxId, UserId},
};

/// Persist a rendered message for delivery after the surrounding transaction commits.
#[instrument(skip(conn, email), fields(subject = %email.subject), err)]
pub async fn enqueue(conn: &mut SqliteConnection, user_id: Option<UserId>, to: &str, email: RenderedEmail) -> Result<OutboxId> {
    let row = EmailOutbox::new(conn)
        .enqueue(&OutboxEmailCreateDBRequest {
            user_id,
            to_address: to.to_string(),
            subject: email.subject,
            html_body: email.html_body,
        })
        .await?;
    Ok(row.id)
}
