use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::routes::appointment_routes::cancel_unpaid_appointments;

/// Periodically cancel appointments left unpaid longer than `ttl_minutes`
/// and free their slots.
pub fn spawn_unpaid_sweeper(db: PgPool, ttl_minutes: i64, every: Duration) -> JoinHandle<()> {
    let older_than = chrono::Duration::minutes(ttl_minutes);

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match cancel_unpaid_appointments(&db, older_than).await {
                Ok(0) => tracing::debug!("unpaid sweep: nothing to cancel"),
                Ok(n) => tracing::info!(canceled = n, "unpaid sweep canceled appointments"),
                Err(e) => tracing::warn!(error = ?e, "unpaid sweep failed"),
            }
        }
    })
}
