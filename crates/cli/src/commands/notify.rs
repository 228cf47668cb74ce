//! Notification commands.
//!
//! # Usage
//!
//! ```bash
//! cartsync notify send -a acct_123 -k order-update -t "Order Confirmed" -b "Ships tomorrow"
//! cartsync notify watch -a acct_123
//! ```
//!
//! `watch` surfaces notifications through the log-based notifier, gated by
//! `CARTSYNC_NOTIFICATION_PERMISSION`.

use std::sync::Arc;

use cartsync::notifications::LogNotifier;
use cartsync::remote::postgres::{PgNotificationFeed, PgNotificationStore};
use cartsync::{NotificationCenter, SyncConfig};
use cartsync_core::{AccountId, NotificationDraft, NotificationKind, NotificationRecord};

use super::{CommandError, connect};

async fn open(config: &SyncConfig) -> Result<NotificationCenter, CommandError> {
    let pool = connect(config).await?;
    Ok(NotificationCenter::new(
        Arc::new(PgNotificationStore::new(pool.clone())),
        Arc::new(PgNotificationFeed::new(pool)),
        Arc::new(LogNotifier::new(config.notification_permission)),
        config.write_ordering,
    ))
}

/// Insert a notification into an account's inbox.
pub async fn send(
    config: &SyncConfig,
    account: &str,
    kind: NotificationKind,
    title: &str,
    body: &str,
) -> Result<(), CommandError> {
    let mut center = open(config).await?;
    center.attach(AccountId::new(account)).await;

    let record = center.send(NotificationDraft::new(kind, title, body)).await?;
    center.dispose().await;

    #[allow(clippy::print_stdout)]
    {
        println!("Sent {} ({}) to {}", record.id, record.kind, record.account_id);
    }
    Ok(())
}

/// Print the inbox, then surface inserts until Ctrl+C.
pub async fn watch(config: &SyncConfig, account: &str) -> Result<(), CommandError> {
    let mut center = open(config).await?;
    let status = center.attach(AccountId::new(account)).await;
    if !status.live {
        center.dispose().await;
        return Err(CommandError::Store(cartsync::remote::StoreError::Subscription(
            "realtime feed unavailable".to_string(),
        )));
    }

    print_inbox(&center);
    tracing::info!(permission = %center.permission(), "Watching for notifications (Ctrl+C to stop)");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            event = center.next_event() => event,
            () = &mut shutdown => break,
        };
        let Some(record) = event else {
            tracing::warn!("Notification feed closed");
            break;
        };
        print_record(&record, center.unread_count());
    }

    center.dispose().await;
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_inbox(center: &NotificationCenter) {
    println!(
        "{} notification(s), {} unread",
        center.notifications().len(),
        center.unread_count()
    );
    for record in center.notifications() {
        let marker = if record.read { " " } else { "*" };
        println!(
            "{marker} {} [{}] {}: {}",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.kind,
            record.title,
            record.body
        );
    }
}

#[allow(clippy::print_stdout)]
fn print_record(record: &NotificationRecord, unread: usize) {
    println!(
        "+ {} [{}] {}: {} ({unread} unread)",
        record.created_at.format("%Y-%m-%d %H:%M"),
        record.kind,
        record.title,
        record.body
    );
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
