use tokio::sync::broadcast::{self, error::RecvError};
use tracing::info;
use uuid::Uuid;

use crate::cli::{Commands, UploadArgs};
use uplink::config::Config;
use uplink::deletion::DeletionEvent;
use uplink::queue::UploadEvent;
use uplink::session::Sessions;
use uplink::store::Store;
use uplink::{BACKGROUND_SESSION_IDENTIFIER, Submission, UploadCoordinator, UploadDescriptor, UploadTicket};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(config: Config, command: Commands) -> Result<(), AnyError> {
    let store = Store::open(&config.storage.data_dir)?;
    let sessions = Sessions::from_config(&config.transport)?;
    let coordinator = UploadCoordinator::open(&store, sessions, config.coordinator_options())?;

    match command {
        Commands::Upload(args) => upload(&coordinator, args).await?,
        Commands::Status(args) => status(&coordinator, &args.resource_uri)?,
        Commands::Delete(args) => delete(&coordinator, &args.resource_uri).await,
        Commands::Failures => failures(&coordinator)?,
        Commands::Resume => resume(&coordinator).await,
    }

    coordinator.save()?;
    store.persist()?;
    info!(metrics = ?coordinator.metrics(), "Done");
    Ok(())
}

async fn upload(coordinator: &UploadCoordinator, args: UploadArgs) -> Result<(), AnyError> {
    let mut ticket = UploadTicket::for_resource(args.resource_uri);
    ticket.upload_link = args.upload_link;

    let mut events = coordinator.subscribe_uploads();
    let task_id = match coordinator.submit_upload(args.file, ticket)? {
        Submission::Enqueued(descriptor) => descriptor.task_id,
        Submission::AlreadyActive(descriptor) => {
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
            println!("An upload for this resource is already queued; run `uplink resume` to continue it");
            return Ok(());
        }
    };

    tokio::select! {
        finished = wait_for_upload(&mut events, task_id) => {
            if let Some(descriptor) = finished {
                println!("{}", serde_json::to_string_pretty(&descriptor)?);
            }
        }
        _ = shutdown_signal() => {
            info!(%task_id, "Interrupted, upload stays queued for the next resume");
        }
    }

    Ok(())
}

fn status(coordinator: &UploadCoordinator, resource_uri: &str) -> Result<(), AnyError> {
    match coordinator.lookup_upload(resource_uri) {
        Some(descriptor) => println!("{}", serde_json::to_string_pretty(&descriptor)?),
        None => println!("No upload known for {}", resource_uri),
    }
    Ok(())
}

async fn delete(coordinator: &UploadCoordinator, resource_uri: &str) {
    let mut events = coordinator.subscribe_deletions();
    coordinator.delete_upload(resource_uri);

    tokio::select! {
        outcome = wait_for_deletion(&mut events, resource_uri) => match outcome {
            Some(DeletionEvent::Deleted { attempts, .. }) => {
                println!("Deleted {} after {} attempt(s)", resource_uri, attempts);
            }
            Some(DeletionEvent::Failed { request, error }) => {
                println!("Giving up on {} after {} attempts: {}", resource_uri, request.attempts, error);
            }
            None => {}
        },
        _ = shutdown_signal() => {
            info!(resource_uri, "Interrupted, deletion stays queued for the next resume");
        }
    }
}

fn failures(coordinator: &UploadCoordinator) -> Result<(), AnyError> {
    let failed = coordinator.failed_uploads();
    if failed.is_empty() {
        println!("No recorded failures");
    }
    for descriptor in failed {
        println!(
            "{}\t{}\t{}",
            descriptor.identifier(),
            descriptor.updated_at.to_rfc3339(),
            descriptor.error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Behave as if relaunched for the background session and drain leftover work
async fn resume(coordinator: &UploadCoordinator) {
    let mut uploads = coordinator.subscribe_uploads();
    let mut deletions = coordinator.subscribe_deletions();

    let pending_deletions = coordinator.application_did_finish_launching();
    coordinator.handle_relaunch_events(BACKGROUND_SESSION_IDENTIFIER, || {
        info!("Relaunch bookkeeping complete");
    });

    let drain = async {
        while !coordinator.queued_uploads().is_empty() {
            if let Err(RecvError::Closed) = uploads.recv().await {
                break;
            }
        }

        let mut remaining = pending_deletions;
        while remaining > 0 {
            match deletions.recv().await {
                Ok(_) => remaining -= 1,
                Err(RecvError::Lagged(skipped)) => {
                    remaining = remaining.saturating_sub(skipped as usize)
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = drain => {
            println!("Resumed work finished; {} failure(s) recorded", coordinator.failed_uploads().len());
        }
        _ = shutdown_signal() => info!("Interrupted, remaining work stays queued"),
    }
}

async fn wait_for_upload(
    events: &mut broadcast::Receiver<UploadEvent>,
    task_id: Uuid,
) -> Option<UploadDescriptor> {
    loop {
        match events.recv().await {
            Ok(event)
                if event.descriptor.task_id == task_id && event.descriptor.status.is_terminal() =>
            {
                return Some(event.descriptor);
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn wait_for_deletion(
    events: &mut broadcast::Receiver<DeletionEvent>,
    resource_uri: &str,
) -> Option<DeletionEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.resource_uri() == resource_uri => return Some(event),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
