//! Decides which storage mutation a command needs, from what is on disk.

use crate::{
    Basket, BasketState, Command, Console, PeerError, Pipeline, PooledTicket, Result, Stage,
    StorageRequest, Ticket,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Result of probing the filesystem for one basket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub state: BasketState,
    /// The working path that was probed: the caller's `path` argument, or
    /// the basket's own working path.
    pub working: PathBuf,
    pub working_exists: bool,
}

/// Probes archived, then working, then deleted path; the first one found
/// decides the state. A caller-supplied working path outside the basket's
/// working directory is a `BadRequest`.
pub async fn probe(basket: &Basket, root: &Path, working: Option<&str>) -> Result<Probe> {
    let working = match working {
        Some(given) => basket.checked_working_path(root, given)?,
        None => basket.working_path(root),
    };
    let working_exists = fs::try_exists(&working).await?;

    let state = if fs::try_exists(basket.archived_path(root)).await? {
        BasketState::Archived
    } else if working_exists {
        BasketState::Working
    } else if fs::try_exists(basket.deleted_path(root)).await? {
        BasketState::Deleted
    } else {
        BasketState::Absent
    };

    Ok(Probe {
        state,
        working,
        working_exists,
    })
}

/// The legality table: one storage request, or the error the client gets.
pub fn resolve(
    command: Command,
    basket: &Basket,
    root: &Path,
    probe: &Probe,
) -> Result<StorageRequest> {
    let archived = basket.archived_path(root);
    let display = |path: &Path| path.display().to_string();

    match command {
        Command::Create => match probe.state {
            BasketState::Absent => Ok(StorageRequest::Create {
                path: basket.working_path(root),
            }),
            BasketState::Working => Err(PeerError::AlreadyExists(display(&probe.working))),
            BasketState::Archived => Err(PeerError::AlreadyExists(display(&archived))),
            BasketState::Deleted => Err(PeerError::AlreadyExists(display(
                &basket.deleted_path(root),
            ))),
        },
        Command::Clone => match probe.state {
            BasketState::Archived => Ok(StorageRequest::Clone {
                source: archived,
                dest: basket.working_path(root),
            }),
            _ => Err(PeerError::NotFound(display(&archived))),
        },
        Command::Delete => match probe.state {
            BasketState::Archived => Ok(StorageRequest::Delete {
                source: archived,
                dest: basket.deleted_path(root),
            }),
            _ => Err(PeerError::NotFound(display(&archived))),
        },
        Command::Cancel => match probe.state {
            BasketState::Working if probe.working_exists => Ok(StorageRequest::Cancel {
                source: probe.working.clone(),
                dest: basket.cancel_path(root, &probe.working),
            }),
            BasketState::Working => Err(PeerError::NotFound(display(&probe.working))),
            BasketState::Absent => Err(PeerError::PreconditionFailed(
                "The basket does not exist.".to_string(),
            )),
            BasketState::Archived => Err(PeerError::PreconditionFailed(format!(
                "The basket has been already finalized: {}",
                display(&archived)
            ))),
            BasketState::Deleted => Err(PeerError::PreconditionFailed(format!(
                "The basket has been already deleted: {}",
                display(&basket.deleted_path(root))
            ))),
        },
        Command::Finalize => match probe.state {
            BasketState::Archived => Err(PeerError::AlreadyExists(display(&archived))),
            _ if probe.working_exists => Ok(StorageRequest::Finalize {
                source: probe.working.clone(),
                dest: archived,
            }),
            _ => Err(PeerError::NotFound(display(&probe.working))),
        },
        other => Err(PeerError::Internal(format!(
            "Unknown command for basket status resolution: {}",
            other
        ))),
    }
}

pub struct BasketStatusResolver {
    storage_root: PathBuf,
    console: Arc<dyn Console>,
    controller: Arc<Pipeline<PooledTicket>>,
    responses: Arc<Pipeline<PooledTicket>>,
}

impl BasketStatusResolver {
    pub fn new(
        storage_root: PathBuf,
        console: Arc<dyn Console>,
        controller: Arc<Pipeline<PooledTicket>>,
        responses: Arc<Pipeline<PooledTicket>>,
    ) -> Self {
        Self {
            storage_root,
            console,
            controller,
            responses,
        }
    }

    async fn decide(&self, ticket: &mut Ticket) -> Result<StorageRequest> {
        let (Some(basket), Some(command)) = (ticket.basket, ticket.command_kind) else {
            return Err(PeerError::Internal(
                "ticket reached basket status resolution without basket or command".to_string(),
            ));
        };

        let working = ticket.args.get("path").map(String::as_str);
        let probe = probe(&basket, &self.storage_root, working).await?;

        let decision = resolve(command, &basket, &self.storage_root, &probe);
        if let Err(PeerError::AlreadyExists(path)) = &decision {
            if matches!(command, Command::Create | Command::Finalize) {
                ticket.message = Some(format!(
                    "{} failed: AlreadyExistsError: {} {}",
                    command, basket, path
                ));
            }
        }
        decision
    }
}

#[async_trait]
impl Stage for BasketStatusResolver {
    type Item = PooledTicket;

    async fn process(&self, mut ticket: PooledTicket) {
        ticket.mark();
        match self.decide(&mut ticket).await {
            Ok(request) => {
                ticket.request = Some(request);
                self.controller.enqueue(ticket);
            }
            Err(error) => {
                match &error {
                    PeerError::NotFound(_) => {
                        if let Some(basket) = &ticket.basket {
                            self.console.publish_drop(basket);
                        }
                    }
                    error if !error.is_client_error() => {
                        tracing::error!(
                            "Basket status resolution failed for {} {}: {}",
                            ticket.command,
                            ticket.basket.map(|b| b.to_string()).unwrap_or_default(),
                            error
                        );
                    }
                    _ => {}
                }
                ticket.set_result(Err(error));
                self.responses.enqueue(ticket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [BasketState; 4] = [
        BasketState::Absent,
        BasketState::Working,
        BasketState::Archived,
        BasketState::Deleted,
    ];

    fn root() -> PathBuf {
        PathBuf::from("/expdsk")
    }

    fn basket() -> Basket {
        Basket::new(1_000_123, 1, 1)
    }

    fn probe_in(state: BasketState) -> Probe {
        Probe {
            state,
            working: basket().working_path(&root()),
            working_exists: state == BasketState::Working,
        }
    }

    fn outcome(command: Command, state: BasketState) -> Result<StorageRequest> {
        resolve(command, &basket(), &root(), &probe_in(state))
    }

    #[test]
    fn test_create_row() {
        let b = basket();
        let r = root();
        assert_eq!(
            outcome(Command::Create, BasketState::Absent).unwrap(),
            StorageRequest::Create {
                path: b.working_path(&r)
            }
        );

        let expected = [
            (BasketState::Working, b.working_path(&r)),
            (BasketState::Archived, b.archived_path(&r)),
            (BasketState::Deleted, b.deleted_path(&r)),
        ];
        for (state, path) in expected {
            match outcome(Command::Create, state) {
                Err(PeerError::AlreadyExists(reason)) => {
                    assert_eq!(reason, path.display().to_string())
                }
                other => panic!("CREATE in {}: {:?}", state, other),
            }
        }
    }

    #[test]
    fn test_clone_and_delete_need_archived() {
        let b = basket();
        let r = root();
        assert_eq!(
            outcome(Command::Clone, BasketState::Archived).unwrap(),
            StorageRequest::Clone {
                source: b.archived_path(&r),
                dest: b.working_path(&r)
            }
        );
        assert_eq!(
            outcome(Command::Delete, BasketState::Archived).unwrap(),
            StorageRequest::Delete {
                source: b.archived_path(&r),
                dest: b.deleted_path(&r)
            }
        );

        for state in [BasketState::Absent, BasketState::Working, BasketState::Deleted] {
            for command in [Command::Clone, Command::Delete] {
                match outcome(command, state) {
                    Err(PeerError::NotFound(path)) => {
                        assert_eq!(path, b.archived_path(&r).display().to_string())
                    }
                    other => panic!("{} in {}: {:?}", command, state, other),
                }
            }
        }
    }

    #[test]
    fn test_cancel_only_from_working() {
        let b = basket();
        let r = root();
        for state in STATES {
            let result = outcome(Command::Cancel, state);
            if state == BasketState::Working {
                let working = b.working_path(&r);
                assert_eq!(
                    result.unwrap(),
                    StorageRequest::Cancel {
                        dest: b.cancel_path(&r, &working),
                        source: working,
                    }
                );
            } else {
                assert!(
                    matches!(result, Err(PeerError::PreconditionFailed(_))),
                    "CANCEL in {}",
                    state
                );
            }
        }
    }

    #[test]
    fn test_finalize_row() {
        let b = basket();
        let r = root();
        assert_eq!(
            outcome(Command::Finalize, BasketState::Working).unwrap(),
            StorageRequest::Finalize {
                source: b.working_path(&r),
                dest: b.archived_path(&r)
            }
        );
        assert!(matches!(
            outcome(Command::Finalize, BasketState::Archived),
            Err(PeerError::AlreadyExists(_))
        ));
        for state in [BasketState::Absent, BasketState::Deleted] {
            match outcome(Command::Finalize, state) {
                Err(PeerError::NotFound(path)) => {
                    assert_eq!(path, b.working_path(&r).display().to_string())
                }
                other => panic!("FINALIZE in {}: {:?}", state, other),
            }
        }
    }

    #[test]
    fn test_finalize_after_delete_with_live_working_dir() {
        let mut probe = probe_in(BasketState::Deleted);
        probe.working_exists = true;
        let request = resolve(Command::Finalize, &basket(), &root(), &probe).unwrap();
        assert!(matches!(request, StorageRequest::Finalize { .. }));
    }

    #[test]
    fn test_non_mutating_command_is_internal_error() {
        for state in STATES {
            assert!(matches!(
                outcome(Command::Get, state),
                Err(PeerError::Internal(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_probe_prefers_archived_then_working_then_deleted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let b = basket();

        assert_eq!(probe(&b, root, None).await.unwrap().state, BasketState::Absent);

        std::fs::create_dir_all(b.deleted_path(root)).unwrap();
        assert_eq!(probe(&b, root, None).await.unwrap().state, BasketState::Deleted);

        std::fs::create_dir_all(b.working_path(root)).unwrap();
        let probed = probe(&b, root, None).await.unwrap();
        assert_eq!(probed.state, BasketState::Working);
        assert!(probed.working_exists);

        std::fs::create_dir_all(b.archived_path(root)).unwrap();
        let probed = probe(&b, root, None).await.unwrap();
        assert_eq!(probed.state, BasketState::Archived);
        assert!(probed.working_exists);
    }

    #[tokio::test]
    async fn test_probe_uses_given_working_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let custom = basket()
            .working_path(root)
            .with_file_name("1000123.1.1.upload");
        std::fs::create_dir_all(&custom).unwrap();

        let given = custom.display().to_string();
        let probed = probe(&basket(), root, Some(&given)).await.unwrap();
        assert_eq!(probed.state, BasketState::Working);
        assert_eq!(probed.working, custom);
    }

    #[tokio::test]
    async fn test_working_path_outside_storage_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("storage");
        let victim = temp_dir.path().join("victim");
        std::fs::create_dir_all(victim.join("secret")).unwrap();

        let pool = crate::TicketPool::new("Test ticket pool", "ttp", 2);
        let console = Arc::new(crate::testing::RecordingConsole::default());
        let controller = Pipeline::new("Storage controller", "sm");
        let responses = Pipeline::new("Responses", "tr");
        let resolver =
            BasketStatusResolver::new(root, console, controller.clone(), responses.clone());

        for command in [Command::Finalize, Command::Cancel] {
            let mut ticket = pool.create_ticket();
            ticket.command = command.to_string();
            ticket.command_kind = Some(command);
            ticket.basket = Some(Basket::new(8000, 1, 1));
            ticket
                .args
                .insert("path".to_string(), victim.display().to_string());
            resolver.process(ticket).await;

            let mut ticket = responses.dequeue().await.unwrap();
            assert!(
                matches!(ticket.take_result(), Err(PeerError::BadRequest(_))),
                "{}",
                command
            );
        }
        assert!(controller.is_empty());
        assert!(victim.join("secret").is_dir());
    }
}
