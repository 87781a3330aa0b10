use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{GenerateClient, UploadClient, UploadReceipt};
use crate::error::ClientError;
use crate::events::{ImageHandle, PointerSample, SessionCommand, SessionEvent, VariantMatrix};
use crate::selection::{Completion, GenerationTicket, SelectionController};

enum Outcome {
    Uploaded {
        seq: u64,
        result: Result<UploadReceipt, ClientError>,
    },
    Generated {
        ticket: GenerationTicket,
        result: Result<VariantMatrix, ClientError>,
    },
}

/// The event receiver went away; nobody is listening any more.
struct Closed;

struct Session {
    upload: UploadClient,
    generate: GenerateClient,
    controller: SelectionController,
    handle: Option<ImageHandle>,
    upload_seq: u64,
    events: Sender<SessionEvent>,
}

/// Drives uploads, generate calls and pointer selection for one user session.
///
/// Rules:
/// - Network calls run concurrently with pointer handling; the loop never
///   blocks on them.
/// - Only the latest upload may set the image handle; a new handle clears
///   the installed variants.
/// - Only the latest generate call may install a matrix. A failed call
///   leaves the previously shown variant in place.
/// - Pointer samples are mapped synchronously and report only real changes.
pub async fn run(
    mut cmd_rx: Receiver<SessionCommand>,
    events: Sender<SessionEvent>,
    cancel: CancellationToken,
    upload: UploadClient,
    generate: GenerateClient,
    controller: SelectionController,
) -> Result<()> {
    let mut session = Session {
        upload,
        generate,
        controller,
        handle: None,
        upload_seq: 0,
        events,
    };
    let mut tasks: JoinSet<Outcome> = JoinSet::new();
    let mut commands_open = true;

    loop {
        let step = select! {
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv(), if commands_open => match cmd {
                Some(cmd) => session.on_command(cmd, &mut tasks).await,
                None => {
                    debug!("session command channel closed");
                    commands_open = false;
                    Ok(())
                }
            },

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                Ok(outcome) => session.on_outcome(outcome).await,
                Err(err) => {
                    warn!("session task failed to join: {err}");
                    Ok(())
                }
            },
        };

        if step.is_err() {
            debug!("session event receiver closed");
            break;
        }
        if !commands_open && tasks.is_empty() {
            break;
        }
    }

    tasks.abort_all();
    Ok(())
}

impl Session {
    async fn on_command(
        &mut self,
        cmd: SessionCommand,
        tasks: &mut JoinSet<Outcome>,
    ) -> Result<(), Closed> {
        match cmd {
            SessionCommand::Upload { bytes, mime_hint } => {
                self.upload_seq += 1;
                let seq = self.upload_seq;
                let client = self.upload.clone();
                debug!(seq, bytes = bytes.len(), "dispatching upload");
                tasks.spawn(async move {
                    let result = client.upload(&bytes, mime_hint.as_deref()).await;
                    Outcome::Uploaded { seq, result }
                });
                Ok(())
            }
            SessionCommand::Generate { target } => {
                let Some(handle) = self.handle.clone() else {
                    return self.report(ClientError::MissingHandle).await;
                };
                let ticket = self.controller.begin_generation();
                let client = self.generate.clone();
                tasks.spawn(async move {
                    let result = client.generate(&handle, target.as_deref()).await;
                    Outcome::Generated { ticket, result }
                });
                self.emit(SessionEvent::GenerationStarted {
                    generation: ticket.value(),
                })
                .await
            }
            SessionCommand::Pointer(sample) => match self.controller.on_pointer(sample) {
                Some(selection) => {
                    self.emit(SessionEvent::Selected {
                        index: selection.index,
                        settings: selection.variant.settings,
                        image: selection.variant.image,
                    })
                    .await
                }
                None => Ok(()),
            },
            SessionCommand::SetMode(mode) => {
                info!(?mode, "interaction mode changed");
                self.controller.set_mode(mode);
                Ok(())
            }
        }
    }

    async fn on_outcome(&mut self, outcome: Outcome) -> Result<(), Closed> {
        match outcome {
            Outcome::Uploaded { seq, .. } if seq != self.upload_seq => {
                debug!(seq, latest = self.upload_seq, "discarding superseded upload");
                Ok(())
            }
            Outcome::Uploaded {
                result: Ok(receipt),
                ..
            } => {
                self.controller.reset();
                self.handle = Some(receipt.handle.clone());
                self.emit(SessionEvent::Uploaded {
                    handle: receipt.handle,
                    preview: receipt.preview,
                })
                .await
            }
            Outcome::Uploaded {
                result: Err(err), ..
            } => self.report(err).await,
            Outcome::Generated { ticket, result } => match result {
                Ok(matrix) => match self.controller.complete(ticket, matrix.clone()) {
                    Completion::Installed { index } => {
                        self.emit(SessionEvent::Populated {
                            generation: ticket.value(),
                            matrix,
                            index,
                        })
                        .await
                    }
                    Completion::Restored => {
                        self.report(ClientError::GenerateIntegrity(
                            "response contains no variants".into(),
                        ))
                        .await
                    }
                    Completion::Stale => Ok(()),
                },
                Err(err) => match self.controller.fail(ticket) {
                    Completion::Stale => {
                        debug!(generation = ticket.value(), "ignoring failure of stale generate call: {err}");
                        Ok(())
                    }
                    _ => self.report(err).await,
                },
            },
        }
    }

    async fn report(&self, err: ClientError) -> Result<(), Closed> {
        let message = error_chain(&err);
        warn!(kind = ?err.kind(), "{message}");
        self.emit(SessionEvent::Failed {
            kind: err.kind(),
            message,
        })
        .await
    }

    async fn emit(&self, event: SessionEvent) -> Result<(), Closed> {
        self.events.send(event).await.map_err(|_| Closed)
    }
}

/// Sends `samples` as pointer commands in order while passing every event
/// that arrives meanwhile to `on_event`.
///
/// Both channels are bounded; reading while sending keeps a long run of
/// selection changes from filling the event channel and stalling the session.
pub async fn feed_pointer_samples(
    cmd_tx: &Sender<SessionCommand>,
    event_rx: &mut Receiver<SessionEvent>,
    samples: &[PointerSample],
    mut on_event: impl FnMut(&SessionEvent),
) -> Result<()> {
    let mut pending = samples.iter();
    let mut next = pending.next();
    while let Some(sample) = next {
        select! {
            sent = cmd_tx.send(SessionCommand::Pointer(*sample)) => {
                if sent.is_err() {
                    anyhow::bail!("session stopped while receiving pointer samples");
                }
                next = pending.next();
            }
            Some(event) = event_rx.recv() => on_event(&event),
        }
    }
    Ok(())
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
