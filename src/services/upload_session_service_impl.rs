use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{event_dispatcher::EventDispatcher, outbox_rows_for, settings::SessionSettings};
use crate::{
    domain::{
        errors::{SessionError, SessionResult, StorageError},
        models::{
            validate_ttl, MultipartUploadSession, NewUploadSession, SessionKind, SessionStatus,
            SingleUploadSession, UploadSession,
        },
        value_objects::SessionId,
    },
    ports::{
        repositories::UploadSessionRepository,
        services::{
            MultipartUploadTicket, SingleUploadTicket, StartUploadCommand, UploadSessionService,
        },
        storage::ObjectStorageClient,
        system::{Clock, IdGenerator},
    },
};

/// Implementation of the UploadSessionService
#[derive(Clone)]
pub struct UploadSessionServiceImpl {
    sessions: Arc<dyn UploadSessionRepository>,
    storage: Arc<dyn ObjectStorageClient>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: SessionSettings,
}

impl UploadSessionServiceImpl {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        storage: Arc<dyn ObjectStorageClient>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions,
            storage,
            dispatcher,
            clock,
            ids,
            settings,
        }
    }

    fn new_session(&self, command: StartUploadCommand) -> SessionResult<NewUploadSession> {
        let ttl = match command.ttl {
            Some(ttl) => ttl,
            None => Duration::from_std(self.settings.default_ttl)
                .unwrap_or_else(|_| Duration::hours(24)),
        };
        validate_ttl(ttl)?;

        Ok(NewUploadSession {
            id: SessionId::from_uuid(self.ids.next_id()),
            policy_id: command.policy_id,
            uploader_id: command.uploader_id,
            descriptor: command.descriptor,
            location: command.location,
            ttl,
            now: self.clock.now(),
        })
    }

    async fn load(&self, session_id: SessionId) -> SessionResult<UploadSession> {
        self.sessions
            .find_by_id(session_id)
            .await?
            .ok_or(SessionError::NotFound { session_id })
    }

    /// Persist a completed session with its outbox rows, then announce it
    async fn commit_completion(&self, mut session: UploadSession) -> SessionResult<UploadSession> {
        let mut rows = outbox_rows_for(
            session.pending_events(),
            self.ids.as_ref(),
            self.clock.now(),
        );
        self.sessions.save(&mut session, &mut rows).await?;
        self.dispatcher.dispatch(session.take_events()).await;
        Ok(session)
    }
}

fn expect_kind(session: &UploadSession, expected: SessionKind) -> SessionResult<()> {
    if session.kind() == expected {
        Ok(())
    } else {
        Err(SessionError::VariantMismatch {
            expected,
            actual: session.kind(),
        })
    }
}

#[async_trait]
impl UploadSessionService for UploadSessionServiceImpl {
    #[instrument(skip(self, command), fields(location = %command.location))]
    async fn start_single_upload(
        &self,
        command: StartUploadCommand,
    ) -> SessionResult<SingleUploadTicket> {
        let new = self.new_session(command)?;
        let ttl = new.ttl.to_std().unwrap_or_default();
        let mut session: UploadSession = SingleUploadSession::create(new)?.into();

        let presigned_url = self
            .storage
            .presign_upload(session.core().location(), ttl)
            .await?;
        session.activate(self.clock.now())?;
        self.sessions.save(&mut session, &mut []).await?;

        info!(session_id = %session.id(), "Single upload session started");
        Ok(SingleUploadTicket {
            session_id: session.id(),
            presigned_url,
            expires_at: session.expires_at(),
        })
    }

    #[instrument(skip(self, command), fields(location = %command.location))]
    async fn start_multipart_upload(
        &self,
        command: StartUploadCommand,
    ) -> SessionResult<MultipartUploadTicket> {
        let new = self.new_session(command)?;
        let location = new.location.clone();

        let upload_id = self.storage.initiate_multipart(&location).await?;
        let created = MultipartUploadSession::create(new, upload_id.clone()).and_then(|m| {
            let mut session: UploadSession = m.into();
            session.activate(self.clock.now())?;
            Ok(session)
        });

        let persisted = match created {
            Ok(mut session) => {
                let saved = self.sessions.save(&mut session, &mut []).await;
                saved.map(|()| session).map_err(SessionError::from)
            }
            Err(e) => Err(e),
        };

        match persisted {
            Ok(session) => {
                info!(session_id = %session.id(), upload_id = %upload_id, "Multipart upload session started");
                Ok(MultipartUploadTicket {
                    session_id: session.id(),
                    provider_upload_id: upload_id,
                    expires_at: session.expires_at(),
                })
            }
            Err(e) => {
                // Nothing durable points at the provider upload, so it would be orphaned
                if let Err(abort_err) = self.storage.abort_multipart(&location, &upload_id).await {
                    warn!(upload_id = %upload_id, error = %abort_err, "Could not abort orphaned multipart upload");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self, etag))]
    async fn record_part(
        &self,
        session_id: SessionId,
        part_number: u32,
        etag: String,
        size: u64,
    ) -> SessionResult<UploadSession> {
        let attempts = self.settings.max_write_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut session = self.load(session_id).await?;
            expect_kind(&session, SessionKind::Multipart)?;
            if let Some(multipart) = session.as_multipart_mut() {
                multipart.add_completed_part(part_number, etag.clone(), size, self.clock.now())?;
            }

            match self.sessions.save(&mut session, &mut []).await {
                Ok(()) => return Ok(session),
                // Parts arrive concurrently; reload and re-apply
                Err(e) if e.is_conflict() && attempt < attempts => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[instrument(skip(self, provided_etag))]
    async fn confirm_single_upload(
        &self,
        session_id: SessionId,
        provided_etag: Option<String>,
    ) -> SessionResult<UploadSession> {
        let mut session = self.load(session_id).await?;
        expect_kind(&session, SessionKind::Single)?;
        session.ensure_can_transition(SessionStatus::Completed, "confirm completion of")?;

        let location = session.core().location();
        let head = self.storage.head_object(location).await?;
        let provider_etag = head
            .etag
            .filter(|etag| !etag.is_empty())
            .ok_or_else(|| StorageError::MissingEtag {
                location: location.clone(),
            })?;

        if let Some(single) = session.as_single_mut() {
            single.confirm_completion(provided_etag.as_deref(), &provider_etag, self.clock.now())?;
        }

        let session = self.commit_completion(session).await?;
        info!(session_id = %session_id, "Single upload completed");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn complete_multipart(&self, session_id: SessionId) -> SessionResult<UploadSession> {
        let mut session = self.load(session_id).await?;
        let multipart = session
            .as_multipart_mut()
            .ok_or(SessionError::VariantMismatch {
                expected: SessionKind::Multipart,
                actual: SessionKind::Single,
            })?;

        let parts = multipart.begin_completion()?;
        let etag = self
            .storage
            .complete_multipart(
                multipart.core().location(),
                multipart.provider_upload_id(),
                &parts,
            )
            .await?;
        multipart.mark_completed(etag, self.clock.now())?;

        let session = self.commit_completion(session).await?;
        info!(session_id = %session_id, parts = parts.len(), "Multipart upload completed");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn cancel_upload(&self, session_id: SessionId) -> SessionResult<UploadSession> {
        let mut session = self.load(session_id).await?;
        session.ensure_can_transition(SessionStatus::Cancelled, "cancel")?;

        if let Some(multipart) = session.as_multipart() {
            self.storage
                .abort_multipart(multipart.core().location(), multipart.provider_upload_id())
                .await?;
        }
        session.cancel(self.clock.now())?;
        self.sessions.save(&mut session, &mut []).await?;

        info!(session_id = %session_id, "Upload session cancelled");
        Ok(session)
    }

    async fn get_session(&self, session_id: SessionId) -> SessionResult<UploadSession> {
        self.load(session_id).await
    }
}
