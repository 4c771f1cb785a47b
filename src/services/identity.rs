use crate::{
    auth::guest::{self, GuestCredentials},
    entities::guest_session::{self, Entity as GuestSession},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// The stable owner key a cart or order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOwner {
    User(Uuid),
    Guest(Uuid),
}

/// A freshly minted guest session. The secret only ever exists in this
/// struct and the response headers; it is never re-emitted on later
/// requests.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub secret: String,
}

/// The identity resolved for a request.
#[derive(Debug, Clone)]
pub enum ResolvedIdentity {
    /// Authenticated caller, possibly accompanied by a validated guest
    /// session whose cart/orders are pending merge.
    User {
        user_id: Uuid,
        guest_session: Option<guest_session::Model>,
    },
    /// Anonymous caller with a usable session. `issued` carries the secret
    /// when the session was minted by this request.
    Guest {
        session: guest_session::Model,
        issued: Option<IssuedSession>,
    },
}

impl ResolvedIdentity {
    pub fn owner(&self) -> CartOwner {
        match self {
            ResolvedIdentity::User { user_id, .. } => CartOwner::User(*user_id),
            ResolvedIdentity::Guest { session, .. } => CartOwner::Guest(session.id),
        }
    }

    pub fn issued_session(&self) -> Option<&IssuedSession> {
        match self {
            ResolvedIdentity::Guest { issued, .. } => issued.as_ref(),
            ResolvedIdentity::User { .. } => None,
        }
    }
}

/// Resolves request identity: authenticated principals pass through, guest
/// header pairs are validated against stored sessions, and new sessions are
/// minted when the operation permits it.
#[derive(Clone)]
pub struct IdentityService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    session_ttl: Duration,
}

impl IdentityService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        session_ttl_days: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            session_ttl: Duration::days(session_ttl_days),
        }
    }

    /// Resolves the caller's identity.
    ///
    /// An authenticated user id always wins; valid guest credentials riding
    /// alongside it are resolved too, so the caller can merge the guest's
    /// cart. For anonymous callers the credentials are validated; a wrong
    /// secret or expired session behaves exactly like absent credentials.
    /// With `allow_create` a fresh session is minted in that case, otherwise
    /// the request has no usable identity and is rejected.
    #[instrument(skip(self, credentials))]
    pub async fn resolve(
        &self,
        user_id: Option<Uuid>,
        credentials: Option<&GuestCredentials>,
        allow_create: bool,
    ) -> Result<ResolvedIdentity, ServiceError> {
        let validated = match credentials {
            Some(creds) => self.validate_session(creds).await?,
            None => None,
        };

        if let Some(user_id) = user_id {
            return Ok(ResolvedIdentity::User {
                user_id,
                guest_session: validated,
            });
        }

        if let Some(session) = validated {
            return Ok(ResolvedIdentity::Guest {
                session,
                issued: None,
            });
        }

        if !allow_create {
            return Err(ServiceError::Unauthorized(
                "No usable identity for this request".to_string(),
            ));
        }

        let (session, issued) = self.mint_session().await?;
        Ok(ResolvedIdentity::Guest {
            session,
            issued: Some(issued),
        })
    }

    /// Validates a presented header pair against the stored session.
    /// Returns `None` for an unknown id, wrong secret, or expired session;
    /// a validated session has its `last_seen_at` touched.
    #[instrument(skip(self, credentials))]
    pub async fn validate_session(
        &self,
        credentials: &GuestCredentials,
    ) -> Result<Option<guest_session::Model>, ServiceError> {
        let Some(session) = GuestSession::find_by_id(credentials.session_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        if session.secret != credentials.secret {
            debug!(session_id = %credentials.session_id, "Guest secret mismatch");
            return Ok(None);
        }
        if session.expires_at <= Utc::now() {
            debug!(session_id = %credentials.session_id, "Guest session expired");
            return Ok(None);
        }

        let mut active: guest_session::ActiveModel = session.into();
        active.last_seen_at = Set(Utc::now());
        let session = active.update(&*self.db).await?;

        Ok(Some(session))
    }

    /// Mints and persists a fresh guest session.
    #[instrument(skip(self))]
    pub async fn mint_session(
        &self,
    ) -> Result<(guest_session::Model, IssuedSession), ServiceError> {
        let session_id = Uuid::new_v4();
        let secret = guest::generate_secret();
        let now = Utc::now();

        let session = guest_session::ActiveModel {
            id: Set(session_id),
            secret: Set(secret.clone()),
            created_at: Set(now),
            last_seen_at: Set(now),
            expires_at: Set(now + self.session_ttl),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::GuestSessionIssued(session_id))
            .await;

        Ok((
            session,
            IssuedSession {
                session_id,
                secret,
            },
        ))
    }

    /// Deletes a session so its token can never be replayed. Runs on the
    /// caller's connection so rotation commits atomically with the merge or
    /// migration that triggered it.
    #[instrument(skip(self, conn))]
    pub async fn rotate_session<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: Uuid,
    ) -> Result<(), ServiceError> {
        GuestSession::delete_by_id(session_id).exec(conn).await?;

        self.event_sender
            .send_or_log(Event::GuestSessionRotated(session_id))
            .await;

        Ok(())
    }
}
