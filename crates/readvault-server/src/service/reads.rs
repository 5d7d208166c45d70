//! Data-plane operations devices call with a bearer key.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::api::{
    AddReadsRequest, ApiError, CountResponse, DeleteReadsRequest, GetNotificationRequest,
    GetNotificationResponse, GetReadersResponse, GetReadsRequest, GetReadsResponse, Reader,
    SaveNotificationRequest,
};
use crate::auth::{Access, Authorizer};
use crate::storage::{Database, Read, SaveOutcome, Scope};

/// Reads, notifications and reader listing for key holders.
///
/// Every call takes the raw `Authorization` header value.
#[derive(Clone)]
pub struct ReadService {
    db: Arc<dyn Database>,
    authorizer: Authorizer,
}

impl ReadService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        let authorizer = Authorizer::new(Arc::clone(&db));
        Self { db, authorizer }
    }

    /// Reads in a time window plus the reader's fresh notification, if any.
    #[instrument(skip_all, fields(reader = %request.reader_name))]
    pub async fn get_reads(
        &self,
        auth: Option<&str>,
        request: &GetReadsRequest,
    ) -> Result<GetReadsResponse, ApiError> {
        let resolved = self.authorizer.authorize(auth, Access::Query).await?;
        let account_id = resolved.account.id;

        let reads = self
            .db
            .get_reads(account_id, &request.reader_name, request.start, request.end)
            .await?;
        let notification = self
            .db
            .get_notification(account_id, &request.reader_name)
            .await?;

        Ok(GetReadsResponse {
            count: reads.len(),
            reads,
            notification,
        })
    }

    /// Store reads under the presenting key. Invalid rows are dropped before
    /// the insert; the count covers the rows submitted to storage.
    #[instrument(skip_all, fields(submitted = request.reads.len()))]
    pub async fn add_reads(
        &self,
        auth: Option<&str>,
        request: &AddReadsRequest,
    ) -> Result<CountResponse, ApiError> {
        let resolved = self.authorizer.authorize(auth, Access::Ingest).await?;

        let valid: Vec<Read> = request
            .reads
            .iter()
            .filter_map(|read| match read.validate() {
                Ok(read) => Some(read),
                Err(e) => {
                    debug!(error = %e, "Dropping invalid read");
                    None
                }
            })
            .collect();

        let stored = self.db.add_reads(&resolved.key.value, valid).await?;
        info!(
            reader = %resolved.key.reader_name,
            count = stored.len(),
            "Reads uploaded"
        );
        Ok(CountResponse {
            count: stored.len() as u64,
        })
    }

    /// Delete a reader's reads.
    ///
    /// With `start` and `end` the range is deleted, with only `end` every
    /// read at or before it, and with neither every read of the reader.
    /// A `start` without an `end` is a bad request rather than a delete of
    /// everything from `start` on.
    #[instrument(skip_all, fields(reader = %request.reader_name))]
    pub async fn delete_reads(
        &self,
        auth: Option<&str>,
        request: &DeleteReadsRequest,
    ) -> Result<CountResponse, ApiError> {
        let resolved = self.authorizer.authorize(auth, Access::Delete).await?;
        let account_id = resolved.account.id;
        let reader = request.reader_name.as_str();

        let count = match (request.start, request.end) {
            (Some(start), Some(end)) => self.db.delete_reads(account_id, reader, start, end).await?,
            (None, Some(end)) => self.db.delete_reads_before(account_id, reader, end).await?,
            (None, None) => self.db.delete_reader_reads(account_id, reader).await?,
            (Some(_), None) => {
                return Err(ApiError::bad_request("end is required when start is given"));
            }
        };
        info!(count, "Reads deleted");
        Ok(CountResponse { count })
    }

    /// Record a device-health event. A repeated timestamp is accepted
    /// without storing a second row.
    #[instrument(skip_all, fields(kind = %request.notification.kind))]
    pub async fn save_notification(
        &self,
        auth: Option<&str>,
        request: &SaveNotificationRequest,
    ) -> Result<(), ApiError> {
        let resolved = self.authorizer.authorize(auth, Access::Ingest).await?;
        let (kind, when) = request.notification.validate()?;

        match self
            .db
            .save_notification(kind, when, &resolved.key.value)
            .await?
        {
            SaveOutcome::Inserted => {
                info!(reader = %resolved.key.reader_name, %kind, "Notification saved");
            }
            SaveOutcome::Duplicate => {
                debug!(reader = %resolved.key.reader_name, when, "Duplicate notification ignored");
            }
        }
        Ok(())
    }

    /// Latest notification for a reader. `None` maps to 204 No Content.
    #[instrument(skip_all, fields(reader = %request.reader_name))]
    pub async fn get_notification(
        &self,
        auth: Option<&str>,
        request: &GetNotificationRequest,
    ) -> Result<Option<GetNotificationResponse>, ApiError> {
        let resolved = self.authorizer.authorize(auth, Access::Query).await?;
        let notification = self
            .db
            .get_notification(resolved.account.id, &request.reader_name)
            .await?;
        Ok(notification.map(|notification| GetNotificationResponse {
            reader_name: request.reader_name.clone(),
            notification,
        }))
    }

    /// Names of the account's uploading readers.
    #[instrument(skip_all)]
    pub async fn get_readers(&self, auth: Option<&str>) -> Result<GetReadersResponse, ApiError> {
        let resolved = self.authorizer.authorize(auth, Access::Query).await?;
        let keys = self.db.list_sibling_keys(&resolved.key.value).await?;

        let names: BTreeSet<String> = keys
            .into_iter()
            .filter(|key| key.scope == Scope::Write)
            .map(|key| key.reader_name)
            .collect();
        Ok(GetReadersResponse {
            readers: names.into_iter().map(|name| Reader { name }).collect(),
        })
    }
}
