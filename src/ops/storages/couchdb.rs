use async_stream::try_stream;
use reqwest::{StatusCode, Url};

use crate::ops::interface::{KeyValueStore, RemoteRecord, Revision, StoreFactory, into_document};
use crate::prelude::*;
use crate::settings::StorageConfig;
use crate::utils::http::{read_json, request, status_error};
use crate::utils::retryable::RetryOptions;

const BACKEND: &str = "couchdb";
const DESIGN_DOC_PREFIX: &str = "_design/";
const MISSING_DB_REASON: &str = "Database does not exist.";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    reason: Option<String>,
}

/// Whether a 404 body says the database itself is gone, rather than a document.
fn names_missing_db(body: &str) -> bool {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.reason)
        .is_some_and(|reason| reason == MISSING_DB_REASON)
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    #[serde(default)]
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(default)]
    rev: Option<String>,
}

/// Client of one CouchDB database.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct CouchDbClient {
    http: reqwest::Client,
    db_url: Url,
    db: String,
    user: String,
    password: String,
    page_size: usize,
    write_attempts: usize,
    read_retry: RetryOptions,
}

impl std::fmt::Debug for CouchDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouchDbClient")
            .field("db_url", &self.db_url.as_str())
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl CouchDbClient {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.check()?;
        let base_url = config.base_url();
        let mut db_url = Url::parse(&base_url)
            .map_err(|e| Error::validation(format!("Invalid host `{base_url}`: {e}")))?;
        if !matches!(db_url.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "Unsupported scheme `{}`, expected http or https.",
                db_url.scheme()
            )));
        }
        db_url
            .path_segments_mut()
            .map_err(|_| Error::validation(format!("Invalid host `{base_url}`.")))?
            .pop_if_empty()
            .push(&config.db);

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        debug!("Connecting to {} as {}", db_url.as_str(), config.user());
        Ok(Self {
            http,
            db_url,
            db: config.db.clone(),
            user: config.user().to_string(),
            password: config.password().to_string(),
            page_size: config.page_size,
            write_attempts: config.write_attempts,
            read_retry: config.read_retry_options(),
        })
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    fn missing_db(&self) -> Error {
        Error::connection(format!("database `{}` does not exist", self.db))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.user, Some(&self.password))
    }

    fn doc_url(&self, key: &str) -> Url {
        let mut url = self.db_url.clone();
        // `db_url` was checked to be a base URL at construction.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key);
        }
        url
    }

    fn all_docs_url(&self, start_after: Option<&str>) -> Result<Url> {
        let mut url = self.doc_url("_all_docs");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(last) = start_after {
                query.append_pair("startkey", &serde_json::to_string(last)?);
                query.append_pair("skip", "1");
            }
        }
        Ok(url)
    }

    async fn fetch_page(&self, start_after: Option<&str>) -> Result<Vec<String>> {
        let url = self.all_docs_url(start_after)?;
        let resp = request(
            &self.http,
            |c| self.authed(c.get(url.clone())),
            &[StatusCode::NOT_FOUND],
            &self.read_retry,
        )
        .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            if names_missing_db(&body) {
                return Err(self.missing_db());
            }
            return Err(status_error(StatusCode::NOT_FOUND, &body));
        }
        let page: AllDocsResponse = read_json(resp).await?;
        Ok(page.rows.into_iter().map(|row| row.id).collect())
    }
}

#[async_trait]
impl KeyValueStore for CouchDbClient {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn ping(&self) -> Result<()> {
        let resp = request(
            &self.http,
            |c| self.authed(c.get(self.db_url.clone())),
            &[StatusCode::NOT_FOUND],
            &self.read_retry,
        )
        .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(self.missing_db());
        }
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<Option<RemoteRecord>> {
        let url = self.doc_url(key);
        let resp = request(
            &self.http,
            |c| self.authed(c.get(url.clone())),
            &[StatusCode::NOT_FOUND],
            &self.read_retry,
        )
        .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            if names_missing_db(&body) {
                return Err(self.missing_db());
            }
            return Ok(None);
        }

        let doc: serde_json::Value = read_json(resp).await?;
        let revision = doc
            .get("_rev")
            .and_then(|rev| rev.as_str())
            .map(|rev| Revision(rev.to_string()));
        let payload = into_document(key, doc)?;
        Ok(Some(RemoteRecord {
            key: key.to_string(),
            revision,
            payload,
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Revision>,
        value: serde_json::Value,
    ) -> Result<Option<Revision>> {
        let mut doc = into_document(key, value)?;
        doc.insert("_id".to_string(), serde_json::Value::String(key.to_string()));
        let resp = match expected {
            Some(rev) => {
                doc.insert("_rev".to_string(), serde_json::Value::String(rev.0.clone()));
                let url = self.doc_url(key);
                request(
                    &self.http,
                    |c| self.authed(c.put(url.clone()).json(&doc)),
                    &[StatusCode::CONFLICT],
                    &RetryOptions::no_retry(),
                )
                .await?
            }
            None => {
                request(
                    &self.http,
                    |c| self.authed(c.post(self.db_url.clone()).json(&doc)),
                    &[StatusCode::CONFLICT],
                    &RetryOptions::no_retry(),
                )
                .await?
            }
        };
        if resp.status() == StatusCode::CONFLICT {
            return Err(Error::Conflict {
                key: key.to_string(),
            });
        }
        let written: WriteResponse = read_json(resp).await?;
        trace!("Wrote `{key}` to {}", self.db);
        Ok(written.rev.map(Revision))
    }

    fn write_attempts(&self) -> usize {
        self.write_attempts
    }

    fn keys(&self) -> BoxStream<'_, Result<String>> {
        try_stream! {
            let mut start_after: Option<String> = None;
            loop {
                let page = self.fetch_page(start_after.as_deref()).await?;
                let page_len = page.len();
                for id in page {
                    if !id.starts_with(DESIGN_DOC_PREFIX) {
                        yield id.clone();
                    }
                    start_after = Some(id);
                }
                if page_len < self.page_size {
                    break;
                }
            }
        }
        .boxed()
    }
}

/// Builds [`CouchDbClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CouchDbFactory;

impl StoreFactory for CouchDbFactory {
    fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(CouchDbClient::new(config)?))
    }
}
